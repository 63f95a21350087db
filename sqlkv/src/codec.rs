use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::config::CodecKind;
use shared::{Error, Result};

use crate::domain::ValueOption;

/// Encodes values and their metadata to the text stored in the backing store.
#[derive(Clone, Copy, Debug, Default)]
pub struct Codec {
    kind: CodecKind,
}

impl Codec {
    pub fn new(kind: CodecKind) -> Self {
        Self { kind }
    }

    pub fn encode<V: Serialize + ?Sized>(&self, value: &V) -> Result<String> {
        match self.kind {
            CodecKind::Json => {
                let text = serde_json::to_string(value).map_err(|e| Error::Codec(e.to_string()))?;
                if text == "null" {
                    return Err(Error::NilValue);
                }
                Ok(text)
            }
            CodecKind::Text => {
                match serde_json::to_value(value).map_err(|e| Error::Codec(e.to_string()))? {
                    serde_json::Value::String(text) => Ok(text),
                    serde_json::Value::Null => Err(Error::NilValue),
                    other => Err(Error::Codec(format!(
                        "text codec needs a string value, got {}",
                        json_type(&other)
                    ))),
                }
            }
        }
    }

    pub fn decode<V: DeserializeOwned>(&self, data: &str) -> Result<V> {
        let decoded = match self.kind {
            CodecKind::Json => serde_json::from_str(data),
            CodecKind::Text => serde_json::from_value(serde_json::Value::String(data.to_string())),
        };
        decoded.map_err(|e| Error::Codec(e.to_string()))
    }

    /// Metadata is always JSON, whatever the value codec.
    pub fn encode_option(&self, option: &ValueOption) -> Result<String> {
        serde_json::to_string(option).map_err(|e| Error::Codec(e.to_string()))
    }

    pub fn decode_option(&self, data: &str) -> Result<ValueOption> {
        serde_json::from_str(data).map_err(|e| Error::Codec(e.to_string()))
    }
}

fn json_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
