use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::LengthDelimitedCodec;

pub const MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

// Command type identifiers
pub const CMD_PING: u8 = 0x00;
pub const CMD_KEYS: u8 = 0x01;
pub const CMD_GET: u8 = 0x02;
pub const CMD_SET: u8 = 0x03;
pub const CMD_DEL: u8 = 0x04;
pub const CMD_REFRESH: u8 = 0x05;

// Response type identifiers
pub const RESP_PONG: u8 = 0x00;
pub const RESP_OK: u8 = 0x01;
pub const RESP_VALUE: u8 = 0x02;
pub const RESP_NOT_FOUND: u8 = 0x03;
pub const RESP_ERROR: u8 = 0x04;
pub const RESP_KEYS: u8 = 0x05;

/// Frame codec shared by the server and [`crate::client::TcpClient`]:
/// a 4-byte big-endian length prefix.
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Ping,
    Keys,
    Get { key: String },
    /// `value` is JSON text.
    Set { key: String, value: Bytes, ttl_ms: Option<u64> },
    Del { key: String },
    Refresh,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Pong,
    Ok,
    /// `value` is JSON text.
    Value { value: Bytes },
    Keys { keys: Vec<String> },
    NotFound,
    Error { msg: String },
}

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn get_bytes(buf: &mut Bytes, what: &str) -> Result<Bytes, String> {
    if buf.remaining() < 4 {
        return Err(format!("Invalid {}: missing length", what));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(format!(
            "Invalid {}: expected {} bytes, got {}",
            what,
            len,
            buf.remaining()
        ));
    }
    Ok(buf.copy_to_bytes(len))
}

fn get_string(buf: &mut Bytes, what: &str) -> Result<String, String> {
    let bytes = get_bytes(buf, what)?;
    String::from_utf8(bytes.to_vec()).map_err(|e| format!("Invalid {} UTF-8: {}", what, e))
}

impl Request {
    /// Encode a Request into Bytes for transmission
    ///
    /// Format:
    /// - PING: [0x00]
    /// - KEYS: [0x01]
    /// - GET: [0x02][key_len: u32][key bytes]
    /// - SET: [0x03][key_len: u32][key bytes][value_len: u32][value bytes]
    ///   [has_ttl: u8][ttl_ms: u64, only when has_ttl != 0]
    /// - DEL: [0x04][key_len: u32][key bytes]
    /// - REFRESH: [0x05]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        match self {
            Request::Ping => buf.put_u8(CMD_PING),
            Request::Keys => buf.put_u8(CMD_KEYS),
            Request::Get { key } => {
                buf.put_u8(CMD_GET);
                put_str(&mut buf, key);
            }
            Request::Set { key, value, ttl_ms } => {
                buf.put_u8(CMD_SET);
                put_str(&mut buf, key);
                buf.put_u32(value.len() as u32);
                buf.put_slice(value);
                match ttl_ms {
                    Some(ttl) => {
                        buf.put_u8(1);
                        buf.put_u64(*ttl);
                    }
                    None => buf.put_u8(0),
                }
            }
            Request::Del { key } => {
                buf.put_u8(CMD_DEL);
                put_str(&mut buf, key);
            }
            Request::Refresh => buf.put_u8(CMD_REFRESH),
        }

        buf.freeze()
    }

    /// Decode a Request from a complete frame.
    pub fn decode(mut buf: Bytes) -> Result<Self, String> {
        if buf.is_empty() {
            return Err("Empty buffer".to_string());
        }

        let cmd = buf.get_u8();

        match cmd {
            CMD_PING => Ok(Request::Ping),
            CMD_KEYS => Ok(Request::Keys),
            CMD_GET => Ok(Request::Get {
                key: get_string(&mut buf, "GET key")?,
            }),
            CMD_SET => {
                let key = get_string(&mut buf, "SET key")?;
                let value = get_bytes(&mut buf, "SET value")?;

                if buf.remaining() < 1 {
                    return Err("Invalid SET: missing ttl flag".to_string());
                }
                let ttl_ms = match buf.get_u8() {
                    0 => None,
                    _ if buf.remaining() < 8 => {
                        return Err("Invalid SET: missing ttl".to_string());
                    }
                    _ => Some(buf.get_u64()),
                };

                Ok(Request::Set { key, value, ttl_ms })
            }
            CMD_DEL => Ok(Request::Del {
                key: get_string(&mut buf, "DEL key")?,
            }),
            CMD_REFRESH => Ok(Request::Refresh),
            _ => Err(format!("Unknown command: 0x{:02X}", cmd)),
        }
    }
}

impl Response {
    /// Encode a Response into Bytes for transmission
    ///
    /// Format:
    /// - PONG: [0x00]
    /// - OK: [0x01]
    /// - VALUE: [0x02][value_len: u32][value bytes]
    /// - NOT_FOUND: [0x03]
    /// - ERROR: [0x04][msg_len: u32][msg bytes]
    /// - KEYS: [0x05][count: u32]([key_len: u32][key bytes])*
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        match self {
            Response::Pong => buf.put_u8(RESP_PONG),
            Response::Ok => buf.put_u8(RESP_OK),
            Response::Value { value } => {
                buf.put_u8(RESP_VALUE);
                buf.put_u32(value.len() as u32);
                buf.put_slice(value);
            }
            Response::Keys { keys } => {
                buf.put_u8(RESP_KEYS);
                buf.put_u32(keys.len() as u32);
                for key in keys {
                    put_str(&mut buf, key);
                }
            }
            Response::NotFound => buf.put_u8(RESP_NOT_FOUND),
            Response::Error { msg } => {
                buf.put_u8(RESP_ERROR);
                put_str(&mut buf, msg);
            }
        }

        buf.freeze()
    }

    /// Decode a Response from a complete frame.
    pub fn decode(mut buf: Bytes) -> Result<Self, String> {
        if buf.is_empty() {
            return Err("Empty buffer".to_string());
        }

        let resp_type = buf.get_u8();

        match resp_type {
            RESP_PONG => Ok(Response::Pong),
            RESP_OK => Ok(Response::Ok),
            RESP_VALUE => Ok(Response::Value {
                value: get_bytes(&mut buf, "VALUE")?,
            }),
            RESP_KEYS => {
                if buf.remaining() < 4 {
                    return Err("Invalid KEYS: missing count".to_string());
                }
                let count = buf.get_u32() as usize;
                // Each key needs at least its length prefix.
                if buf.remaining() < count.saturating_mul(4) {
                    return Err(format!("Invalid KEYS: {} keys do not fit", count));
                }
                let keys = (0..count)
                    .map(|_| get_string(&mut buf, "KEYS key"))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Response::Keys { keys })
            }
            RESP_NOT_FOUND => Ok(Response::NotFound),
            RESP_ERROR => {
                let msg_bytes = get_bytes(&mut buf, "ERROR")?;
                let msg = String::from_utf8_lossy(&msg_bytes).to_string();
                Ok(Response::Error { msg })
            }
            _ => Err(format!("Unknown response type: 0x{:02X}", resp_type)),
        }
    }
}
