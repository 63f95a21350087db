// shared/src/lib.rs

use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("key is empty")]
    EmptyKey,
    #[error("value is nil")]
    NilValue,
    #[error("template: {0}")]
    Template(String),
    #[error("key:{0}, error:more than one values associated with the key")]
    TooManyValues(String),
    #[error("backing store: {0}")]
    BackingStore(String),
    #[error("codec: {0}")]
    Codec(String),
    #[error("config: {0}")]
    Config(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Time-to-live in milliseconds, carried in value metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TtlMs(pub u64);

/// Returns an error if the key is empty.
pub fn check_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::EmptyKey);
    }
    Ok(())
}

/// Combines an operation's result with the result of releasing its connection.
///
/// A release failure is never dropped: it becomes the error on success, and is
/// appended to the primary error otherwise.
pub fn merge_release<T>(
    primary: Result<T>,
    release: std::result::Result<(), String>,
) -> Result<T> {
    match (primary, release) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(release)) => Err(Error::BackingStore(format!("release: {}", release))),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(release)) => Err(Error::BackingStore(format!(
            "{}; release: {}",
            err, release
        ))),
    }
}

pub mod config;
