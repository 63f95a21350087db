use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use shared::TtlMs;

/// Timestamp layout used for the `Time` template variable and `create_time`.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Current local time rendered with [`TIME_FORMAT`].
pub fn now_formatted() -> String {
    Local::now().format(TIME_FORMAT).to_string()
}

/// One result row, every cell scanned as text. NULL cells are empty strings.
pub type Row = Vec<String>;

/// Metadata stored alongside a value in the option column.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueOption {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<TtlMs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
}

impl ValueOption {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: TtlMs) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_create_time(mut self, create_time: impl Into<String>) -> Self {
        self.create_time = Some(create_time.into());
        self
    }

    /// Fills `create_time` with the current time if it was never set.
    pub(crate) fn stamped(mut self) -> Self {
        if self.create_time.as_deref().is_none_or(str::is_empty) {
            self.create_time = Some(now_formatted());
        }
        self
    }
}

/// The client's last known snapshot of a key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheValue {
    /// Encoded value text, exactly as stored in the value column.
    pub value: String,
    pub option: ValueOption,
    pub update_time: DateTime<Utc>,
}

impl CacheValue {
    pub fn new(value: impl Into<String>, option: ValueOption) -> Self {
        Self {
            value: value.into(),
            option,
            update_time: Utc::now(),
        }
    }
}

pub mod response {
    use super::ValueOption;

    #[derive(Clone, Debug)]
    pub struct GetResponse<V> {
        pub found: bool,
        pub value: Option<V>,
        pub option: ValueOption,
    }

    impl<V> GetResponse<V> {
        pub fn found(value: V, option: ValueOption) -> Self {
            Self {
                found: true,
                value: Some(value),
                option,
            }
        }

        pub fn not_found() -> Self {
            Self {
                found: false,
                value: None,
                option: ValueOption::default(),
            }
        }
    }

    #[derive(Clone, Debug)]
    pub struct DeleteResponse {
        pub deleted: bool,
    }

    impl DeleteResponse {
        pub fn new(deleted: bool) -> Self {
            Self { deleted }
        }
    }
}
