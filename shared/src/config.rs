use std::time::Duration;

use tracing::warn;

use crate::{Error, Result};

/// Value encoding used for the primary value column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CodecKind {
    #[default]
    Json,
    Text,
}

impl std::str::FromStr for CodecKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(CodecKind::Json),
            "text" | "string" => Ok(CodecKind::Text),
            other => Err(Error::Config(format!("unknown codec: {}", other))),
        }
    }
}

/// How the backing store acquires connections.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Open and close a connection around every call.
    #[default]
    PerCall,
    /// Keep one connection open for the lifetime of the store.
    Shared,
}

impl std::str::FromStr for ConnectionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per-call" | "per_call" | "percall" => Ok(ConnectionMode::PerCall),
            "shared" | "pool" => Ok(ConnectionMode::Shared),
            other => Err(Error::Config(format!("unknown connection mode: {}", other))),
        }
    }
}

/// The four query templates. An empty template means "use the default".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryTemplates {
    pub keys: String,
    pub get: String,
    pub set: String,
    pub delete: String,
}

impl QueryTemplates {
    pub const DEFAULT_KEYS: &str = "select k from kv where state = 1";
    pub const DEFAULT_GET: &str =
        "select v, option from kv where k = '{{ Key }}' and state = 1";
    pub const DEFAULT_SET: &str = "update kv set v = '{{ Value }}', option = '{{ Option }}', \
         updated = '{{ Time }}' where k = '{{ Key }}' and state = 1";
    pub const DEFAULT_DELETE: &str =
        "update kv set state = 0, updated = '{{ Time }}' where k = '{{ Key }}' and state = 1";

    /// Returns a copy with every unset template replaced by its default.
    pub fn resolved(&self) -> Self {
        fn or_default(template: &str, default: &str) -> String {
            if template.trim().is_empty() {
                default.to_string()
            } else {
                template.to_string()
            }
        }

        Self {
            keys: or_default(&self.keys, Self::DEFAULT_KEYS),
            get: or_default(&self.get, Self::DEFAULT_GET),
            set: or_default(&self.set, Self::DEFAULT_SET),
            delete: or_default(&self.delete, Self::DEFAULT_DELETE),
        }
    }
}

/// Operating parameters of a client. Immutable once the client is built.
#[derive(Clone, Debug)]
pub struct Config {
    pub driver: String,
    pub data_source: String,
    pub templates: QueryTemplates,
    pub codec: CodecKind,
    /// Zero disables background refresh.
    pub refresh_interval: Duration,
    pub connection_mode: ConnectionMode,
}

impl Config {
    const DEFAULT_DRIVER: &str = "sqlite";
    const DEFAULT_DATA_SOURCE: &str = "./data/sqlkv.db";

    pub fn new(driver: impl Into<String>, data_source: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            data_source: data_source.into(),
            templates: QueryTemplates::default().resolved(),
            codec: CodecKind::default(),
            refresh_interval: Duration::ZERO,
            connection_mode: ConnectionMode::default(),
        }
    }

    pub fn with_keys_sql(mut self, sql: impl Into<String>) -> Self {
        self.templates.keys = sql.into();
        self.templates = self.templates.resolved();
        self
    }

    pub fn with_get_sql(mut self, sql: impl Into<String>) -> Self {
        self.templates.get = sql.into();
        self.templates = self.templates.resolved();
        self
    }

    pub fn with_set_sql(mut self, sql: impl Into<String>) -> Self {
        self.templates.set = sql.into();
        self.templates = self.templates.resolved();
        self
    }

    pub fn with_delete_sql(mut self, sql: impl Into<String>) -> Self {
        self.templates.delete = sql.into();
        self.templates = self.templates.resolved();
        self
    }

    pub fn with_codec(mut self, codec: CodecKind) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_connection_mode(mut self, mode: ConnectionMode) -> Self {
        self.connection_mode = mode;
        self
    }

    /// Loads the configuration from `SQLKV_*` environment variables.
    ///
    /// Call `dotenvy::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let driver = lookup("SQLKV_DRIVER").unwrap_or_else(|| Self::DEFAULT_DRIVER.to_string());
        let data_source = lookup("SQLKV_DATA_SOURCE")
            .unwrap_or_else(|| Self::DEFAULT_DATA_SOURCE.to_string());

        let templates = QueryTemplates {
            keys: lookup("SQLKV_KEYS_SQL").unwrap_or_default(),
            get: lookup("SQLKV_GET_SQL").unwrap_or_default(),
            set: lookup("SQLKV_SET_SQL").unwrap_or_default(),
            delete: lookup("SQLKV_DELETE_SQL").unwrap_or_default(),
        }
        .resolved();

        let codec = parse_or_default(lookup("SQLKV_CODEC"), "SQLKV_CODEC");
        let connection_mode =
            parse_or_default(lookup("SQLKV_CONNECTION_MODE"), "SQLKV_CONNECTION_MODE");

        let refresh_ms = match lookup("SQLKV_REFRESH_INTERVAL_MS") {
            Some(raw) => raw.trim().parse::<u64>().unwrap_or_else(|_| {
                warn!("SQLKV_REFRESH_INTERVAL_MS={} is not a number, refresh disabled", raw);
                0
            }),
            None => 0,
        };

        Self {
            driver,
            data_source,
            templates,
            codec,
            refresh_interval: Duration::from_millis(refresh_ms),
            connection_mode,
        }
    }
}

fn parse_or_default<T>(raw: Option<String>, name: &str) -> T
where
    T: std::str::FromStr<Err = Error> + Default,
{
    match raw {
        Some(raw) => raw.parse().unwrap_or_else(|e| {
            warn!("{}: {}, using default", name, e);
            T::default()
        }),
        None => T::default(),
    }
}

/// Listener settings for the TCP front end.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// SQL file run once against the store before serving, e.g. a schema.
    pub init_sql: Option<String>,
}

impl ServerConfig {
    const DEFAULT_HOST: &str = "127.0.0.1";
    const DEFAULT_PORT: u16 = 5600;

    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let host = lookup("SQLKV_HOST").unwrap_or_else(|| Self::DEFAULT_HOST.to_string());
        let port = match lookup("SQLKV_TCP_PORT") {
            Some(raw) => raw.parse::<u16>().unwrap_or_else(|e| {
                warn!("SQLKV_TCP_PORT: {}, using default", e);
                Self::DEFAULT_PORT
            }),
            None => Self::DEFAULT_PORT,
        };
        let init_sql = lookup("SQLKV_INIT_SQL").filter(|path| !path.is_empty());
        Self {
            host,
            port,
            init_sql,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_fill_unset_templates() {
        let config = Config::new("sqlite", "kv.db");
        assert_eq!(config.templates.keys, QueryTemplates::DEFAULT_KEYS);
        assert_eq!(config.templates.get, QueryTemplates::DEFAULT_GET);
        assert_eq!(config.templates.set, QueryTemplates::DEFAULT_SET);
        assert_eq!(config.templates.delete, QueryTemplates::DEFAULT_DELETE);
        assert_eq!(config.refresh_interval, Duration::ZERO);
    }

    #[test]
    fn test_builder_overrides_single_template() {
        let config =
            Config::new("sqlite", "kv.db").with_get_sql("select v from kv where k = '{{ Key }}'");
        assert_eq!(config.templates.get, "select v from kv where k = '{{ Key }}'");
        assert_eq!(config.templates.keys, QueryTemplates::DEFAULT_KEYS);

        let config = config.with_get_sql("");
        assert_eq!(config.templates.get, QueryTemplates::DEFAULT_GET);
    }

    #[test]
    fn test_from_lookup() {
        let config = Config::from_lookup(lookup_from(&[
            ("SQLKV_DATA_SOURCE", "/tmp/kv.db"),
            ("SQLKV_KEYS_SQL", "select k from kv"),
            ("SQLKV_CODEC", "text"),
            ("SQLKV_REFRESH_INTERVAL_MS", "2500"),
            ("SQLKV_CONNECTION_MODE", "shared"),
        ]));

        assert_eq!(config.driver, "sqlite");
        assert_eq!(config.data_source, "/tmp/kv.db");
        assert_eq!(config.templates.keys, "select k from kv");
        assert_eq!(config.templates.get, QueryTemplates::DEFAULT_GET);
        assert_eq!(config.codec, CodecKind::Text);
        assert_eq!(config.refresh_interval, Duration::from_millis(2500));
        assert_eq!(config.connection_mode, ConnectionMode::Shared);
    }

    #[test]
    fn test_from_lookup_bad_values_fall_back() {
        let config = Config::from_lookup(lookup_from(&[
            ("SQLKV_CODEC", "gob"),
            ("SQLKV_REFRESH_INTERVAL_MS", "soon"),
            ("SQLKV_CONNECTION_MODE", "maybe"),
        ]));

        assert_eq!(config.codec, CodecKind::Json);
        assert_eq!(config.refresh_interval, Duration::ZERO);
        assert_eq!(config.connection_mode, ConnectionMode::PerCall);
    }

    #[test]
    fn test_server_config_from_lookup() {
        let server = ServerConfig::from_lookup(lookup_from(&[
            ("SQLKV_TCP_PORT", "7000"),
            ("SQLKV_INIT_SQL", "schema.sql"),
        ]));
        assert_eq!(server.address(), "127.0.0.1:7000");
        assert_eq!(server.init_sql.as_deref(), Some("schema.sql"));

        let server = ServerConfig::from_lookup(lookup_from(&[("SQLKV_TCP_PORT", "http")]));
        assert_eq!(server.port, 5600);
        assert!(server.init_sql.is_none());
    }
}
