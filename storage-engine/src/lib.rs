pub mod sqlite_store;

pub use sqlite_store::{QUERY_TIMEOUT, SqliteStore};

use shared::config::Config;
use shared::{Error, Result};
use sqlkv::{BackingStore, StoreFactory};
use std::sync::Arc;

/// Creates backing stores for the drivers this crate ships.
#[derive(Clone, Copy, Debug, Default)]
pub struct SqliteStoreFactory;

impl SqliteStoreFactory {
    /// Opens the concrete store for `config`, for callers that need more
    /// than the [`BackingStore`] port (schema setup, for one).
    pub fn open(&self, config: &Config) -> Result<SqliteStore> {
        match config.driver.to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => {
                let store = SqliteStore::open(&config.data_source, config.connection_mode)?;
                tracing::info!("Opened backing store {:?}", store);
                Ok(store)
            }
            other => Err(Error::Config(format!("unsupported driver: {}", other))),
        }
    }
}

impl StoreFactory for SqliteStoreFactory {
    fn create_from_config(&self, config: &Config) -> Result<Arc<dyn BackingStore>> {
        Ok(Arc::new(self.open(config)?))
    }
}
