#![deny(clippy::all)]

use crate::domain::{Row, ValueOption};
use async_trait::async_trait;
use shared::Result;
use shared::config::Config;
use std::sync::Arc;

// Ports are the pluggable extension points around the cache engine

/// Port for the relational store behind the cache.
///
/// Implementations own connection handling and the per-call timeout.
#[async_trait]
pub trait BackingStore: Send + Sync + 'static {
    /// Run a read query and return every row.
    async fn query(&self, sql: &str) -> Result<Vec<Row>>;

    /// Run a write query and return the number of affected rows.
    async fn execute(&self, sql: &str) -> Result<u64>;
}

/// Port for creating a backing store from configuration
pub trait StoreFactory: Send + Sync + 'static {
    fn create_from_config(&self, config: &Config) -> Result<Arc<dyn BackingStore>>;
}

/// Synthesizes a value for a key that neither the cache nor the store holds.
#[async_trait]
pub trait Generator<V>: Send + Sync {
    async fn generate(&self, key: &str) -> Result<(V, ValueOption)>;
}

#[async_trait]
impl<V, F> Generator<V> for F
where
    V: Send + 'static,
    F: Fn(&str) -> Result<(V, ValueOption)> + Send + Sync,
{
    async fn generate(&self, key: &str) -> Result<(V, ValueOption)> {
        self(key)
    }
}
