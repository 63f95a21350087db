use crate::codec::Codec;
use crate::domain::response::{DeleteResponse, GetResponse};
use crate::domain::{CacheValue, Row, ValueOption, now_formatted};
use crate::planes::control::refresh::{self, Refresher};
use crate::planes::data::cache::Cache;
use crate::planes::data::key_lock::KeyLocks;
use crate::ports::{BackingStore, Generator, StoreFactory};
use crate::render::{QueryKind, QueryRenderer, QueryVars};
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::config::Config;
use shared::{Error, Result, check_key};
use std::sync::Arc;
use tracing::debug;

/// State shared between the client handle and its refresh task.
pub(crate) struct ClientCore {
    config: Config,
    renderer: QueryRenderer,
    codec: Codec,
    store: Arc<dyn BackingStore>,
    cache: Cache,
    key_locks: KeyLocks,
}

impl ClientCore {
    fn new(config: Config, store: Arc<dyn BackingStore>) -> Result<Self> {
        let renderer = QueryRenderer::new(&config.templates)?;
        let codec = Codec::new(config.codec);
        Ok(Self {
            config,
            renderer,
            codec,
            store,
            cache: Cache::new(),
            key_locks: KeyLocks::default(),
        })
    }

    pub(crate) fn cache(&self) -> &Cache {
        &self.cache
    }

    fn render(&self, kind: QueryKind, vars: &QueryVars) -> Result<String> {
        let query = self.renderer.render(kind, vars)?;
        debug!("query: {}", query);
        Ok(query)
    }

    pub(crate) async fn keys(&self) -> Result<Vec<String>> {
        let query = self.render(QueryKind::Keys, &QueryVars::new())?;
        let rows = self.store.query(&query).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .collect())
    }

    pub(crate) async fn set<V>(&self, key: &str, value: &V, option: ValueOption) -> Result<()>
    where
        V: Serialize + ?Sized,
    {
        check_key(key)?;
        let encoded = self.codec.encode(value)?;

        let _guard = self.key_locks.lock(key).await;
        self.write(key, encoded, option).await
    }

    /// Persists an encoded value and then overwrites its cache entry.
    /// Callers hold the key lock.
    async fn write(&self, key: &str, encoded: String, option: ValueOption) -> Result<()> {
        let option = option.stamped();
        let option_text = self.codec.encode_option(&option)?;

        let vars = QueryVars::new()
            .key(key)
            .value(encoded.as_str())
            .option(option_text)
            .time(now_formatted());
        let query = self.render(QueryKind::Set, &vars)?;
        let affected = self.store.execute(&query).await?;
        debug!("set '{}' affected {} row(s)", key, affected);

        self.cache.put(key, CacheValue::new(encoded, option));
        Ok(())
    }

    /// Reads the single live row for `key`, without touching the cache.
    async fn fetch(&self, key: &str) -> Result<Option<CacheValue>> {
        let query = self.render(QueryKind::Get, &QueryVars::new().key(key))?;
        let mut rows = self.store.query(&query).await?;

        match rows.len() {
            0 => Ok(None),
            1 => {
                let row = rows.pop().unwrap_or_default();
                self.snapshot_from_row(row).map(Some)
            }
            _ => Err(Error::TooManyValues(key.to_string())),
        }
    }

    fn snapshot_from_row(&self, row: Row) -> Result<CacheValue> {
        let mut columns = row.into_iter();
        let value = columns.next().unwrap_or_default();
        let option = match columns.next() {
            Some(text) if !text.is_empty() => self.codec.decode_option(&text)?,
            _ => ValueOption::default(),
        };
        Ok(CacheValue::new(value, option))
    }

    pub(crate) async fn get<V>(
        &self,
        key: &str,
        generator: Option<&dyn Generator<V>>,
    ) -> Result<GetResponse<V>>
    where
        V: Serialize + DeserializeOwned + Send + Sync,
    {
        check_key(key)?;

        if let Some(hit) = self.cache.get(key) {
            debug!("cache hit for '{}'", key);
            let value = self.codec.decode(&hit.value)?;
            return Ok(GetResponse::found(value, hit.option));
        }

        {
            let _guard = self.key_locks.lock(key).await;

            // Another caller may have filled the entry while we waited.
            if let Some(hit) = self.cache.get(key) {
                let value = self.codec.decode(&hit.value)?;
                return Ok(GetResponse::found(value, hit.option));
            }

            debug!("cache miss for '{}'", key);
            if let Some(snapshot) = self.fetch(key).await? {
                let value = self.codec.decode(&snapshot.value)?;
                let option = snapshot.option.clone();
                self.cache.put(key, snapshot);
                return Ok(GetResponse::found(value, option));
            }
        }

        let Some(generator) = generator else {
            return Ok(GetResponse::not_found());
        };

        // No lock is held here: the generator may read or write other keys,
        // or this one.
        let (value, option) = generator.generate(key).await?;
        let encoded = self.codec.encode(&value)?;

        let _guard = self.key_locks.lock(key).await;
        if let Some(hit) = self.cache.get(key) {
            debug!("'{}' was set while generating, keeping it", key);
            let value = self.codec.decode(&hit.value)?;
            return Ok(GetResponse::found(value, hit.option));
        }
        self.write(key, encoded, option.clone()).await?;
        debug!("generated value for '{}' written through", key);
        Ok(GetResponse::found(value, option))
    }

    /// Read-through without decoding, used by refresh. Returns whether a live
    /// row was cached.
    pub(crate) async fn load(&self, key: &str) -> Result<bool> {
        let _guard = self.key_locks.lock(key).await;
        if self.cache.contains(key) {
            return Ok(true);
        }

        match self.fetch(key).await? {
            Some(snapshot) => {
                self.cache.put(key, snapshot);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub(crate) async fn del(&self, key: &str) -> Result<DeleteResponse> {
        check_key(key)?;

        let _guard = self.key_locks.lock(key).await;
        let vars = QueryVars::new().key(key).time(now_formatted());
        let query = self.render(QueryKind::Delete, &vars)?;
        let affected = self.store.execute(&query).await?;

        // Evict only once the store confirmed the delete.
        self.cache.remove(key);
        Ok(DeleteResponse::new(affected > 0))
    }
}

/// Cache-aside key/value client over a relational backing store.
///
/// `Get` is served from the in-memory cache when possible; everything else
/// is rendered from the configured query templates and run against the
/// store. With a non-zero refresh interval a background task re-syncs the
/// cache with the store's live key set until [`Client::shutdown`] is called
/// or the client is dropped.
pub struct Client {
    core: Arc<ClientCore>,
    refresher: Option<Refresher>,
}

impl Client {
    /// Builds a client. Spawning the refresh task needs a running tokio
    /// runtime when `config.refresh_interval` is non-zero.
    pub fn new(config: Config, store: Arc<dyn BackingStore>) -> Result<Self> {
        let interval = config.refresh_interval;
        let core = Arc::new(ClientCore::new(config, store)?);

        let refresher = if interval.is_zero() {
            None
        } else {
            Some(Refresher::spawn(core.clone(), interval)?)
        };

        Ok(Self { core, refresher })
    }

    /// Builds the backing store through `factory`, then the client.
    pub fn connect(config: Config, factory: &dyn StoreFactory) -> Result<Self> {
        let store = factory.create_from_config(&config)?;
        Self::new(config, store)
    }

    pub fn config(&self) -> &Config {
        &self.core.config
    }

    /// Lists the live keys in the store. Never reads or writes the cache.
    pub async fn keys(&self) -> Result<Vec<String>> {
        self.core.keys().await
    }

    /// Stores `value` for `key` and makes it the cached value.
    ///
    /// The key must not be empty and the value must not serialize to null.
    pub async fn set<V>(&self, key: &str, value: &V, option: ValueOption) -> Result<()>
    where
        V: Serialize + ?Sized + Sync,
    {
        self.core.set(key, value, option).await
    }

    /// Looks `key` up in the cache, then in the store.
    pub async fn get<V>(&self, key: &str) -> Result<GetResponse<V>>
    where
        V: Serialize + DeserializeOwned + Send + Sync,
    {
        self.core.get(key, None).await
    }

    /// Like [`Client::get`], but synthesizes and persists a value through
    /// `generator` when the store has no row for `key`.
    ///
    /// The generator runs without any lock held, so it may call back into
    /// this client. The response carries the generator's option as returned;
    /// the stored copy gets `create_time` stamped if it was unset. If `key`
    /// was set while the generator ran, that value wins and is returned.
    pub async fn get_with<V, G>(&self, key: &str, generator: &G) -> Result<GetResponse<V>>
    where
        V: Serialize + DeserializeOwned + Send + Sync,
        G: Generator<V>,
    {
        let generator: &dyn Generator<V> = generator;
        self.core.get(key, Some(generator)).await
    }

    /// Soft-deletes `key`. Deleting a missing key is not an error.
    pub async fn del(&self, key: &str) -> Result<DeleteResponse> {
        self.core.del(key).await
    }

    /// Runs one refresh cycle now.
    pub async fn refresh(&self) -> Result<()> {
        refresh::refresh_cycle(&self.core).await
    }

    /// The cached snapshot for `key`, if any.
    pub fn cached(&self, key: &str) -> Option<CacheValue> {
        self.core.cache.get(key)
    }

    pub fn cache_len(&self) -> usize {
        self.core.cache.len()
    }

    /// Stops the refresh task and waits for it to finish.
    pub async fn shutdown(mut self) {
        if let Some(refresher) = self.refresher.take() {
            refresher.stop().await;
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(refresher) = &self.refresher {
            refresher.cancel();
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("driver", &self.core.config.driver)
            .field("cached_keys", &self.core.cache.len())
            .field("refreshing", &self.refresher.is_some())
            .finish()
    }
}
