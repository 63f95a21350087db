use async_trait::async_trait;
use rusqlite::Connection;
use rusqlite::types::ValueRef;
use shared::config::ConnectionMode;
use shared::{Error, Result, merge_release};
use sqlkv::{BackingStore, Row};
use std::fmt::Debug;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Upper bound on every store call, reads and writes alike.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(15);

const MEMORY_PATH: &str = ":memory:";

const QUEUED: u8 = 0;
const RUNNING: u8 = 1;
const CANCELLED: u8 = 2;

/// Hand-off between a blocking store task and the caller waiting on it.
#[derive(Debug, Default)]
struct CallState(AtomicU8);

impl CallState {
    /// Claims the call for running. False once the caller has given up.
    fn start(&self) -> bool {
        self.0
            .compare_exchange(QUEUED, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Gives up on the call. True if it had not started, so it never will.
    fn cancel(&self) -> bool {
        self.0
            .compare_exchange(QUEUED, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

fn cancelled_error() -> Error {
    Error::BackingStore("query cancelled before it started".to_string())
}

enum Connections {
    PerCall,
    Shared {
        conn: Arc<Mutex<Connection>>,
        interrupt: Arc<rusqlite::InterruptHandle>,
    },
}

/// SQLite-backed store. Statements run on the blocking pool.
pub struct SqliteStore {
    path: String,
    connections: Connections,
    timeout: Duration,
}

impl SqliteStore {
    /// Prepares a store for the database at `path`.
    ///
    /// In `PerCall` mode nothing is opened until the first call; an in-memory
    /// database is rejected there because every call would see a fresh one.
    pub fn open(path: impl Into<String>, mode: ConnectionMode) -> Result<Self> {
        let path = path.into();
        let is_memory = path == MEMORY_PATH;

        if !is_memory {
            if let Some(parent) = Path::new(&path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        Error::BackingStore(format!("Failed to create directory: {}", e))
                    })?;
                }
            }
        }

        let connections = match mode {
            ConnectionMode::PerCall if is_memory => {
                return Err(Error::Config(
                    "an in-memory database needs the shared connection mode".to_string(),
                ));
            }
            ConnectionMode::PerCall => Connections::PerCall,
            ConnectionMode::Shared => {
                let conn = open_connection(&path).map_err(store_error)?;
                let interrupt = Arc::new(conn.get_interrupt_handle());
                Connections::Shared {
                    conn: Arc::new(Mutex::new(conn)),
                    interrupt,
                }
            }
        };

        Ok(Self {
            path,
            connections,
            timeout: QUERY_TIMEOUT,
        })
    }

    /// Overrides [`QUERY_TIMEOUT`] for this store.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runs a batch of statements, for schema setup.
    pub async fn execute_batch(&self, sql: &str) -> Result<()> {
        self.run(sql, |conn, sql| conn.execute_batch(sql)).await
    }

    async fn run<T, F>(&self, sql: &str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &str) -> rusqlite::Result<T> + Send + 'static,
    {
        let sql = sql.to_string();
        let state = Arc::new(CallState::default());

        match &self.connections {
            Connections::PerCall => {
                let path = self.path.clone();
                let (handle_tx, mut handle_rx) = oneshot::channel();
                let task_state = Arc::clone(&state);

                let task = tokio::task::spawn_blocking(move || {
                    let conn = open_connection(&path).map_err(store_error)?;
                    // The handle goes out before the call can start, so a
                    // timeout after `start` always finds it.
                    let _ = handle_tx.send(conn.get_interrupt_handle());

                    let result = if task_state.start() {
                        op(&conn, &sql).map_err(store_error)
                    } else {
                        Err(cancelled_error())
                    };
                    let release = conn.close().map_err(|(_, e)| e.to_string());
                    if let Err(e) = &release {
                        warn!("failed to close sqlite connection: {}", e);
                    }
                    merge_release(result, release)
                });

                await_bounded(task, self.timeout, move || {
                    if !state.cancel() {
                        if let Ok(handle) = handle_rx.try_recv() {
                            handle.interrupt();
                        }
                    }
                })
                .await
            }
            Connections::Shared { conn, interrupt } => {
                let conn = Arc::clone(conn);
                let interrupt = Arc::clone(interrupt);
                let task_state = Arc::clone(&state);

                let task = tokio::task::spawn_blocking(move || {
                    let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
                    if !task_state.start() {
                        return Err(cancelled_error());
                    }
                    op(&conn, &sql).map_err(store_error)
                });

                await_bounded(task, self.timeout, move || {
                    if !state.cancel() {
                        interrupt.interrupt();
                    }
                })
                .await
            }
        }
    }
}

/// Waits for a blocking store task under `timeout`. On timeout a call that
/// has not started is cancelled and a running one is interrupted; the task
/// still releases its connection.
async fn await_bounded<T>(
    task: JoinHandle<Result<T>>,
    timeout: Duration,
    on_timeout: impl FnOnce(),
) -> Result<T> {
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(Error::BackingStore(format!("store task failed: {}", e))),
        Err(_) => {
            on_timeout();
            Err(Error::BackingStore(format!(
                "query timed out after {:?}",
                timeout
            )))
        }
    }
}

fn open_connection(path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(QUERY_TIMEOUT)?;
    Ok(conn)
}

fn store_error(err: rusqlite::Error) -> Error {
    Error::BackingStore(err.to_string())
}

/// Renders any cell as text. Text and blob cells must be valid UTF-8.
fn cell_text(value: ValueRef<'_>) -> rusqlite::Result<String> {
    match value {
        ValueRef::Null => Ok(String::new()),
        ValueRef::Integer(i) => Ok(i.to_string()),
        ValueRef::Real(f) => Ok(f.to_string()),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(rusqlite::Error::Utf8Error),
    }
}

fn scan_rows(conn: &Connection, sql: &str) -> rusqlite::Result<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    let columns = stmt.column_count();
    let rows = stmt.query_map([], |row| {
        (0..columns)
            .map(|i| row.get_ref(i).and_then(cell_text))
            .collect::<rusqlite::Result<Row>>()
    })?;
    rows.collect()
}

#[async_trait]
impl BackingStore for SqliteStore {
    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        let rows = self.run(sql, scan_rows).await?;
        debug!("sqlite query returned {} row(s)", rows.len());
        Ok(rows)
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        self.run(sql, |conn, sql| conn.execute(sql, []).map(|n| n as u64))
            .await
    }
}

impl Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self.connections {
            Connections::PerCall => "per-call",
            Connections::Shared { .. } => "shared",
        };
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .field("connections", &mode)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = "create table t (k text not null, v text, n integer, r real)";

    #[tokio::test]
    async fn test_shared_memory_store_round_trip() {
        let store = SqliteStore::open(":memory:", ConnectionMode::Shared).unwrap();
        store.execute_batch(SCHEMA).await.unwrap();

        let affected = store
            .execute("insert into t (k, v, n, r) values ('a', null, 7, 1.5)")
            .await
            .unwrap();
        assert_eq!(affected, 1);

        let rows = store.query("select k, v, n, r from t").await.unwrap();
        assert_eq!(
            rows,
            vec![vec![
                "a".to_string(),
                String::new(),
                "7".to_string(),
                "1.5".to_string()
            ]]
        );
    }

    #[tokio::test]
    async fn test_per_call_store_sees_committed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("kv.db");
        let store = SqliteStore::open(path.to_string_lossy(), ConnectionMode::PerCall).unwrap();
        assert!(path.parent().unwrap().exists());

        store.execute_batch(SCHEMA).await.unwrap();
        store
            .execute("insert into t (k, v) values ('a', 'x'), ('b', 'y')")
            .await
            .unwrap();

        let affected = store.execute("update t set v = 'z'").await.unwrap();
        assert_eq!(affected, 2);

        let rows = store.query("select v from t order by k").await.unwrap();
        assert_eq!(rows, vec![vec!["z".to_string()], vec!["z".to_string()]]);
    }

    #[tokio::test]
    async fn test_update_matching_nothing_affects_zero_rows() {
        let store = SqliteStore::open(":memory:", ConnectionMode::Shared).unwrap();
        store.execute_batch(SCHEMA).await.unwrap();

        let affected = store.execute("update t set v = 'z' where k = 'nope'").await.unwrap();
        assert_eq!(affected, 0);
    }

    #[tokio::test]
    async fn test_bad_sql_is_a_store_error() {
        let store = SqliteStore::open(":memory:", ConnectionMode::Shared).unwrap();

        let err = store.query("select * from missing").await.unwrap_err();
        assert!(matches!(err, Error::BackingStore(msg) if msg.contains("missing")));
    }

    #[test]
    fn test_per_call_memory_rejected() {
        assert!(matches!(
            SqliteStore::open(":memory:", ConnectionMode::PerCall),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_cell_text() {
        assert_eq!(cell_text(ValueRef::Null).unwrap(), "");
        assert_eq!(cell_text(ValueRef::Integer(-3)).unwrap(), "-3");
        assert_eq!(cell_text(ValueRef::Text(b"hi")).unwrap(), "hi");
        assert_eq!(cell_text(ValueRef::Blob(b"raw")).unwrap(), "raw");
        assert!(cell_text(ValueRef::Blob(&[0xff, 0xfe])).is_err());
    }

    #[tokio::test]
    async fn test_non_utf8_blob_is_a_store_error() {
        let store = SqliteStore::open(":memory:", ConnectionMode::Shared).unwrap();
        store.execute_batch(SCHEMA).await.unwrap();
        store
            .execute("insert into t (k, v) values ('a', X'FFFE')")
            .await
            .unwrap();

        let err = store.query("select v from t").await.unwrap_err();
        assert!(matches!(err, Error::BackingStore(_)));
    }

    #[tokio::test]
    async fn test_call_still_queued_at_timeout_never_runs() {
        let store = SqliteStore::open(":memory:", ConnectionMode::Shared)
            .unwrap()
            .with_timeout(Duration::from_millis(50));
        store.execute_batch(SCHEMA).await.unwrap();

        let Connections::Shared { conn, .. } = &store.connections else {
            panic!("expected a shared connection");
        };
        let held = conn.lock().unwrap();

        let err = store
            .execute("insert into t (k) values ('late')")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BackingStore(ref msg) if msg.contains("timed out")));
        drop(held);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let rows = store.query("select k from t").await.unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_call_state_hand_off() {
        let state = CallState::default();
        assert!(state.start());
        assert!(!state.cancel());

        let state = CallState::default();
        assert!(state.cancel());
        assert!(!state.start());
    }
}
