//! Scripted in-memory backing store for unit tests.
//!
//! Understands four tab-separated commands instead of SQL:
//! `keys`, `get <k>`, `set <k> <v> <option> <time>` (upsert) and
//! `del <k> <time>` (soft delete).

use crate::domain::Row;
use crate::ports::BackingStore;
use async_trait::async_trait;
use shared::config::Config;
use shared::{Error, Result};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub(crate) fn scripted_config() -> Config {
    Config::new("scripted", "memory")
        .with_keys_sql("keys")
        .with_get_sql("get\t{{ Key }}")
        .with_set_sql("set\t{{ Key }}\t{{ Value }}\t{{ Option }}\t{{ Time }}")
        .with_delete_sql("del\t{{ Key }}\t{{ Time }}")
}

#[derive(Debug, Clone)]
struct StoredRow {
    key: String,
    value: String,
    option: String,
    active: bool,
}

#[derive(Debug, Default)]
pub(crate) struct ScriptedStore {
    rows: Mutex<Vec<StoredRow>>,
    failure: Mutex<Option<(usize, String)>>,
    queries: AtomicUsize,
    executes: AtomicUsize,
}

impl ScriptedStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub(crate) fn execute_count(&self) -> usize {
        self.executes.load(Ordering::SeqCst)
    }

    /// Fails the next store call with `msg`.
    pub(crate) fn fail_next(&self, msg: &str) {
        self.fail_after(0, msg);
    }

    /// Lets `calls` store calls through, then fails the one after.
    pub(crate) fn fail_after(&self, calls: usize, msg: &str) {
        *self.failure.lock().unwrap() = Some((calls, msg.to_string()));
    }

    /// Appends a live row, even if the key already has one.
    pub(crate) fn insert_row(&self, key: &str, value: &str, option: &str) {
        self.rows.lock().unwrap().push(StoredRow {
            key: key.to_string(),
            value: value.to_string(),
            option: option.to_string(),
            active: true,
        });
    }

    pub(crate) fn deactivate(&self, key: &str) {
        for row in self.rows.lock().unwrap().iter_mut() {
            if row.key == key {
                row.active = false;
            }
        }
    }

    pub(crate) fn update_value(&self, key: &str, value: &str) {
        for row in self.rows.lock().unwrap().iter_mut() {
            if row.key == key && row.active {
                row.value = value.to_string();
            }
        }
    }

    pub(crate) fn live_value(&self, key: &str) -> Option<String> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|row| row.key == key && row.active)
            .map(|row| row.value.clone())
    }

    fn check_failure(&self) -> Result<()> {
        let mut failure = self.failure.lock().unwrap();
        match failure.take() {
            Some((0, msg)) => Err(Error::BackingStore(msg)),
            Some((calls, msg)) => {
                *failure = Some((calls - 1, msg));
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BackingStore for ScriptedStore {
    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;

        let rows = self.rows.lock().unwrap();
        let parts: Vec<&str> = sql.split('\t').collect();
        match parts.as_slice() {
            ["keys"] => {
                let mut keys: Vec<String> = Vec::new();
                for row in rows.iter().filter(|row| row.active) {
                    if !keys.contains(&row.key) {
                        keys.push(row.key.clone());
                    }
                }
                Ok(keys.into_iter().map(|key| vec![key]).collect())
            }
            ["get", key] => Ok(rows
                .iter()
                .filter(|row| row.active && row.key == *key)
                .map(|row| vec![row.value.clone(), row.option.clone()])
                .collect()),
            _ => Err(Error::BackingStore(format!("unknown query: {}", sql))),
        }
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        self.executes.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;

        let mut rows = self.rows.lock().unwrap();
        let parts: Vec<&str> = sql.split('\t').collect();
        match parts.as_slice() {
            ["set", key, value, option, _time] => {
                let mut affected = 0;
                for row in rows.iter_mut().filter(|row| row.active && row.key == *key) {
                    row.value = value.to_string();
                    row.option = option.to_string();
                    affected += 1;
                }
                if affected == 0 {
                    rows.push(StoredRow {
                        key: key.to_string(),
                        value: value.to_string(),
                        option: option.to_string(),
                        active: true,
                    });
                    affected = 1;
                }
                Ok(affected)
            }
            ["del", key, _time] => {
                let mut affected = 0;
                for row in rows.iter_mut().filter(|row| row.active && row.key == *key) {
                    row.active = false;
                    affected += 1;
                }
                Ok(affected)
            }
            _ => Err(Error::BackingStore(format!("unknown statement: {}", sql))),
        }
    }
}
