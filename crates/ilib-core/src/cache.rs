use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Well-known cache keys shared with UI collaborators.
pub mod keys {
    pub const ALL_LIBRARIES: &str = "all_libraries";
    pub const LIBRARY_NAMES: &str = "library_names";
    pub const ALL_USERS: &str = "all_users";
    pub const USER_NAMES: &str = "user_names";
    pub const DOWNLOAD_PATH: &str = "download_path";
    pub const THEME_MODE: &str = "theme_mode";
    pub const SERVER: &str = "server";
}

/// Errors produced by cache implementations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    /// Underlying storage failure.
    #[error("cache failure: {reason}")]
    Storage { reason: String },
}

/// Key-value cache of JSON values consumed by UI collaborators.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Persist a value under a key, overwriting any existing entry.
    async fn put(&self, key: &str, value: Value) -> Result<(), CacheError>;

    /// Retrieve the value for a key; `None` when never written.
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    /// Remove a key and its value (idempotent).
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// In-memory cache for tests and ephemeral sessions.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCache {
    inner: Arc<Mutex<BTreeMap<String, Value>>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn put(&self, key: &str, value: Value) -> Result<(), CacheError> {
        let mut map = self.inner.lock().map_err(|err| CacheError::Storage {
            reason: format!("lock poisoned: {err}"),
        })?;
        map.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let map = self.inner.lock().map_err(|err| CacheError::Storage {
            reason: format!("lock poisoned: {err}"),
        })?;
        Ok(map.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut map = self.inner.lock().map_err(|err| CacheError::Storage {
            reason: format!("lock poisoned: {err}"),
        })?;
        map.remove(key);
        Ok(())
    }
}
