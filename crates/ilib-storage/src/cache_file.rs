use std::{
    collections::BTreeMap,
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use ilib_core::cache::{CacheError, CacheStore};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{instrument, warn};

/// Flat JSON object on disk, one member per cache key.
#[derive(Debug, Clone)]
pub struct JsonFileCache {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl JsonFileCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<BTreeMap<String, Value>, CacheError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => return Err(cache_err(err)),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(BTreeMap::new());
        }
        match serde_json::from_slice(&bytes) {
            Ok(map) => Ok(map),
            Err(err) => {
                // The cache is rebuildable, so a damaged file starts over.
                warn!(path = %self.path.display(), error = %err, "discarding unreadable cache file");
                Ok(BTreeMap::new())
            }
        }
    }

    fn write_map(&self, map: &BTreeMap<String, Value>) -> Result<(), CacheError> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(cache_err)?;

        let mut tmp = NamedTempFile::new_in(parent).map_err(cache_err)?;
        let json = serde_json::to_vec_pretty(map).map_err(cache_err)?;
        tmp.write_all(&json).map_err(cache_err)?;
        tmp.flush().map_err(cache_err)?;
        tmp.persist(&self.path).map_err(|e| cache_err(e.error))?;
        Ok(())
    }

    fn modify<F>(&self, f: F) -> Result<(), CacheError>
    where
        F: FnOnce(&mut BTreeMap<String, Value>) -> bool,
    {
        let _guard = self.lock.lock().map_err(|err| CacheError::Storage {
            reason: format!("lock poisoned: {err}"),
        })?;
        let mut map = self.read_map()?;
        if f(&mut map) {
            self.write_map(&map)?;
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for JsonFileCache {
    #[instrument(skip_all, fields(key))]
    async fn put(&self, key: &str, value: Value) -> Result<(), CacheError> {
        self.modify(|map| {
            map.insert(key.to_string(), value);
            true
        })
    }

    #[instrument(skip_all, fields(key))]
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let _guard = self.lock.lock().map_err(|err| CacheError::Storage {
            reason: format!("lock poisoned: {err}"),
        })?;
        Ok(self.read_map()?.remove(key))
    }

    #[instrument(skip_all, fields(key))]
    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.modify(|map| map.remove(key).is_some())
    }
}

fn cache_err<E: ToString>(err: E) -> CacheError {
    CacheError::Storage {
        reason: err.to_string(),
    }
}
