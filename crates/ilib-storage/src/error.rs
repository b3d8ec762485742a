use std::path::PathBuf;

use thiserror::Error;

/// Fatal failures while touching the settings or cache files.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("encrypt failed: {0}")]
    Encrypt(String),
    #[error("serialization failed: {0}")]
    Serialize(String),
    #[error("lock poisoned: {0}")]
    Lock(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}
