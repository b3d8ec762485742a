//! Concrete storage implementations: the dotenv settings file holding the
//! application key and the AES-GCM sealed credentials, plus the JSON file cache.

pub mod cache_file;
pub mod error;
pub mod key_store;
pub mod settings_file;
pub mod vault;

pub use error::StorageError;
