use std::{
    fmt,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use tracing::info;

use crate::{
    error::StorageError,
    settings_file::{SettingsFile, APP_ENCRYPTION_KEY},
};

pub const KEY_LEN: usize = 32;

/// 256-bit application key used to seal the stored credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey {
    bytes: [u8; KEY_LEN],
}

impl EncryptionKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    /// Text token as written to the settings file.
    pub fn encode(&self) -> String {
        URL_SAFE.encode(self.bytes)
    }

    pub fn decode(token: &str) -> Result<Self, KeyError> {
        let bytes = URL_SAFE
            .decode(token.trim())
            .map_err(|e| KeyError::Decode(e.to_string()))?;

        if bytes.len() != KEY_LEN {
            return Err(KeyError::Decode(format!(
                "expected {KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }

        let mut out = [0u8; KEY_LEN];
        out.copy_from_slice(&bytes);
        Ok(Self { bytes: out })
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("stored key is unreadable: {0}")]
    Decode(String),
}

/// Provides the application key (settings file in production; memory in tests).
#[async_trait]
pub trait KeyProvider: Send + Sync {
    async fn get_or_create(&self) -> Result<EncryptionKey, KeyError>;

    /// The existing key, if any. Never creates one.
    async fn get(&self) -> Result<Option<EncryptionKey>, KeyError>;
}

/// Keeps the key next to the sealed credentials, under `APP_ENCRYPTION_KEY`.
#[derive(Debug, Clone)]
pub struct SettingsKeyProvider {
    settings: SettingsFile,
}

impl SettingsKeyProvider {
    pub fn new(settings: SettingsFile) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl KeyProvider for SettingsKeyProvider {
    async fn get_or_create(&self) -> Result<EncryptionKey, KeyError> {
        get_or_create_key(&self.settings)
    }

    async fn get(&self) -> Result<Option<EncryptionKey>, KeyError> {
        load_key(&self.settings)
    }
}

/// Return the installation key, generating and persisting one on first use.
///
/// The key is durable on disk before it is returned. A present but malformed
/// key is an error and is never replaced, since doing so would orphan the
/// stored credentials without telling anyone.
pub fn get_or_create_key(settings: &SettingsFile) -> Result<EncryptionKey, KeyError> {
    let (token, created) =
        settings.get_or_insert_with(APP_ENCRYPTION_KEY, || EncryptionKey::generate().encode())?;
    if created {
        info!(path = %settings.path().display(), "generated application encryption key");
    }
    EncryptionKey::decode(&token)
}

/// Read the installation key without creating one; `None` means the
/// application has not been configured yet.
pub fn load_key(settings: &SettingsFile) -> Result<Option<EncryptionKey>, KeyError> {
    settings
        .get(APP_ENCRYPTION_KEY)?
        .map(|token| EncryptionKey::decode(&token))
        .transpose()
}

/// In-memory key provider for tests and ephemeral sessions.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyProvider {
    inner: Arc<Mutex<Option<EncryptionKey>>>,
}

impl InMemoryKeyProvider {
    pub fn with_key(key: EncryptionKey) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(key))),
        }
    }
}

#[async_trait]
impl KeyProvider for InMemoryKeyProvider {
    async fn get_or_create(&self) -> Result<EncryptionKey, KeyError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|err| StorageError::Lock(err.to_string()))?;

        if let Some(existing) = guard.clone() {
            return Ok(existing);
        }

        let key = EncryptionKey::generate();
        *guard = Some(key.clone());
        Ok(key)
    }

    async fn get(&self) -> Result<Option<EncryptionKey>, KeyError> {
        let guard = self
            .inner
            .lock()
            .map_err(|err| StorageError::Lock(err.to_string()))?;
        Ok(guard.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[tokio::test]
    async fn memory_provider_returns_same_key() {
        let provider = InMemoryKeyProvider::default();
        let first = provider.get_or_create().await.unwrap();
        let second = provider.get_or_create().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn get_never_creates_a_key() {
        let memory = InMemoryKeyProvider::default();
        assert!(memory.get().await.expect("get").is_none());
        let key = memory.get_or_create().await.expect("create");
        assert_eq!(memory.get().await.expect("get"), Some(key));

        let dir = tempfile::tempdir().expect("tempdir");
        let settings = SettingsFile::new(dir.path().join(".env"));
        settings.ensure_exists().expect("ensure");
        let provider = SettingsKeyProvider::new(settings.clone());
        assert!(provider.get().await.expect("get").is_none());
        assert_eq!(settings.get(APP_ENCRYPTION_KEY).expect("read"), None);

        let created = get_or_create_key(&settings).expect("create");
        assert_eq!(provider.get().await.expect("get"), Some(created));
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let err = EncryptionKey::decode("abcd").expect_err("should reject wrong length");
        assert!(matches!(err, KeyError::Decode(_)));
    }

    #[test]
    fn creates_key_once_and_persists_it() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(".env");
        let settings = SettingsFile::new(&path);

        let first = get_or_create_key(&settings).expect("create");
        let written = fs::read_to_string(&path).expect("read settings");
        assert_eq!(first.as_bytes().len(), KEY_LEN);
        assert!(written.contains(&format!("{APP_ENCRYPTION_KEY}={}", first.encode())));

        let second = get_or_create_key(&settings).expect("reuse");
        assert_eq!(first, second);
        assert_eq!(
            fs::read_to_string(&path).expect("read settings"),
            written,
            "second call must not rewrite the file"
        );

        // A fresh handle (new process) reads the same key back.
        let reopened = get_or_create_key(&SettingsFile::new(&path)).expect("reopen");
        assert_eq!(first, reopened);
    }

    #[test]
    fn malformed_key_is_reported_not_replaced() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = SettingsFile::new(dir.path().join(".env"));
        settings.set(APP_ENCRYPTION_KEY, "not-a-key").expect("seed");

        let err = get_or_create_key(&settings).expect_err("malformed key");
        assert!(matches!(err, KeyError::Decode(_)));
        assert_eq!(
            settings.get(APP_ENCRYPTION_KEY).expect("get").as_deref(),
            Some("not-a-key")
        );
    }

    #[test]
    fn debug_hides_key_bytes() {
        let key = EncryptionKey::from_bytes([7u8; KEY_LEN]);
        assert_eq!(format!("{key:?}"), "EncryptionKey(<redacted>)");
    }
}
