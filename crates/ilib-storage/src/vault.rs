use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ilib_core::credentials::CredentialsRecord;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::{
    error::StorageError,
    key_store::EncryptionKey,
    settings_file::{SettingsFile, APP_ENCRYPTION_KEY, ENCRYPTED_DB_CREDENTIALS},
};

const TOKEN_VERSION: u8 = 1;
const NONCE_LEN: usize = 12;

/// Seals the connection settings with AES-256-GCM and keeps the token as a
/// single value in the settings file.
///
/// There is no key rotation: a different key makes an existing token
/// unreadable, and it is then treated exactly like a missing one.
#[derive(Debug, Clone)]
pub struct CredentialVault {
    settings: SettingsFile,
}

/// Why a stored token could not be opened. Only ever logged.
#[derive(Debug, Error)]
enum OpenError {
    #[error("token is not valid base64: {0}")]
    Encoding(String),
    #[error("token is truncated")]
    Truncated,
    #[error("unsupported token version {0}")]
    Version(u8),
    #[error("decrypt failed (key mismatch or corrupted token)")]
    Decrypt,
    #[error("payload is not a credentials record: {0}")]
    Payload(String),
    #[error("stored record is incomplete: {0}")]
    Invalid(String),
}

impl CredentialVault {
    pub fn new(settings: SettingsFile) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SettingsFile {
        &self.settings
    }

    /// Encrypt `record` and replace any previous token. The settings file is
    /// rewritten atomically, so a failed write leaves the old token in place.
    #[instrument(skip_all, fields(host = %record.host))]
    pub fn encrypt_and_store(
        &self,
        key: &EncryptionKey,
        record: &CredentialsRecord,
    ) -> Result<(), StorageError> {
        let token = seal(key, record)?;
        self.settings.set(ENCRYPTED_DB_CREDENTIALS, &token)?;
        debug!("stored encrypted credentials");
        Ok(())
    }

    /// Read and open the stored token.
    ///
    /// `None` covers both "never configured" and "cannot be trusted": wrong
    /// key, tampering, truncation, a malformed payload or an unreadable file
    /// all end up here after a warning.
    #[instrument(skip_all)]
    pub fn load_and_decrypt(&self, key: &EncryptionKey) -> Option<CredentialsRecord> {
        let token = match self.settings.get(ENCRYPTED_DB_CREDENTIALS) {
            Ok(Some(token)) if !token.trim().is_empty() => token,
            Ok(_) => {
                debug!("no stored credentials");
                return None;
            }
            Err(err) => {
                warn!(error = %err, "could not read settings file; treating credentials as absent");
                return None;
            }
        };

        match open(key, &token) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(error = %err, "stored credentials rejected; treating as absent");
                None
            }
        }
    }

    /// Explicit data-clear: drops the sealed credentials and the key.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.settings
            .remove(&[ENCRYPTED_DB_CREDENTIALS, APP_ENCRYPTION_KEY])
    }
}

fn build_cipher(key: &EncryptionKey) -> Result<Aes256Gcm, StorageError> {
    Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| StorageError::Encrypt(format!("cipher init failed: {e}")))
}

/// `base64url(version || nonce || ciphertext+tag)`.
fn seal(key: &EncryptionKey, record: &CredentialsRecord) -> Result<String, StorageError> {
    let plaintext =
        serde_json::to_vec(record).map_err(|e| StorageError::Serialize(e.to_string()))?;
    let cipher = build_cipher(key)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_ref())
        .map_err(|e| StorageError::Encrypt(e.to_string()))?;

    let mut raw = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
    raw.push(TOKEN_VERSION);
    raw.extend_from_slice(nonce.as_slice());
    raw.extend_from_slice(&ciphertext);
    Ok(URL_SAFE_NO_PAD.encode(raw))
}

fn open(key: &EncryptionKey, token: &str) -> Result<CredentialsRecord, OpenError> {
    let raw = URL_SAFE_NO_PAD
        .decode(token.trim())
        .map_err(|e| OpenError::Encoding(e.to_string()))?;
    let (&version, rest) = raw.split_first().ok_or(OpenError::Truncated)?;
    if version != TOKEN_VERSION {
        return Err(OpenError::Version(version));
    }
    if rest.len() <= NONCE_LEN {
        return Err(OpenError::Truncated);
    }
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| OpenError::Decrypt)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| OpenError::Decrypt)?;

    let record: CredentialsRecord =
        serde_json::from_slice(&plaintext).map_err(|e| OpenError::Payload(e.to_string()))?;
    record
        .validate()
        .map_err(|e| OpenError::Invalid(e.to_string()))?;
    Ok(record)
}
