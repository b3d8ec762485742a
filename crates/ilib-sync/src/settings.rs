//! Saving and loading the connection settings.

use std::sync::Arc;

use ilib_core::credentials::{CredentialsError, CredentialsRecord};
use ilib_storage::{
    key_store::{KeyError, KeyProvider},
    vault::CredentialVault,
    StorageError,
};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::{probe::ConnectivityProbe, scheduler::SyncWaker};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error(transparent)]
    Invalid(#[from] CredentialsError),
    #[error("encryption key unavailable: {0}")]
    Key(#[from] KeyError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Probed, sealed and stored. A sync was requested.
    Saved,
    /// The host could not be reached with these settings; nothing was written.
    ConnectionFailed,
}

pub struct SettingsService {
    probe: ConnectivityProbe,
    vault: CredentialVault,
    keys: Arc<dyn KeyProvider>,
    waker: Option<SyncWaker>,
}

impl SettingsService {
    pub fn new(probe: ConnectivityProbe, vault: CredentialVault, keys: Arc<dyn KeyProvider>) -> Self {
        Self {
            probe,
            vault,
            keys,
            waker: None,
        }
    }

    /// Ask a running sync loop to pick up new settings immediately.
    pub fn with_waker(mut self, waker: SyncWaker) -> Self {
        self.waker = Some(waker);
        self
    }

    /// Validate, probe, then persist. Settings that fail the probe never reach
    /// disk, so whatever was stored before stays in effect.
    #[instrument(skip_all, fields(host = %record.host, port = record.port))]
    pub async fn save(&self, record: &CredentialsRecord) -> Result<SaveOutcome, SettingsError> {
        record.validate()?;

        if !self.probe.can_connect(record).await {
            warn!("connection check failed; settings not saved");
            return Ok(SaveOutcome::ConnectionFailed);
        }

        let key = self.keys.get_or_create().await?;
        self.vault.encrypt_and_store(&key, record)?;
        info!("connection settings saved");

        if let Some(waker) = &self.waker {
            waker.sync_now();
        }
        Ok(SaveOutcome::Saved)
    }

    /// The stored settings, if any can be opened with the current key.
    ///
    /// Reading never creates a key: without one there is nothing to open.
    pub async fn load_current(&self) -> Result<Option<CredentialsRecord>, SettingsError> {
        Ok(match self.keys.get().await? {
            Some(key) => self.vault.load_and_decrypt(&key),
            None => None,
        })
    }

    /// Forget the stored settings and the key that sealed them.
    pub fn clear(&self) -> Result<(), SettingsError> {
        self.vault.clear()?;
        info!("connection settings cleared");
        Ok(())
    }
}
