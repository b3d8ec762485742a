use std::{path::PathBuf, sync::Arc};

use color_eyre::Result;
use dirs::data_dir;
use ilib_core::{credentials::CredentialsRecord, remote::RemoteConnector};
use ilib_remote::BridgeConnector;
use ilib_storage::{
    cache_file::JsonFileCache,
    key_store::{KeyProvider, SettingsKeyProvider},
    settings_file::SettingsFile,
    vault::CredentialVault,
};
use ilib_sync::ConnectivityProbe;
use tracing::debug;

use crate::config::{Config, RemoteKind};

const SETTINGS_FILE: &str = "settings.env";
const CACHE_FILE: &str = "cache.json";

/// Resolve the default data directory for iLibrary.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("ilibrary"))
}

/// Local state: the settings file (key + sealed credentials) and the cache.
#[derive(Debug, Clone)]
pub struct Stores {
    pub settings: SettingsFile,
    pub cache: JsonFileCache,
}

impl Stores {
    /// Build from config overrides, creating the settings file (mode 0600)
    /// if it is missing.
    pub fn from_config(config: &Config) -> Result<Self> {
        let root = match &config.data_dir {
            Some(root) => root.clone(),
            None => default_data_dir()?,
        };
        let settings_path = config
            .settings_path
            .clone()
            .unwrap_or_else(|| root.join(SETTINGS_FILE));
        let cache_path = config
            .cache_path
            .clone()
            .unwrap_or_else(|| root.join(CACHE_FILE));
        debug!(settings = ?settings_path, cache = ?cache_path, "initializing local stores");

        let stores = Self {
            settings: SettingsFile::new(settings_path),
            cache: JsonFileCache::new(cache_path),
        };
        stores.settings.ensure_exists()?;
        Ok(stores)
    }

    pub fn vault(&self) -> CredentialVault {
        CredentialVault::new(self.settings.clone())
    }

    pub fn keys(&self) -> Arc<dyn KeyProvider> {
        Arc::new(SettingsKeyProvider::new(self.settings.clone()))
    }

    /// Stored credentials, or `None` when unconfigured or unreadable.
    /// Never creates the encryption key.
    pub async fn credentials(&self) -> Result<Option<CredentialsRecord>> {
        Ok(match self.keys().get().await? {
            Some(key) => self.vault().load_and_decrypt(&key),
            None => None,
        })
    }
}

/// The connector selected by `[remote] kind`.
pub fn connector(config: &Config) -> Result<Arc<dyn RemoteConnector>> {
    match config.remote_kind() {
        RemoteKind::Bridge => {
            let connector = BridgeConnector::new(config.bridge_settings()?)
                .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
            Ok(Arc::new(connector))
        }
        RemoteKind::Odbc => odbc_connector(),
    }
}

#[cfg(feature = "odbc")]
fn odbc_connector() -> Result<Arc<dyn RemoteConnector>> {
    Ok(Arc::new(ilib_remote::OdbcConnector::new()))
}

#[cfg(not(feature = "odbc"))]
fn odbc_connector() -> Result<Arc<dyn RemoteConnector>> {
    color_eyre::eyre::bail!(
        "this build has no ODBC support; rebuild with `--features odbc` \
         or set `kind = \"bridge\"` under [remote]"
    )
}

pub fn probe(config: &Config, connector: Arc<dyn RemoteConnector>) -> ConnectivityProbe {
    ConnectivityProbe::new(connector).with_timeout(config.probe_timeout())
}

/// Stores rooted at a temp dir, for tests.
#[cfg(test)]
pub fn test_stores(root: &std::path::Path) -> Stores {
    Stores::from_config(&Config {
        data_dir: Some(root.to_path_buf()),
        ..Config::default()
    })
    .expect("test stores")
}
