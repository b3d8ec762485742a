use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use color_eyre::Result;
use dirs::config_dir;
use ilib_remote::BridgeSettings;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;
pub const MIN_SYNC_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 2;

/// User-level configuration loaded from `~/.config/ilibrary/config.toml` (platform-specific).
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Root for the settings file and the cache.
    pub data_dir: Option<PathBuf>,
    /// Explicit settings file location (overrides `data_dir`).
    pub settings_path: Option<PathBuf>,
    /// Explicit cache file location (overrides `data_dir`).
    pub cache_path: Option<PathBuf>,
    pub sync_interval_secs: Option<u64>,
    pub probe_timeout_secs: Option<u64>,
    pub remote: Option<RemoteConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct RemoteConfig {
    /// How the host is reached; defaults to ODBC when this build has it.
    pub kind: Option<RemoteKind>,
    /// Bridge only: `https` (default) or `http`.
    pub scheme: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RemoteKind {
    /// IBM i Access ODBC driver, opened in-process.
    Odbc,
    /// The iLibrary bridge service over HTTP(S).
    Bridge,
}

impl RemoteKind {
    pub fn build_default() -> Self {
        if cfg!(feature = "odbc") {
            RemoteKind::Odbc
        } else {
            RemoteKind::Bridge
        }
    }
}

impl Config {
    /// What `config init` writes: every tunable spelled out.
    pub fn starter() -> Self {
        let bridge = BridgeSettings::default();
        Self {
            sync_interval_secs: Some(DEFAULT_SYNC_INTERVAL_SECS),
            probe_timeout_secs: Some(DEFAULT_PROBE_TIMEOUT_SECS),
            remote: Some(RemoteConfig {
                kind: Some(RemoteKind::build_default()),
                scheme: Some(bridge.scheme),
                request_timeout_secs: Some(bridge.request_timeout.as_secs()),
            }),
            ..Self::default()
        }
    }

    /// Sync period, clamped to 10..=60 seconds.
    pub fn sync_interval(&self) -> Duration {
        let secs = self
            .sync_interval_secs
            .unwrap_or(DEFAULT_SYNC_INTERVAL_SECS)
            .clamp(MIN_SYNC_INTERVAL_SECS, DEFAULT_SYNC_INTERVAL_SECS);
        Duration::from_secs(secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        let secs = self
            .probe_timeout_secs
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_PROBE_TIMEOUT_SECS);
        Duration::from_secs(secs)
    }

    pub fn remote_kind(&self) -> RemoteKind {
        self.remote
            .as_ref()
            .and_then(|remote| remote.kind)
            .unwrap_or_else(RemoteKind::build_default)
    }

    pub fn bridge_settings(&self) -> Result<BridgeSettings> {
        let mut settings = BridgeSettings::default();
        let Some(remote) = &self.remote else {
            return Ok(settings);
        };
        if let Some(scheme) = &remote.scheme {
            let scheme = scheme.trim().to_ascii_lowercase();
            if scheme != "https" && scheme != "http" {
                color_eyre::eyre::bail!("unsupported remote scheme `{scheme}` (use https or http)");
            }
            settings.scheme = scheme;
        }
        if let Some(secs) = remote.request_timeout_secs.filter(|s| *s > 0) {
            settings.request_timeout = Duration::from_secs(secs);
        }
        Ok(settings)
    }
}

/// Load config from the default path; if missing, return defaults.
pub fn load() -> Result<Config> {
    let path = default_path()?;
    load_from_path(path)
}

/// Load config from a given path; if missing or empty, return defaults.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = toml::from_str(&contents)?;
    Ok(cfg)
}

/// Resolve the default config path (platform aware).
pub fn default_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| color_eyre::eyre::eyre!("no config dir available"))?;
    Ok(base.join("ilibrary").join("config.toml"))
}

/// Write the given config to the default path unless a file is already there.
pub fn write_default_if_missing(config: &Config) -> Result<PathBuf> {
    let path = default_path()?;
    write_to_path_if_missing(config, &path)?;
    Ok(path)
}

fn write_to_path_if_missing(config: &Config, path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(config)?;
    fs::write(path, body)?;
    Ok(true)
}
