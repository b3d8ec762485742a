use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::credentials::CredentialsRecord;

/// Longest name the host accepts for libraries, save files and user profiles.
pub const MAX_OBJECT_NAME_LEN: usize = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ObjectNameError {
    #[error("object name must not be empty")]
    Empty,
    #[error("object name {name} is longer than {MAX_OBJECT_NAME_LEN} characters")]
    TooLong { name: String },
    #[error("object name {name} contains {found:?}")]
    InvalidChar { name: String, found: char },
}

/// Checks a host object name and returns it trimmed and uppercased.
///
/// Names start with a letter or one of `$ # @`; later characters may also be
/// digits or `_`. Anything else (path separators, quotes, blanks) is refused,
/// so a valid name is safe to use as a file name or inside a CL command.
pub fn object_name(raw: &str) -> Result<String, ObjectNameError> {
    let name = raw.trim().to_ascii_uppercase();
    let mut chars = name.chars();
    let first = chars.next().ok_or(ObjectNameError::Empty)?;
    if name.chars().count() > MAX_OBJECT_NAME_LEN {
        return Err(ObjectNameError::TooLong { name });
    }
    let special = |c: char| matches!(c, '$' | '#' | '@');
    if !(first.is_ascii_uppercase() || special(first)) {
        return Err(ObjectNameError::InvalidChar { name, found: first });
    }
    let allowed = |c: char| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_' || special(c);
    if let Some(found) = chars.find(|&c| !allowed(c)) {
        return Err(ObjectNameError::InvalidChar { name, found });
    }
    Ok(name)
}

/// Parameters for saving a library into a save file and downloading it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveFileRequest {
    pub library: String,
    pub save_file: String,
    pub description: String,
    /// Target release (`*CURRENT`, `V7R4M0`, ...).
    pub target_release: String,
    /// Public authority for the created save file (`*EXCLUDE`, `*ALL`, ...).
    pub authority: String,
    /// Local directory the downloaded archive is written into.
    pub download_dir: PathBuf,
}

impl SaveFileRequest {
    /// Defaults used when only the library is known.
    pub fn for_library(library: impl Into<String>, download_dir: impl Into<PathBuf>) -> Self {
        let library = library.into();
        Self {
            save_file: library.clone(),
            library,
            description: "Saved by iLibrary".to_string(),
            target_release: "*CURRENT".to_string(),
            authority: "*EXCLUDE".to_string(),
            download_dir: download_dir.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveFileOutcome {
    pub path: PathBuf,
    pub bytes: u64,
}

/// Result of a break message sent to a user profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Delivered,
    Rejected(String),
}

/// An open, authenticated session against the remote host.
///
/// Listings are returned untyped; turning them into records is the caller's job.
#[async_trait]
pub trait RemoteHost: Send + Sync {
    async fn list_libraries(&self) -> Result<Vec<Value>>;

    async fn list_users(&self) -> Result<Vec<Value>>;

    /// One library row, or `None` when the host has no such library.
    async fn library_info(&self, name: &str) -> Result<Option<Value>>;

    /// One user profile row, or `None` when the profile does not exist.
    async fn user_info(&self, name: &str) -> Result<Option<Value>>;

    async fn create_save_file(&self, request: &SaveFileRequest) -> Result<SaveFileOutcome>;

    async fn send_message(&self, username: &str, text: &str) -> Result<MessageOutcome>;
}

/// Opens sessions. `connect` performs the protocol-level handshake, so a
/// successful return means the credentials were accepted.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    /// Short name used for logging.
    fn name(&self) -> &'static str;

    async fn connect(&self, credentials: &CredentialsRecord) -> Result<Arc<dyn RemoteHost>>;
}

/// Canned host used by tests and offline smoke runs.
#[derive(Debug, Clone, Default)]
pub struct StaticHost {
    pub libraries: Vec<Value>,
    pub users: Vec<Value>,
    pub fail_libraries: bool,
    pub fail_users: bool,
}

#[async_trait]
impl RemoteHost for StaticHost {
    async fn list_libraries(&self) -> Result<Vec<Value>> {
        if self.fail_libraries {
            bail!("library listing unavailable");
        }
        Ok(self.libraries.clone())
    }

    async fn list_users(&self) -> Result<Vec<Value>> {
        if self.fail_users {
            bail!("user listing unavailable");
        }
        Ok(self.users.clone())
    }

    async fn library_info(&self, name: &str) -> Result<Option<Value>> {
        Ok(find_named(&self.list_libraries().await?, name))
    }

    async fn user_info(&self, name: &str) -> Result<Option<Value>> {
        Ok(find_named(&self.list_users().await?, name))
    }

    async fn create_save_file(&self, request: &SaveFileRequest) -> Result<SaveFileOutcome> {
        object_name(&request.library)?;
        let save_file = object_name(&request.save_file)?;
        Ok(SaveFileOutcome {
            path: request.download_dir.join(format!("{save_file}.zip")),
            bytes: 0,
        })
    }

    async fn send_message(&self, username: &str, _text: &str) -> Result<MessageOutcome> {
        if username.trim().is_empty() {
            return Ok(MessageOutcome::Rejected("no user given".into()));
        }
        Ok(MessageOutcome::Delivered)
    }
}

/// First row with a `*NAME*` column equal to `name`, ignoring case.
fn find_named(rows: &[Value], name: &str) -> Option<Value> {
    let name = name.trim();
    rows.iter()
        .find(|row| {
            row.as_object().is_some_and(|obj| {
                obj.iter().any(|(key, value)| {
                    key.to_ascii_uppercase().contains("NAME")
                        && value
                            .as_str()
                            .is_some_and(|v| v.trim().eq_ignore_ascii_case(name))
                })
            })
        })
        .cloned()
}

/// Connector that hands out a `StaticHost`, or refuses every handshake.
#[derive(Debug, Clone, Default)]
pub struct StaticConnector {
    pub host: StaticHost,
    pub refuse: bool,
}

impl StaticConnector {
    pub fn new(host: StaticHost) -> Self {
        Self {
            host,
            refuse: false,
        }
    }

    pub fn refusing() -> Self {
        Self {
            host: StaticHost::default(),
            refuse: true,
        }
    }
}

#[async_trait]
impl RemoteConnector for StaticConnector {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn connect(&self, _credentials: &CredentialsRecord) -> Result<Arc<dyn RemoteHost>> {
        if self.refuse {
            bail!("handshake refused");
        }
        Ok(Arc::new(self.host.clone()))
    }
}
