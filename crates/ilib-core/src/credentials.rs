use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default ODBC driver name used by IBM i Access.
pub const DEFAULT_DRIVER: &str = "{IBM i Access ODBC Driver}";

/// Connection settings for the remote host. This is the unit of encryption:
/// the whole record is serialized and sealed as one token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialsRecord {
    pub driver: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialsError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("port must be between 1 and 65535")]
    InvalidPort,
}

impl CredentialsRecord {
    pub fn new(
        driver: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            driver: driver.into(),
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
        }
    }

    /// Every field is required for a connection attempt.
    pub fn validate(&self) -> Result<(), CredentialsError> {
        let required = [
            ("driver", &self.driver),
            ("host", &self.host),
            ("username", &self.username),
            ("password", &self.password),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(CredentialsError::Empty { field });
            }
        }
        if self.port == 0 {
            return Err(CredentialsError::InvalidPort);
        }
        Ok(())
    }
}

impl fmt::Debug for CredentialsRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsRecord")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
