use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A library (`*LIB` object) on the remote host.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LibraryRecord {
    pub name: String,
    pub description: String,
    pub created_at: Option<NaiveDateTime>,
    pub size_bytes: Option<u64>,
}

/// A user profile on the remote host.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRecord {
    pub name: String,
    pub description: String,
    pub created_at: Option<NaiveDateTime>,
    pub status: UserStatus,
    pub class: UserClass,
    /// Storage used, in kilobytes.
    pub storage_used_kb: Option<u64>,
    /// Storage limit, in kilobytes. `None` means `*NOMAX` or unknown.
    pub max_storage_kb: Option<u64>,
}

/// Profile status as reported by the host (`*ENABLED` / `*DISABLED`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum UserStatus {
    Enabled,
    Disabled,
    #[default]
    Unknown,
    Other(String),
}

impl From<&str> for UserStatus {
    fn from(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "*ENABLED" => UserStatus::Enabled,
            "*DISABLED" => UserStatus::Disabled,
            "" => UserStatus::Unknown,
            other => UserStatus::Other(other.to_string()),
        }
    }
}

impl From<String> for UserStatus {
    fn from(raw: String) -> Self {
        UserStatus::from(raw.as_str())
    }
}

impl From<UserStatus> for String {
    fn from(status: UserStatus) -> Self {
        status.as_str().to_string()
    }
}

impl UserStatus {
    pub fn as_str(&self) -> &str {
        match self {
            UserStatus::Enabled => "*ENABLED",
            UserStatus::Disabled => "*DISABLED",
            UserStatus::Unknown => "",
            UserStatus::Other(raw) => raw,
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, UserStatus::Enabled)
    }
}

/// User class (`*USER`, `*PGMR`, `*SECADM`, `*SECOFR`, `*SYSOPR`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum UserClass {
    User,
    Programmer,
    SecurityAdmin,
    SecurityOfficer,
    SystemOperator,
    #[default]
    Unknown,
    Other(String),
}

impl From<&str> for UserClass {
    fn from(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "*USER" => UserClass::User,
            "*PGMR" => UserClass::Programmer,
            "*SECADM" => UserClass::SecurityAdmin,
            "*SECOFR" => UserClass::SecurityOfficer,
            "*SYSOPR" => UserClass::SystemOperator,
            "" => UserClass::Unknown,
            other => UserClass::Other(other.to_string()),
        }
    }
}

impl From<String> for UserClass {
    fn from(raw: String) -> Self {
        UserClass::from(raw.as_str())
    }
}

impl From<UserClass> for String {
    fn from(class: UserClass) -> Self {
        class.as_str().to_string()
    }
}

impl UserClass {
    pub fn as_str(&self) -> &str {
        match self {
            UserClass::User => "*USER",
            UserClass::Programmer => "*PGMR",
            UserClass::SecurityAdmin => "*SECADM",
            UserClass::SecurityOfficer => "*SECOFR",
            UserClass::SystemOperator => "*SYSOPR",
            UserClass::Unknown => "",
            UserClass::Other(raw) => raw,
        }
    }
}
