//! The one place untyped listings from the host become records.
//!
//! Each row is parsed on its own: missing, null or oddly typed fields fall
//! back to defaults instead of failing the batch. Rows without a usable name
//! (or that are not JSON objects) are dropped, since nothing downstream can
//! address them.
//!
//! Aliases also cover the field names `LibraryRecord`/`UserRecord` serialize
//! to, so rows read back from the local cache go through the same path.

use chrono::{DateTime, NaiveDateTime};
use ilib_core::records::{LibraryRecord, UserClass, UserRecord, UserStatus};
use serde_json::{Map, Value};
use tracing::debug;

const LIBRARY_NAME: &[&str] = &["OBJNAME", "LIBRARY", "NAME"];
const LIBRARY_TEXT: &[&str] = &["TEXT", "OBJTEXT", "TEXT_DESCRIPTION", "DESCRIPTION"];
const LIBRARY_CREATED: &[&str] = &["OBJCREATED", "CREATION_TIMESTAMP", "CREATED_AT"];
const LIBRARY_SIZE: &[&str] = &["OBJSIZE", "SIZE", "SIZE_BYTES"];

const USER_NAME: &[&str] = &["AUTHORIZATION_NAME", "USER_NAME", "NAME"];
const USER_TEXT: &[&str] = &["TEXT_DESCRIPTION", "TEXT", "DESCRIPTION"];
const USER_CREATED: &[&str] = &["CREATION_TIMESTAMP", "CREATED_AT"];
const USER_STATUS: &[&str] = &["STATUS"];
const USER_CLASS: &[&str] = &["USER_CLASS_NAME", "USER_CLASS", "CLASS"];
const USER_STORAGE: &[&str] = &["STORAGE_USED", "STORAGE_USED_KB"];
const USER_MAX_STORAGE: &[&str] = &["MAXIMUM_ALLOWED_STORAGE", "MAX_STORAGE_KB"];

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d-%H.%M.%S%.f",
    "%Y-%m-%d-%H.%M.%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

pub fn libraries(rows: Vec<Value>) -> Vec<LibraryRecord> {
    let total = rows.len();
    let out: Vec<_> = rows
        .iter()
        .filter_map(Value::as_object)
        .filter_map(library)
        .collect();
    if out.len() != total {
        debug!(dropped = total - out.len(), "skipped unusable library rows");
    }
    out
}

pub fn users(rows: Vec<Value>) -> Vec<UserRecord> {
    let total = rows.len();
    let out: Vec<_> = rows
        .iter()
        .filter_map(Value::as_object)
        .filter_map(user)
        .collect();
    if out.len() != total {
        debug!(dropped = total - out.len(), "skipped unusable user rows");
    }
    out
}

/// A single detail row, under the same rules as the listings.
pub fn library_detail(row: &Value) -> Option<LibraryRecord> {
    row.as_object().and_then(library)
}

pub fn user_detail(row: &Value) -> Option<UserRecord> {
    row.as_object().and_then(user)
}

fn library(row: &Map<String, Value>) -> Option<LibraryRecord> {
    Some(LibraryRecord {
        name: name(row, LIBRARY_NAME)?,
        description: field(row, LIBRARY_TEXT).and_then(text).unwrap_or_default(),
        created_at: field(row, LIBRARY_CREATED).and_then(timestamp),
        size_bytes: field(row, LIBRARY_SIZE).and_then(number),
    })
}

fn user(row: &Map<String, Value>) -> Option<UserRecord> {
    Some(UserRecord {
        name: name(row, USER_NAME)?,
        description: field(row, USER_TEXT).and_then(text).unwrap_or_default(),
        created_at: field(row, USER_CREATED).and_then(timestamp),
        status: field(row, USER_STATUS)
            .and_then(text)
            .map(UserStatus::from)
            .unwrap_or_default(),
        class: field(row, USER_CLASS)
            .and_then(text)
            .map(UserClass::from)
            .unwrap_or_default(),
        storage_used_kb: field(row, USER_STORAGE).and_then(number),
        max_storage_kb: field(row, USER_MAX_STORAGE).and_then(number),
    })
}

fn name(row: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    field(row, aliases).and_then(text)
}

/// First non-null field matching any alias, ignoring key case.
fn field<'a>(row: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases.iter().find_map(|alias| {
        row.iter()
            .find(|(key, value)| key.eq_ignore_ascii_case(alias) && !value.is_null())
            .map(|(_, value)| value)
    })
}

fn text(value: &Value) -> Option<String> {
    let raw = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!raw.is_empty()).then_some(raw)
}

fn number(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f as u64))
        }
        _ => None,
    }
}

fn timestamp(value: &Value) -> Option<NaiveDateTime> {
    let raw = value.as_str()?.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}
