//! Dotenv-compatible settings file (`KEY=VALUE` per line).
//!
//! Every mutation rewrites the whole file through a temp file in the same
//! directory followed by a rename, so readers see either the previous or the
//! new contents. All handles cloned from one `SettingsFile` share a mutex, which
//! serializes read-modify-write cycles between the settings-save path and the
//! background sync loop.

use std::{
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StorageError;

pub const APP_ENCRYPTION_KEY: &str = "APP_ENCRYPTION_KEY";
pub const ENCRYPTED_DB_CREDENTIALS: &str = "ENCRYPTED_DB_CREDENTIALS";

#[derive(Debug, Clone)]
pub struct SettingsFile {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl SettingsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the file (and its parent directory) with owner-only permissions
    /// if it does not exist yet. Existing files are left untouched.
    pub fn ensure_exists(&self) -> Result<(), StorageError> {
        let _guard = self.guard()?;
        self.create_if_missing()
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.guard()?;
        Ok(self.read_document()?.get(key).map(str::to_string))
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.guard()?;
        let mut doc = self.read_document()?;
        doc.set(key, value);
        self.write_document(&doc)
    }

    /// Return the value under `key`, writing `make()` first if it is absent.
    /// The boolean is `true` when the value was created by this call.
    pub fn get_or_insert_with<F>(&self, key: &str, make: F) -> Result<(String, bool), StorageError>
    where
        F: FnOnce() -> String,
    {
        let _guard = self.guard()?;
        self.create_if_missing()?;
        let mut doc = self.read_document()?;
        if let Some(existing) = doc.get(key) {
            return Ok((existing.to_string(), false));
        }
        let value = make();
        doc.set(key, &value);
        self.write_document(&doc)?;
        Ok((value, true))
    }

    /// Remove the given keys; missing keys and a missing file are fine.
    pub fn remove(&self, keys: &[&str]) -> Result<(), StorageError> {
        let _guard = self.guard()?;
        if !self.path.exists() {
            return Ok(());
        }
        let mut doc = self.read_document()?;
        let mut changed = false;
        for key in keys {
            changed |= doc.remove(key);
        }
        if changed {
            self.write_document(&doc)?;
        }
        Ok(())
    }

    fn guard(&self) -> Result<MutexGuard<'_, ()>, StorageError> {
        self.lock
            .lock()
            .map_err(|err| StorageError::Lock(err.to_string()))
    }

    fn create_if_missing(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
            }
        }
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        match options.open(&self.path) {
            Ok(_) => {
                debug!(path = %self.path.display(), "created settings file");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(err) => Err(StorageError::io(&self.path, err)),
        }
    }

    fn read_document(&self) -> Result<EnvDocument, StorageError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(EnvDocument::parse(&text)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(EnvDocument::default()),
            Err(err) => Err(StorageError::io(&self.path, err)),
        }
    }

    fn write_document(&self, doc: &EnvDocument) -> Result<(), StorageError> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;

        // NamedTempFile is created 0600 on unix, so the renamed file keeps
        // owner-only permissions.
        let mut tmp = NamedTempFile::new_in(parent).map_err(|e| StorageError::io(parent, e))?;
        tmp.write_all(doc.render().as_bytes())
            .map_err(|e| StorageError::io(tmp.path(), e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| StorageError::io(tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| StorageError::io(&self.path, e.error))?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Entry { key: String, value: String },
    /// Comments, blank lines and anything unparseable, kept verbatim.
    Raw(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct EnvDocument {
    lines: Vec<Line>,
}

impl EnvDocument {
    fn parse(text: &str) -> Self {
        let lines = text
            .lines()
            .map(|raw| parse_line(raw).unwrap_or_else(|| Line::Raw(raw.to_string())))
            .collect();
        Self { lines }
    }

    /// Later assignments win, as with dotenv loaders.
    fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().rev().find_map(|line| match line {
            Line::Entry { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    fn set(&mut self, key: &str, value: &str) {
        let mut replaced = false;
        self.lines.retain_mut(|line| match line {
            Line::Entry { key: k, value: v } if k == key => {
                if replaced {
                    false
                } else {
                    *v = value.to_string();
                    replaced = true;
                    true
                }
            }
            _ => true,
        });
        if !replaced {
            self.lines.push(Line::Entry {
                key: key.to_string(),
                value: value.to_string(),
            });
        }
    }

    fn remove(&mut self, key: &str) -> bool {
        let before = self.lines.len();
        self.lines
            .retain(|line| !matches!(line, Line::Entry { key: k, .. } if k == key));
        before != self.lines.len()
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Entry { key, value } => {
                    out.push_str(key);
                    out.push('=');
                    out.push_str(&quote_value(value));
                }
                Line::Raw(raw) => out.push_str(raw),
            }
            out.push('\n');
        }
        out
    }
}

fn parse_line(raw: &str) -> Option<Line> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let body = trimmed.strip_prefix("export ").unwrap_or(trimmed);
    let (key, value) = body.split_once('=')?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some(Line::Entry {
        key: key.to_string(),
        value: unquote_value(value.trim()),
    })
}

fn unquote_value(value: &str) -> String {
    if value.len() >= 2 {
        if let Some(inner) = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
            return unescape(inner);
        }
        if let Some(inner) = value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')) {
            return inner.to_string();
        }
    }
    // Unquoted values may carry a trailing ` # comment`.
    match value.find(" #") {
        Some(idx) => value[..idx].trim_end().to_string(),
        None => value.to_string(),
    }
}

/// Reverses `quote_value` in a single pass, so an escaped backslash followed
/// by `n` is not read back as a newline.
fn unescape(inner: &str) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn quote_value(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_.=+/:@{}".contains(c));
    if plain {
        return value.to_string();
    }
    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n");
    format!("\"{escaped}\"")
}
