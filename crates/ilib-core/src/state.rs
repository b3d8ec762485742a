//! Sync state published to UI collaborators.
//!
//! The scheduler owns the only writer; everyone else holds a read-only view
//! (usually a `tokio::sync::watch::Receiver<SyncState>`). Snapshots are shared
//! behind `Arc`, so cloning the state is cheap and readers never observe a
//! partially rebuilt listing.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::records::{LibraryRecord, UserRecord};

/// Where the scheduler currently is in its cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncPhase {
    #[default]
    Idle,
    Probing,
    Syncing,
    /// No usable credentials; the disconnected banner should be shown.
    Unconfigured,
}

/// How a snapshot relates to the remote host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Freshness {
    /// Nothing has ever been loaded.
    #[default]
    Empty,
    /// Loaded from the local cache at startup, not yet confirmed by a sync.
    Cached,
    /// Replaced by the most recent successful fetch.
    Fresh,
    /// The most recent fetch failed; the previous data is still served.
    Stale,
}

/// Anything with a display name that feeds a name index.
pub trait Named {
    fn name(&self) -> &str;
}

impl Named for LibraryRecord {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for UserRecord {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Immutable listing plus its derived name index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot<T> {
    pub records: Arc<Vec<T>>,
    pub names: Arc<Vec<String>>,
    pub freshness: Freshness,
    /// Whether the last fetch for this resource reached the host.
    pub reachable: bool,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Self {
            records: Arc::new(Vec::new()),
            names: Arc::new(Vec::new()),
            freshness: Freshness::Empty,
            reachable: false,
            refreshed_at: None,
        }
    }
}

impl<T: Named> Snapshot<T> {
    /// Build a complete snapshot; callers swap it in as a whole.
    pub fn new(records: Vec<T>, freshness: Freshness, refreshed_at: Option<DateTime<Utc>>) -> Self {
        let names = records.iter().map(|r| r.name().to_string()).collect();
        Self {
            records: Arc::new(records),
            names: Arc::new(names),
            freshness,
            reachable: freshness == Freshness::Fresh,
            refreshed_at,
        }
    }

    /// Keep the data, flag it as stale.
    pub fn mark_stale(&mut self) {
        self.reachable = false;
        if self.freshness != Freshness::Empty {
            self.freshness = Freshness::Stale;
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncState {
    pub phase: SyncPhase,
    /// Last time any listing was refreshed from the host.
    pub last_success: Option<DateTime<Utc>>,
    /// Whether the last cycle completed a handshake with the host.
    pub server_reachable: bool,
    pub libraries: Snapshot<LibraryRecord>,
    pub users: Snapshot<UserRecord>,
}

impl SyncState {
    /// True while the connectivity-lost banner should be visible.
    pub fn is_disconnected(&self) -> bool {
        !self.server_reachable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lib(name: &str) -> LibraryRecord {
        LibraryRecord {
            name: name.into(),
            ..LibraryRecord::default()
        }
    }

    #[test]
    fn snapshot_builds_name_index_in_order() {
        let snap = Snapshot::new(vec![lib("QGPL"), lib("QSYS")], Freshness::Fresh, None);
        assert_eq!(snap.names.as_slice(), ["QGPL", "QSYS"]);
        assert!(snap.reachable);
        assert_eq!(snap.len(), 2);
    }

    #[test]
    fn mark_stale_keeps_records() {
        let mut snap = Snapshot::new(vec![lib("QGPL")], Freshness::Fresh, Some(Utc::now()));
        snap.mark_stale();
        assert_eq!(snap.freshness, Freshness::Stale);
        assert!(!snap.reachable);
        assert_eq!(snap.len(), 1);

        let mut empty: Snapshot<LibraryRecord> = Snapshot::default();
        empty.mark_stale();
        assert_eq!(empty.freshness, Freshness::Empty);
    }

    #[test]
    fn default_state_is_disconnected() {
        assert!(SyncState::default().is_disconnected());
    }
}
