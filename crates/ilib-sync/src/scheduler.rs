//! Background sync of library and user listings.
//!
//! Each cycle goes `Probing -> {Syncing, Unconfigured}`. Syncing fetches the
//! two listings in separate error scopes, so a failing endpoint only marks its
//! own snapshot stale. Cycles never overlap: `run_cycle` holds an async mutex
//! for its whole duration and a concurrent caller waits its turn.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use ilib_core::{
    cache::{keys, CacheStore},
    credentials::CredentialsRecord,
    remote::RemoteConnector,
    state::{Freshness, Named, Snapshot, SyncPhase, SyncState},
};
use ilib_storage::{key_store::KeyProvider, vault::CredentialVault};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::{
    sync::{watch, Mutex, Notify},
    task::JoinHandle,
};
use tracing::{debug, error, info, instrument, warn};

use crate::normalize;

/// How a single cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No usable credentials.
    Unconfigured,
    /// Credentials present but the handshake failed.
    ConnectFailed,
    Synced { libraries: bool, users: bool },
}

pub struct SyncScheduler {
    vault: CredentialVault,
    keys: Arc<dyn KeyProvider>,
    connector: Arc<dyn RemoteConnector>,
    cache: Arc<dyn CacheStore>,
    interval: Duration,
    state: watch::Sender<SyncState>,
    cycle: Mutex<()>,
}

impl SyncScheduler {
    pub fn new(
        vault: CredentialVault,
        keys: Arc<dyn KeyProvider>,
        connector: Arc<dyn RemoteConnector>,
        cache: Arc<dyn CacheStore>,
        interval: Duration,
    ) -> Self {
        let (state, _) = watch::channel(SyncState::default());
        Self {
            vault,
            keys,
            connector,
            cache,
            interval,
            state,
            cycle: Mutex::new(()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Current state (cheap: snapshots are shared).
    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    /// Seed the snapshots from the local cache so earlier listings are
    /// available before the first sync completes.
    pub async fn hydrate_from_cache(&self) {
        let libraries = self
            .cached_rows(keys::ALL_LIBRARIES)
            .await
            .map(normalize::libraries);
        let users = self.cached_rows(keys::ALL_USERS).await.map(normalize::users);

        self.state.send_modify(|state| {
            if let Some(records) = libraries {
                state.libraries = Snapshot::new(records, Freshness::Cached, None);
            }
            if let Some(records) = users {
                state.users = Snapshot::new(records, Freshness::Cached, None);
            }
        });
        let state = self.state.borrow();
        debug!(
            libraries = state.libraries.len(),
            users = state.users.len(),
            "hydrated sync state from cache"
        );
    }

    /// Run one full cycle. Waits for any cycle already in flight.
    #[instrument(skip_all)]
    pub async fn run_cycle(&self) -> CycleOutcome {
        let _cycle = self.cycle.lock().await;
        self.set_phase(SyncPhase::Probing);

        let Some(credentials) = self.load_credentials().await else {
            info!("no usable credentials; waiting for settings");
            self.state.send_modify(|state| {
                state.phase = SyncPhase::Unconfigured;
                state.server_reachable = false;
                state.libraries.mark_stale();
                state.users.mark_stale();
            });
            return CycleOutcome::Unconfigured;
        };

        self.set_phase(SyncPhase::Syncing);
        let session = match self.connector.connect(&credentials).await {
            Ok(session) => session,
            Err(err) => {
                warn!(connector = self.connector.name(), error = %err, "connection to host failed");
                self.state.send_modify(|state| {
                    state.phase = SyncPhase::Idle;
                    state.server_reachable = false;
                    state.libraries.mark_stale();
                    state.users.mark_stale();
                });
                return CycleOutcome::ConnectFailed;
            }
        };

        let libraries = match session.list_libraries().await {
            Ok(rows) => {
                let records = normalize::libraries(rows);
                self.publish(records, keys::ALL_LIBRARIES, keys::LIBRARY_NAMES, |s| {
                    &mut s.libraries
                })
                .await;
                true
            }
            Err(err) => {
                warn!(error = %err, "library sync failed; keeping previous listing");
                self.state.send_modify(|state| state.libraries.mark_stale());
                false
            }
        };

        let users = match session.list_users().await {
            Ok(rows) => {
                let records = normalize::users(rows);
                self.publish(records, keys::ALL_USERS, keys::USER_NAMES, |s| &mut s.users)
                    .await;
                true
            }
            Err(err) => {
                warn!(error = %err, "user sync failed; keeping previous listing");
                self.state.send_modify(|state| state.users.mark_stale());
                false
            }
        };

        if libraries || users {
            self.write_cache(keys::SERVER, json!(credentials.host)).await;
        }
        self.state.send_modify(|state| {
            state.phase = SyncPhase::Idle;
            state.server_reachable = libraries || users;
        });
        CycleOutcome::Synced { libraries, users }
    }

    /// Start the loop: one cycle right away, then one per interval. The
    /// handle can trigger an immediate cycle or stop the loop; dropping it
    /// also stops the loop.
    pub fn spawn(self: Arc<Self>) -> (JoinHandle<()>, SyncHandle) {
        let wake = Arc::new(Notify::new());
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let state_rx = self.subscribe();

        let wake_clone = wake.clone();
        let handle = tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs(), "sync loop started");

            loop {
                tokio::select! {
                    outcome = self.run_cycle() => {
                        debug!(?outcome, "sync cycle finished");
                    }
                    _ = shutdown_rx.changed() => {
                        info!("sync loop shutting down");
                        return;
                    }
                }

                tokio::select! {
                    _ = tokio::time::sleep(self.interval) => {}
                    _ = wake_clone.notified() => {
                        debug!("sync loop woken early");
                    }
                    _ = shutdown_rx.changed() => {
                        info!("sync loop shutting down");
                        return;
                    }
                }
            }
        });

        (
            handle,
            SyncHandle {
                waker: SyncWaker { wake },
                shutdown_tx,
                state_rx,
            },
        )
    }

    async fn load_credentials(&self) -> Option<CredentialsRecord> {
        let key = match self.keys.get().await {
            Ok(Some(key)) => key,
            Ok(None) => {
                debug!("no encryption key yet");
                return None;
            }
            Err(err) => {
                error!(error = %err, "encryption key unavailable");
                return None;
            }
        };
        self.vault.load_and_decrypt(&key)
    }

    fn set_phase(&self, phase: SyncPhase) {
        self.state.send_modify(|state| state.phase = phase);
    }

    /// Build the complete snapshot first, write it through to the cache, then
    /// swap it into the published state in one step.
    async fn publish<T, F>(&self, records: Vec<T>, records_key: &str, names_key: &str, slot: F)
    where
        T: Named + Serialize,
        F: FnOnce(&mut SyncState) -> &mut Snapshot<T>,
    {
        let now = Utc::now();
        let snapshot = Snapshot::new(records, Freshness::Fresh, Some(now));

        match serde_json::to_value(snapshot.records.as_slice()) {
            Ok(rows) => self.write_cache(records_key, rows).await,
            Err(err) => warn!(error = %err, key = records_key, "could not serialize listing"),
        }
        self.write_cache(names_key, json!(snapshot.names.as_slice()))
            .await;

        debug!(key = records_key, count = snapshot.len(), "listing refreshed");
        self.state.send_modify(|state| {
            *slot(state) = snapshot;
            state.last_success = Some(now);
        });
    }

    async fn write_cache(&self, key: &str, value: Value) {
        if let Err(err) = self.cache.put(key, value).await {
            warn!(error = %err, key, "cache write failed");
        }
    }

    async fn cached_rows(&self, key: &str) -> Option<Vec<Value>> {
        match self.cache.get(key).await {
            Ok(Some(Value::Array(rows))) => Some(rows),
            Ok(_) => None,
            Err(err) => {
                warn!(error = %err, key, "cache read failed");
                None
            }
        }
    }
}

/// Cloneable trigger for an immediate cycle.
#[derive(Debug, Clone)]
pub struct SyncWaker {
    wake: Arc<Notify>,
}

impl SyncWaker {
    /// Request a cycle now instead of waiting out the interval. If a cycle is
    /// running, another one follows it right away.
    pub fn sync_now(&self) {
        self.wake.notify_one();
    }
}

/// Control handle for a spawned loop.
pub struct SyncHandle {
    waker: SyncWaker,
    shutdown_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<SyncState>,
}

impl SyncHandle {
    pub fn sync_now(&self) {
        self.waker.sync_now();
    }

    pub fn waker(&self) -> SyncWaker {
        self.waker.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state_rx.clone()
    }

    pub fn shutdown(&self) {
        // The loop may already be gone.
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex as StdMutex,
    };

    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use ilib_core::{
        cache::InMemoryCache,
        credentials::DEFAULT_DRIVER,
        remote::{
            MessageOutcome, RemoteHost, SaveFileOutcome, SaveFileRequest, StaticConnector,
            StaticHost,
        },
    };
    use ilib_storage::{key_store::InMemoryKeyProvider, settings_file::SettingsFile};
    use tokio::time::timeout;

    use super::*;

    fn creds() -> CredentialsRecord {
        CredentialsRecord::new(DEFAULT_DRIVER, "pub400.com", 8471, "USER", "pw")
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        vault: CredentialVault,
        keys: InMemoryKeyProvider,
        cache: InMemoryCache,
    }

    impl Fixture {
        async fn new(configured: bool) -> Self {
            let dir = tempfile::tempdir().expect("tempdir");
            let vault = CredentialVault::new(SettingsFile::new(dir.path().join(".env")));
            let keys = InMemoryKeyProvider::default();
            if configured {
                let key = keys.get_or_create().await.expect("key");
                vault.encrypt_and_store(&key, &creds()).expect("store");
            }
            Self {
                _dir: dir,
                vault,
                keys,
                cache: InMemoryCache::new(),
            }
        }

        fn scheduler(&self, connector: Arc<dyn RemoteConnector>) -> SyncScheduler {
            SyncScheduler::new(
                self.vault.clone(),
                Arc::new(self.keys.clone()),
                connector,
                Arc::new(self.cache.clone()),
                Duration::from_secs(3600),
            )
        }
    }

    /// Connector whose host can be reconfigured between cycles.
    #[derive(Clone, Default)]
    struct SwitchableConnector {
        host: Arc<StdMutex<StaticHost>>,
    }

    impl SwitchableConnector {
        fn set(&self, host: StaticHost) {
            *self.host.lock().expect("lock") = host;
        }
    }

    #[async_trait]
    impl RemoteConnector for SwitchableConnector {
        fn name(&self) -> &'static str {
            "switchable"
        }

        async fn connect(&self, _: &CredentialsRecord) -> Result<Arc<dyn RemoteHost>> {
            Ok(Arc::new(self.host.lock().expect("lock").clone()))
        }
    }

    fn host(libs: &[&str], users: &[&str]) -> StaticHost {
        StaticHost {
            libraries: libs.iter().map(|n| json!({ "OBJNAME": n })).collect(),
            users: users
                .iter()
                .map(|n| json!({ "AUTHORIZATION_NAME": n, "STATUS": "*ENABLED" }))
                .collect(),
            ..StaticHost::default()
        }
    }

    #[tokio::test]
    async fn missing_credentials_leave_scheduler_unconfigured() {
        let fixture = Fixture::new(false).await;
        let scheduler = fixture.scheduler(Arc::new(StaticConnector::default()));

        assert_eq!(scheduler.run_cycle().await, CycleOutcome::Unconfigured);
        let state = scheduler.state();
        assert_eq!(state.phase, SyncPhase::Unconfigured);
        assert!(state.is_disconnected());
    }

    #[tokio::test]
    async fn successful_cycle_publishes_snapshots_and_cache() {
        let fixture = Fixture::new(true).await;
        let scheduler = fixture.scheduler(Arc::new(StaticConnector::new(host(
            &["QGPL", "MYLIB"],
            &["QSECOFR"],
        ))));

        assert_eq!(
            scheduler.run_cycle().await,
            CycleOutcome::Synced {
                libraries: true,
                users: true
            }
        );

        let state = scheduler.state();
        assert_eq!(state.phase, SyncPhase::Idle);
        assert!(state.server_reachable);
        assert!(state.last_success.is_some());
        assert_eq!(state.libraries.names.as_slice(), ["QGPL", "MYLIB"]);
        assert_eq!(state.libraries.freshness, Freshness::Fresh);
        assert_eq!(state.users.names.as_slice(), ["QSECOFR"]);

        assert_eq!(
            fixture.cache.get(keys::LIBRARY_NAMES).await.expect("get"),
            Some(json!(["QGPL", "MYLIB"]))
        );
        assert_eq!(
            fixture.cache.get(keys::USER_NAMES).await.expect("get"),
            Some(json!(["QSECOFR"]))
        );
        assert_eq!(
            fixture.cache.get(keys::SERVER).await.expect("get"),
            Some(json!("pub400.com"))
        );
        let cached_libs = fixture
            .cache
            .get(keys::ALL_LIBRARIES)
            .await
            .expect("get")
            .expect("present");
        assert_eq!(cached_libs.as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn failed_library_fetch_keeps_previous_libraries() {
        let fixture = Fixture::new(true).await;
        let connector = SwitchableConnector::default();
        connector.set(host(&["QGPL"], &["ALICE"]));
        let scheduler = fixture.scheduler(Arc::new(connector.clone()));
        scheduler.run_cycle().await;
        let before = scheduler.state();

        let mut broken = host(&["SHOULD_NOT_APPEAR"], &["ALICE", "BOB"]);
        broken.fail_libraries = true;
        connector.set(broken);

        assert_eq!(
            scheduler.run_cycle().await,
            CycleOutcome::Synced {
                libraries: false,
                users: true
            }
        );
        let after = scheduler.state();
        assert_eq!(after.libraries.records, before.libraries.records);
        assert_eq!(after.libraries.freshness, Freshness::Stale);
        assert!(!after.libraries.reachable);
        assert_eq!(after.users.names.as_slice(), ["ALICE", "BOB"]);
        assert_eq!(after.users.freshness, Freshness::Fresh);
        assert_eq!(
            fixture.cache.get(keys::LIBRARY_NAMES).await.expect("get"),
            Some(json!(["QGPL"]))
        );
    }

    #[tokio::test]
    async fn failed_user_fetch_keeps_previous_users() {
        let fixture = Fixture::new(true).await;
        let connector = SwitchableConnector::default();
        connector.set(host(&["QGPL"], &["ALICE"]));
        let scheduler = fixture.scheduler(Arc::new(connector.clone()));
        scheduler.run_cycle().await;
        let before = scheduler.state();

        let mut broken = host(&["QGPL", "MYLIB"], &["SHOULD_NOT_APPEAR"]);
        broken.fail_users = true;
        connector.set(broken);

        assert_eq!(
            scheduler.run_cycle().await,
            CycleOutcome::Synced {
                libraries: true,
                users: false
            }
        );
        let after = scheduler.state();
        assert!(after.server_reachable);
        assert_eq!(after.users.records, before.users.records);
        assert_eq!(after.users.freshness, Freshness::Stale);
        assert!(!after.users.reachable);
        assert_eq!(after.libraries.names.as_slice(), ["QGPL", "MYLIB"]);
        assert_eq!(after.libraries.freshness, Freshness::Fresh);
        assert_eq!(
            fixture.cache.get(keys::USER_NAMES).await.expect("get"),
            Some(json!(["ALICE"]))
        );
        assert_eq!(
            fixture.cache.get(keys::LIBRARY_NAMES).await.expect("get"),
            Some(json!(["QGPL", "MYLIB"]))
        );
    }

    #[tokio::test]
    async fn refused_handshake_marks_everything_stale() {
        let fixture = Fixture::new(true).await;
        let scheduler = fixture.scheduler(Arc::new(StaticConnector::refusing()));

        assert_eq!(scheduler.run_cycle().await, CycleOutcome::ConnectFailed);
        assert!(scheduler.state().is_disconnected());
    }

    #[tokio::test]
    async fn hydrates_from_cache() {
        let fixture = Fixture::new(false).await;
        fixture
            .cache
            .put(
                keys::ALL_LIBRARIES,
                json!([{ "name": "QGPL", "description": "General" }]),
            )
            .await
            .expect("seed");

        let scheduler = fixture.scheduler(Arc::new(StaticConnector::default()));
        scheduler.hydrate_from_cache().await;
        let state = scheduler.state();
        assert_eq!(state.libraries.freshness, Freshness::Cached);
        assert_eq!(state.libraries.records[0].description, "General");
        assert_eq!(state.users.freshness, Freshness::Empty);
    }

    /// Host that sleeps inside every fetch and records overlapping calls.
    #[derive(Default)]
    struct SlowHost {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
    }

    impl SlowHost {
        async fn fetch(&self) -> Result<Vec<Value>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![json!({ "OBJNAME": "X", "AUTHORIZATION_NAME": "X" })])
        }
    }

    #[async_trait]
    impl RemoteHost for SlowHost {
        async fn list_libraries(&self) -> Result<Vec<Value>> {
            self.fetch().await
        }

        async fn list_users(&self) -> Result<Vec<Value>> {
            self.fetch().await
        }

        async fn library_info(&self, _: &str) -> Result<Option<Value>> {
            bail!("unsupported")
        }

        async fn user_info(&self, _: &str) -> Result<Option<Value>> {
            bail!("unsupported")
        }

        async fn create_save_file(&self, _: &SaveFileRequest) -> Result<SaveFileOutcome> {
            bail!("unsupported")
        }

        async fn send_message(&self, _: &str, _: &str) -> Result<MessageOutcome> {
            bail!("unsupported")
        }
    }

    struct SlowConnector(Arc<SlowHost>);

    #[async_trait]
    impl RemoteConnector for SlowConnector {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn connect(&self, _: &CredentialsRecord) -> Result<Arc<dyn RemoteHost>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn concurrent_cycles_never_interleave() {
        let fixture = Fixture::new(true).await;
        let slow = Arc::new(SlowHost::default());
        let scheduler = Arc::new(fixture.scheduler(Arc::new(SlowConnector(slow.clone()))));

        let a = tokio::spawn({
            let s = scheduler.clone();
            async move { s.run_cycle().await }
        });
        let b = tokio::spawn({
            let s = scheduler.clone();
            async move { s.run_cycle().await }
        });
        let (a, b) = (a.await.expect("join"), b.await.expect("join"));

        assert!(matches!(a, CycleOutcome::Synced { .. }));
        assert!(matches!(b, CycleOutcome::Synced { .. }));
        assert_eq!(slow.calls.load(Ordering::SeqCst), 4);
        assert_eq!(slow.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn spawned_loop_syncs_on_demand_and_stops() {
        let fixture = Fixture::new(true).await;
        let connector = SwitchableConnector::default();
        connector.set(host(&["QGPL"], &[]));
        let scheduler = Arc::new(fixture.scheduler(Arc::new(connector.clone())));

        let (join, handle) = scheduler.spawn();
        let mut rx = handle.subscribe();
        timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| s.libraries.freshness == Freshness::Fresh),
        )
        .await
        .expect("first cycle in time")
        .expect("state channel open");

        // Interval is an hour; only the wake can produce the second listing.
        connector.set(host(&["QGPL", "NEWLIB"], &[]));
        handle.sync_now();
        timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| s.libraries.len() == 2),
        )
        .await
        .expect("woken cycle in time")
        .expect("state channel open");

        handle.shutdown();
        timeout(Duration::from_secs(5), join)
            .await
            .expect("loop stops")
            .expect("task completes");
    }

    #[tokio::test]
    async fn loop_reports_unconfigured_until_credentials_arrive() {
        let fixture = Fixture::new(false).await;
        let scheduler = Arc::new(fixture.scheduler(Arc::new(StaticConnector::new(host(
            &["QGPL"],
            &[],
        )))));

        let (join, handle) = scheduler.spawn();
        let mut rx = handle.subscribe();
        timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| s.phase == SyncPhase::Unconfigured),
        )
        .await
        .expect("unconfigured in time")
        .expect("state channel open");

        let key = fixture.keys.get_or_create().await.expect("key");
        fixture
            .vault
            .encrypt_and_store(&key, &creds())
            .expect("store");
        handle.sync_now();

        let state = timeout(Duration::from_secs(5), rx.wait_for(|s| s.server_reachable))
            .await
            .expect("synced in time")
            .expect("state channel open")
            .clone();
        assert_eq!(state.libraries.names.as_slice(), ["QGPL"]);

        drop(handle);
        timeout(Duration::from_secs(5), join)
            .await
            .expect("loop stops when handle is dropped")
            .expect("task completes");
    }
}
