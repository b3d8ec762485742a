use std::sync::Arc;

use color_eyre::Result;
use ilib_core::{
    cache::CacheStore,
    remote::RemoteConnector,
    state::{Freshness, SyncPhase, SyncState},
};
use ilib_sync::{CycleOutcome, SyncScheduler};
use tracing::{info, warn};

use crate::{config, storage};

/// Run the sync loop until Ctrl-C, or a single cycle with `once`.
pub async fn run(cfg: &config::Config, once: bool) -> Result<()> {
    let stores = storage::Stores::from_config(cfg)?;
    let scheduler = Arc::new(build_scheduler(
        cfg,
        &stores,
        Arc::new(stores.cache.clone()),
        storage::connector(cfg)?,
    ));
    scheduler.hydrate_from_cache().await;

    if once {
        let outcome = scheduler.run_cycle().await;
        println!("{}", summarize(outcome, &scheduler.state()));
        return Ok(());
    }

    info!(interval_secs = scheduler.interval().as_secs(), "starting sync loop");
    let (join, handle) = scheduler.spawn();
    let mut rx = handle.subscribe();
    let mut last_phase = rx.borrow().phase;

    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = rx.borrow_and_update().clone();
                if state.phase != last_phase {
                    report_phase(&state);
                    last_phase = state.phase;
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!(error = %err, "could not listen for Ctrl-C");
                }
                break;
            }
        }
    }

    handle.shutdown();
    join.await?;
    println!("Sync stopped.");
    Ok(())
}

pub(crate) fn build_scheduler(
    cfg: &config::Config,
    stores: &storage::Stores,
    cache: Arc<dyn CacheStore>,
    connector: Arc<dyn RemoteConnector>,
) -> SyncScheduler {
    SyncScheduler::new(
        stores.vault(),
        stores.keys(),
        connector,
        cache,
        cfg.sync_interval(),
    )
}

fn report_phase(state: &SyncState) {
    match state.phase {
        SyncPhase::Unconfigured => {
            warn!("no connection settings; run `ilib settings set`")
        }
        SyncPhase::Idle if state.is_disconnected() => {
            warn!("host unreachable; serving cached listings")
        }
        SyncPhase::Idle => info!(
            libraries = state.libraries.len(),
            users = state.users.len(),
            "listings up to date"
        ),
        SyncPhase::Probing | SyncPhase::Syncing => {}
    }
}

pub(crate) fn summarize(outcome: CycleOutcome, state: &SyncState) -> String {
    match outcome {
        CycleOutcome::Unconfigured => {
            "Not configured. Run `ilib settings set` first.".to_string()
        }
        CycleOutcome::ConnectFailed => "Could not connect to the host.".to_string(),
        CycleOutcome::Synced { libraries, users } => format!(
            "Libraries: {}\nUsers: {}",
            resource_line(libraries, state.libraries.len(), state.libraries.freshness),
            resource_line(users, state.users.len(), state.users.freshness),
        ),
    }
}

fn resource_line(ok: bool, count: usize, freshness: Freshness) -> String {
    if ok {
        format!("{count} synced")
    } else if freshness == Freshness::Empty {
        "fetch failed".to_string()
    } else {
        format!("fetch failed, keeping {count} cached")
    }
}
