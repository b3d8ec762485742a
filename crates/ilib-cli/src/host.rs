//! Commands that act on the remote host directly.

use std::{path::PathBuf, sync::Arc};

use color_eyre::Result;
use ilib_core::{
    cache::{keys, CacheStore},
    credentials::CredentialsRecord,
    remote::{MessageOutcome, RemoteConnector, RemoteHost, SaveFileOutcome, SaveFileRequest},
};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::{cli::SaveFileArgs, config, storage};

pub async fn save_file(args: SaveFileArgs, cfg: &config::Config) -> Result<()> {
    let stores = storage::Stores::from_config(cfg)?;
    let host = open_session(&stores, storage::connector(cfg)?).await?;
    let outcome = save_file_with(host.as_ref(), &stores.cache, args).await?;
    println!(
        "Saved to {} ({} bytes).",
        outcome.path.display(),
        outcome.bytes
    );
    Ok(())
}

pub async fn message(user: String, text: Vec<String>, cfg: &config::Config) -> Result<()> {
    let stores = storage::Stores::from_config(cfg)?;
    let host = open_session(&stores, storage::connector(cfg)?).await?;
    match message_with(host.as_ref(), &stores.cache, &user, &text.join(" ")).await? {
        MessageOutcome::Delivered => println!("Message sent to {user}."),
        MessageOutcome::Rejected(reason) => {
            color_eyre::eyre::bail!("host rejected the message: {reason}")
        }
    }
    Ok(())
}

pub(crate) async fn open_session(
    stores: &storage::Stores,
    connector: Arc<dyn RemoteConnector>,
) -> Result<Arc<dyn RemoteHost>> {
    let credentials: CredentialsRecord = stores.credentials().await?.ok_or_else(|| {
        color_eyre::eyre::eyre!("no connection settings stored; run `ilib settings set`")
    })?;
    connector
        .connect(&credentials)
        .await
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))
}

async fn save_file_with(
    host: &dyn RemoteHost,
    cache: &dyn CacheStore,
    args: SaveFileArgs,
) -> Result<SaveFileOutcome> {
    let dir = resolve_download_dir(cache, args.dir).await?;
    let mut request = SaveFileRequest::for_library(args.library.trim().to_ascii_uppercase(), &dir);
    if let Some(name) = args.save_file {
        request.save_file = name.trim().to_ascii_uppercase();
    }
    if let Some(description) = args.description {
        request.description = description;
    }
    if let Some(release) = args.target_release {
        request.target_release = release;
    }
    if let Some(authority) = args.authority {
        request.authority = authority;
    }

    info!(library = %request.library, dir = %dir.display(), "creating save file");
    let outcome = host
        .create_save_file(&request)
        .await
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;

    if let Err(err) = cache
        .put(keys::DOWNLOAD_PATH, json!(dir.to_string_lossy()))
        .await
    {
        warn!(error = %err, "could not remember download directory");
    }
    Ok(outcome)
}

/// Explicit directory, else the one used last time, else the current one.
async fn resolve_download_dir(cache: &dyn CacheStore, explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir);
    }
    if let Some(Value::String(dir)) = cache.get(keys::DOWNLOAD_PATH).await? {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    Ok(std::env::current_dir()?)
}

async fn message_with(
    host: &dyn RemoteHost,
    cache: &dyn CacheStore,
    user: &str,
    text: &str,
) -> Result<MessageOutcome> {
    let user = user.trim().to_ascii_uppercase();
    if text.trim().is_empty() {
        color_eyre::eyre::bail!("message text must not be empty");
    }
    if let Some(Value::Array(names)) = cache.get(keys::USER_NAMES).await? {
        if !names.iter().any(|n| n.as_str() == Some(user.as_str())) {
            warn!(user = %user, "user is not in the cached user list");
        }
    }
    host.send_message(&user, text)
        .await
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))
}
