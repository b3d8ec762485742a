mod cli;
mod config;
mod detail;
mod host;
mod listing;
mod prefs;
mod settings;
mod storage;
mod sync;

use crate::cli::ConfigCommand;
use clap::Parser;
use color_eyre::Result;
use ilib_core::cache::CacheStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    match cli.command.unwrap_or(cli::Command::Status) {
        cli::Command::Status => listing::status(&storage::Stores::from_config(&config)?).await?,
        cli::Command::Version => print_version(),
        cli::Command::Health => run_health_check(&config).await?,
        cli::Command::Config(ConfigCommand::Init) => init_config()?,
        cli::Command::Settings(cmd) => settings::handle(cmd, &config).await?,
        cli::Command::Sync { once } => sync::run(&config, once).await?,
        cli::Command::Libraries { filter } => {
            listing::libraries(&storage::Stores::from_config(&config)?, filter.as_deref()).await?
        }
        cli::Command::Users { filter } => {
            listing::users(&storage::Stores::from_config(&config)?, filter.as_deref()).await?
        }
        cli::Command::Library { name } => detail::library(&name, &config).await?,
        cli::Command::User { name } => detail::user(&name, &config).await?,
        cli::Command::Savefile(args) => host::save_file(args, &config).await?,
        cli::Command::Message { user, text } => host::message(user, text, &config).await?,
        cli::Command::Theme { mode } => {
            let stores = storage::Stores::from_config(&config)?;
            prefs::theme(&stores.cache, mode).await?
        }
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info to avoid noisy stdout.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("ilib {}", env!("CARGO_PKG_VERSION"));
}

/// Checks the local stores and, when settings exist, that the host answers.
async fn run_health_check(config: &config::Config) -> Result<()> {
    let stores = storage::Stores::from_config(config)?;
    run_cache_health(&stores.cache).await?;
    println!("Cache: ok");

    match stores.credentials().await? {
        Some(credentials) => {
            println!("Settings: configured ({})", credentials.host);
            let probe = storage::probe(config, storage::connector(config)?);
            if probe.can_connect(&credentials).await {
                println!("Host: reachable");
            } else {
                println!("Host: unreachable");
            }
        }
        None => println!("Settings: not configured"),
    }
    Ok(())
}

async fn run_cache_health(cache: &dyn CacheStore) -> Result<()> {
    let probe_key = "health/probe";
    let payload = serde_json::json!("ok");
    cache
        .put(probe_key, payload.clone())
        .await
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
    let round_trip = cache
        .get(probe_key)
        .await
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
    cache
        .delete(probe_key)
        .await
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;

    if round_trip != Some(payload) {
        color_eyre::eyre::bail!("cache round-trip failed");
    }
    Ok(())
}

fn init_config() -> Result<()> {
    let path = config::write_default_if_missing(&config::Config::starter())?;
    println!("Config initialized at {}", path.display());
    Ok(())
}
