use std::{
    io::{self, BufRead, Write},
    sync::Arc,
};

use color_eyre::Result;
use ilib_core::{credentials::CredentialsRecord, remote::RemoteConnector};
use ilib_sync::{SaveOutcome, SettingsService};

use crate::{cli::SettingsCommand, config, storage, sync};

/// Execute a settings subcommand against the local settings file.
pub async fn handle(cmd: SettingsCommand, config: &config::Config) -> Result<()> {
    let stores = storage::Stores::from_config(config)?;
    let connector = storage::connector(config)?;

    match cmd {
        SettingsCommand::Set {
            host,
            port,
            username,
            password,
            driver,
        } => {
            let password = match password {
                Some(password) => password,
                None => read_password(&mut io::stdin().lock())?,
            };
            let record = CredentialsRecord::new(driver, host, port, username, password);
            let summary = save_and_sync(config, &stores, connector, &record).await?;
            println!("Connection settings saved for {}:{}.", record.host, record.port);
            println!("{summary}");
        }
        SettingsCommand::Show => match service(config, &stores, connector).load_current().await? {
            Some(record) => print!("{}", describe(&record)),
            None => println!("No connection settings stored. Use `ilib settings set`."),
        },
        SettingsCommand::Clear => {
            service(config, &stores, connector).clear()?;
            println!("Connection settings cleared.");
        }
    }

    Ok(())
}

fn service(
    config: &config::Config,
    stores: &storage::Stores,
    connector: Arc<dyn RemoteConnector>,
) -> SettingsService {
    SettingsService::new(
        storage::probe(config, connector),
        stores.vault(),
        stores.keys(),
    )
}

/// Store the settings, then run one sync cycle with them so the listings are
/// filled in right away. Returns the cycle summary.
async fn save_and_sync(
    config: &config::Config,
    stores: &storage::Stores,
    connector: Arc<dyn RemoteConnector>,
    record: &CredentialsRecord,
) -> Result<String> {
    match service(config, stores, connector.clone()).save(record).await? {
        SaveOutcome::Saved => {}
        SaveOutcome::ConnectionFailed => {
            color_eyre::eyre::bail!(
                "could not connect to {}:{}; settings were not saved",
                record.host,
                record.port
            );
        }
    }

    let scheduler =
        sync::build_scheduler(config, stores, Arc::new(stores.cache.clone()), connector);
    scheduler.hydrate_from_cache().await;
    let outcome = scheduler.run_cycle().await;
    Ok(sync::summarize(outcome, &scheduler.state()))
}

fn read_password(input: &mut impl BufRead) -> Result<String> {
    eprint!("Password: ");
    io::stderr().flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn describe(record: &CredentialsRecord) -> String {
    format!(
        "driver:   {}\nhost:     {}\nport:     {}\nuser:     {}\npassword: ********\n",
        record.driver, record.host, record.port, record.username
    )
}

#[cfg(test)]
mod tests {
    use ilib_core::{
        cache::{keys, CacheStore},
        credentials::DEFAULT_DRIVER,
        remote::{StaticConnector, StaticHost},
    };
    use serde_json::json;
    use tokio::net::TcpListener;

    use super::*;

    fn test_config(dir: &tempfile::TempDir) -> config::Config {
        config::Config {
            data_dir: Some(dir.path().to_path_buf()),
            ..config::Config::default()
        }
    }

    #[tokio::test]
    async fn saving_settings_fills_the_cache_immediately() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = test_config(&dir);
        let stores = storage::test_stores(dir.path());
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let connector = Arc::new(StaticConnector::new(StaticHost {
            libraries: vec![json!({ "OBJNAME": "QGPL" })],
            users: vec![json!({ "AUTHORIZATION_NAME": "ME", "STATUS": "*ENABLED" })],
            ..StaticHost::default()
        }));

        let record = CredentialsRecord::new(DEFAULT_DRIVER, "127.0.0.1", port, "ME", "pw");
        let summary = save_and_sync(&cfg, &stores, connector, &record)
            .await
            .expect("save");

        assert_eq!(summary, "Libraries: 1 synced\nUsers: 1 synced");
        assert_eq!(
            stores.cache.get(keys::LIBRARY_NAMES).await.expect("get"),
            Some(json!(["QGPL"]))
        );
        assert_eq!(
            stores.cache.get(keys::USER_NAMES).await.expect("get"),
            Some(json!(["ME"]))
        );
        assert_eq!(stores.credentials().await.expect("load"), Some(record));
    }

    #[tokio::test]
    async fn failed_connection_saves_nothing_and_skips_sync() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = test_config(&dir);
        let stores = storage::test_stores(dir.path());
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let record = CredentialsRecord::new(DEFAULT_DRIVER, "127.0.0.1", port, "ME", "pw");
        let err = save_and_sync(&cfg, &stores, Arc::new(StaticConnector::refusing()), &record)
            .await
            .expect_err("refused");
        assert!(err.to_string().contains("settings were not saved"));
        assert_eq!(stores.credentials().await.expect("load"), None);
        assert_eq!(stores.cache.get(keys::LIBRARY_NAMES).await.expect("get"), None);
    }

    #[test]
    fn password_line_is_trimmed_of_newline_only() {
        let mut input = io::Cursor::new(b" s3cret \r\nignored\n".to_vec());
        assert_eq!(read_password(&mut input).expect("read"), " s3cret ");
    }

    #[test]
    fn description_never_contains_password() {
        let record = CredentialsRecord::new(DEFAULT_DRIVER, "pub400.com", 8471, "ME", "hunter2");
        let text = describe(&record);
        assert!(text.contains("pub400.com"));
        assert!(text.contains("8471"));
        assert!(!text.contains("hunter2"));
    }
}
