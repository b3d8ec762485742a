//! Single library and user profile views, read live from the host.

use chrono::NaiveDateTime;
use color_eyre::Result;
use ilib_core::{
    records::{LibraryRecord, UserRecord},
    remote::{object_name, RemoteHost},
};
use ilib_sync::normalize;

use crate::{config, host, storage};

pub async fn library(name: &str, cfg: &config::Config) -> Result<()> {
    let stores = storage::Stores::from_config(cfg)?;
    let session = host::open_session(&stores, storage::connector(cfg)?).await?;
    match library_with(session.as_ref(), name).await? {
        Some(lib) => print!("{}", describe_library(&lib)),
        None => color_eyre::eyre::bail!("library {} not found", name.trim().to_uppercase()),
    }
    Ok(())
}

pub async fn user(name: &str, cfg: &config::Config) -> Result<()> {
    let stores = storage::Stores::from_config(cfg)?;
    let session = host::open_session(&stores, storage::connector(cfg)?).await?;
    match user_with(session.as_ref(), name).await? {
        Some(user) => print!("{}", describe_user(&user)),
        None => color_eyre::eyre::bail!("user profile {} not found", name.trim().to_uppercase()),
    }
    Ok(())
}

async fn library_with(host: &dyn RemoteHost, name: &str) -> Result<Option<LibraryRecord>> {
    let name = object_name(name)?;
    let row = host
        .library_info(&name)
        .await
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
    Ok(row.as_ref().and_then(normalize::library_detail))
}

async fn user_with(host: &dyn RemoteHost, name: &str) -> Result<Option<UserRecord>> {
    let name = object_name(name)?;
    let row = host
        .user_info(&name)
        .await
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
    Ok(row.as_ref().and_then(normalize::user_detail))
}

fn describe_library(lib: &LibraryRecord) -> String {
    format!(
        "Name:        {}\nDescription: {}\nCreated:     {}\nSize:        {}\n",
        lib.name,
        lib.description,
        created(lib.created_at),
        lib.size_bytes
            .map(|bytes| format!("{bytes} bytes"))
            .unwrap_or_default(),
    )
}

fn describe_user(user: &UserRecord) -> String {
    format!(
        "Name:            {}\nDescription:     {}\nStatus:          {}\nClass:           {}\n\
         Created:         {}\nStorage used:    {}\nMaximum storage: {}\n",
        user.name,
        user.description,
        user.status.as_str(),
        user.class.as_str(),
        created(user.created_at),
        user.storage_used_kb.map(megabytes).unwrap_or_default(),
        user.max_storage_kb
            .map(megabytes)
            .unwrap_or_else(|| "*NOMAX".to_string()),
    )
}

/// The host reports storage in kilobytes; shown as MB with two decimals.
fn megabytes(kb: u64) -> String {
    format!("{:.2} MB", kb as f64 / 1000.0)
}

fn created(ts: Option<NaiveDateTime>) -> String {
    ts.map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use ilib_core::{
        records::{UserClass, UserStatus},
        remote::StaticHost,
    };
    use serde_json::json;

    use super::*;

    fn host() -> StaticHost {
        StaticHost {
            libraries: vec![json!({
                "OBJNAME": "QGPL",
                "OBJTEXT": "General purpose library",
                "OBJCREATED": "2020-01-02-03.04.05",
                "OBJSIZE": 4096,
            })],
            users: vec![json!({
                "AUTHORIZATION_NAME": "BOB",
                "STATUS": "*ENABLED",
                "USER_CLASS_NAME": "*PGMR",
                "STORAGE_USED": 1234,
                "MAXIMUM_ALLOWED_STORAGE": "1500",
            })],
            ..StaticHost::default()
        }
    }

    #[tokio::test]
    async fn looks_up_library_by_name() {
        let lib = library_with(&host(), " qgpl ")
            .await
            .expect("lookup")
            .expect("found");
        let text = describe_library(&lib);
        assert!(text.contains("Name:        QGPL\n"));
        assert!(text.contains("General purpose library"));
        assert!(text.contains("Created:     2020-01-02 03:04:05\n"));
        assert!(text.contains("4096 bytes"));

        assert!(library_with(&host(), "NOPE").await.expect("lookup").is_none());
        assert!(library_with(&host(), "../x").await.is_err());
    }

    #[tokio::test]
    async fn user_storage_is_shown_in_megabytes() {
        let user = user_with(&host(), "bob")
            .await
            .expect("lookup")
            .expect("found");
        assert_eq!(user.status, UserStatus::Enabled);
        assert_eq!(user.class, UserClass::Programmer);

        let text = describe_user(&user);
        assert!(text.contains("Storage used:    1.23 MB\n"));
        assert!(text.contains("Maximum storage: 1.50 MB\n"));
    }

    #[test]
    fn missing_limit_reads_as_nomax() {
        let text = describe_user(&UserRecord {
            name: "QSECOFR".into(),
            ..UserRecord::default()
        });
        assert!(text.contains("Maximum storage: *NOMAX\n"));
        assert_eq!(megabytes(0), "0.00 MB");
    }
}
