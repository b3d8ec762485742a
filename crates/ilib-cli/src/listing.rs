//! Read-only views over what the sync loop left in the cache.

use color_eyre::Result;
use ilib_core::{
    cache::{keys, CacheStore},
    records::{LibraryRecord, UserRecord},
};
use ilib_sync::normalize;
use serde_json::Value;

use crate::storage::Stores;

pub async fn libraries(stores: &Stores, filter: Option<&str>) -> Result<()> {
    let records = cached_libraries(&stores.cache).await?;
    if records.is_empty() {
        println!("No libraries cached yet. Run `ilib sync --once`.");
        return Ok(());
    }
    let shown: Vec<_> = records
        .iter()
        .filter(|lib| name_matches(&lib.name, filter))
        .collect();
    if shown.is_empty() {
        println!("No cached library matches that filter.");
    }
    for lib in shown {
        println!("{}", library_line(lib));
    }
    Ok(())
}

pub async fn users(stores: &Stores, filter: Option<&str>) -> Result<()> {
    let records = cached_users(&stores.cache).await?;
    if records.is_empty() {
        println!("No users cached yet. Run `ilib sync --once`.");
        return Ok(());
    }
    let shown: Vec<_> = records
        .iter()
        .filter(|user| name_matches(&user.name, filter))
        .collect();
    if shown.is_empty() {
        println!("No cached user matches that filter.");
    }
    for user in shown {
        println!("{}", user_line(user));
    }
    Ok(())
}

/// Case-insensitive substring match on a name. A missing or blank filter
/// matches everything.
fn name_matches(name: &str, filter: Option<&str>) -> bool {
    match filter.map(str::trim) {
        Some(query) if !query.is_empty() => name.to_uppercase().contains(&query.to_uppercase()),
        _ => true,
    }
}

pub async fn status(stores: &Stores) -> Result<()> {
    let configured = stores.credentials().await?.is_some();
    let server = stores
        .cache
        .get(keys::SERVER)
        .await?
        .and_then(|v| v.as_str().map(str::to_string));

    println!(
        "Connection: {}",
        if configured { "configured" } else { "not configured" }
    );
    println!(
        "Last synced host: {}",
        server.as_deref().unwrap_or("never synced")
    );
    println!("Libraries cached: {}", cached_libraries(&stores.cache).await?.len());
    println!("Users cached: {}", cached_users(&stores.cache).await?.len());
    Ok(())
}

async fn cached_libraries(cache: &dyn CacheStore) -> Result<Vec<LibraryRecord>> {
    Ok(normalize::libraries(cached_rows(cache, keys::ALL_LIBRARIES).await?))
}

async fn cached_users(cache: &dyn CacheStore) -> Result<Vec<UserRecord>> {
    Ok(normalize::users(cached_rows(cache, keys::ALL_USERS).await?))
}

async fn cached_rows(cache: &dyn CacheStore, key: &str) -> Result<Vec<Value>> {
    match cache.get(key).await? {
        Some(Value::Array(rows)) => Ok(rows),
        _ => Ok(Vec::new()),
    }
}

fn library_line(lib: &LibraryRecord) -> String {
    let created = lib
        .created_at
        .map(|ts| ts.format("%Y-%m-%d").to_string())
        .unwrap_or_default();
    format!("{:<10} {:<10} {}", lib.name, created, lib.description)
        .trim_end()
        .to_string()
}

fn user_line(user: &UserRecord) -> String {
    let storage = match (user.storage_used_kb, user.max_storage_kb) {
        (Some(used), Some(max)) => format!("{used}/{max} KB"),
        (Some(used), None) => format!("{used} KB"),
        _ => String::new(),
    };
    format!(
        "{:<10} {:<9} {:<7} {:<14} {}",
        user.name,
        user.status.as_str(),
        user.class.as_str(),
        storage,
        user.description
    )
    .trim_end()
    .to_string()
}

#[cfg(test)]
mod tests {
    use ilib_core::{
        cache::InMemoryCache,
        records::{UserClass, UserStatus},
    };
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn reads_cached_listings() {
        let cache = InMemoryCache::new();
        assert!(cached_libraries(&cache).await.expect("empty").is_empty());

        cache
            .put(
                keys::ALL_LIBRARIES,
                json!([{ "name": "QGPL", "description": "General" }, { "description": "nameless" }]),
            )
            .await
            .expect("seed");
        cache
            .put(keys::ALL_USERS, json!("not a list"))
            .await
            .expect("seed");

        let libs = cached_libraries(&cache).await.expect("libraries");
        assert_eq!(libs.len(), 1);
        assert_eq!(libs[0].name, "QGPL");
        assert!(cached_users(&cache).await.expect("users").is_empty());
    }

    #[test]
    fn filter_matches_names_ignoring_case() {
        assert!(name_matches("QSECOFR", Some("sec")));
        assert!(name_matches("qgpl", Some("GP")));
        assert!(!name_matches("QGPL", Some("SYS")));
        assert!(name_matches("QGPL", None));
        assert!(name_matches("QGPL", Some("  ")));
    }

    #[test]
    fn formats_rows() {
        let lib = LibraryRecord {
            name: "QGPL".into(),
            ..LibraryRecord::default()
        };
        assert_eq!(library_line(&lib), "QGPL");

        let user = UserRecord {
            name: "BOB".into(),
            status: UserStatus::Enabled,
            class: UserClass::Programmer,
            storage_used_kb: Some(12),
            max_storage_kb: Some(100),
            description: "Dev".into(),
            ..UserRecord::default()
        };
        let line = user_line(&user);
        assert!(line.starts_with("BOB"));
        assert!(line.contains("*ENABLED"));
        assert!(line.contains("*PGMR"));
        assert!(line.contains("12/100 KB"));
        assert!(line.ends_with("Dev"));
    }
}
