use color_eyre::Result;
use ilib_core::cache::{keys, CacheStore};
use serde_json::{json, Value};

use crate::cli::ThemeMode;

/// Show the stored theme mode, or store a new one.
pub async fn theme(cache: &dyn CacheStore, mode: Option<ThemeMode>) -> Result<()> {
    match mode {
        Some(mode) => {
            cache.put(keys::THEME_MODE, json!(mode.as_str())).await?;
            println!("Theme mode set to {}.", mode.as_str());
        }
        None => println!("Theme mode: {}", current_theme(cache).await?),
    }
    Ok(())
}

async fn current_theme(cache: &dyn CacheStore) -> Result<String> {
    Ok(match cache.get(keys::THEME_MODE).await? {
        Some(Value::String(mode)) => mode,
        _ => ThemeMode::System.as_str().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use ilib_core::cache::InMemoryCache;

    use super::*;

    #[tokio::test]
    async fn theme_defaults_to_system_and_persists() {
        let cache = InMemoryCache::new();
        assert_eq!(current_theme(&cache).await.expect("read"), "system");

        theme(&cache, Some(ThemeMode::Dark)).await.expect("set");
        assert_eq!(current_theme(&cache).await.expect("read"), "dark");
        assert_eq!(
            cache.get(keys::THEME_MODE).await.expect("get"),
            Some(json!("dark"))
        );
    }
}
