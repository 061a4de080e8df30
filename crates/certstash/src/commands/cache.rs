//! Local cache commands
//!
//! These open the cache directory directly and never touch the remote store.

use anyhow::{anyhow, Result};
use certstash_storage::{LocalCache, StorageConfig};

use crate::cli::CacheCommands;
use crate::output;

pub async fn run(cmd: CacheCommands, config: &StorageConfig) -> Result<()> {
    let path = config.cache.expanded_path();
    if !path.exists() {
        output::info(&format!("No cache at {}", path.display()));
        return Ok(());
    }

    let cache = LocalCache::open(&path)
        .await
        .map_err(|e| anyhow!("{} (is another certstash process running?)", e))?;

    match cmd {
        CacheCommands::Stats => stats(&cache).await,
        CacheCommands::Cleanup => {
            let removed = cache.cleanup_expired().await?;
            output::success(&format!("Removed {} expired entries", removed));
            Ok(())
        }
        CacheCommands::Clear => {
            cache.clear().await?;
            output::success(&format!("Cleared cache at {}", path.display()));
            Ok(())
        }
    }
}

async fn stats(cache: &LocalCache) -> Result<()> {
    let stats = cache.stats().await;

    output::header("Cache Statistics");
    if let Some(path) = cache.path() {
        output::kv("Path", &path.display().to_string());
    }
    output::kv("Entries", &stats.entries.to_string());
    output::kv("Size", &format!("{} bytes", stats.size_bytes));
    Ok(())
}
