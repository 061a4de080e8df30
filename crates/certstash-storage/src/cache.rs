//! Local TTL cache
//!
//! A persistent directory store that short-circuits remote reads. Each entry
//! is one JSON file named by the SHA-256 digest of its key, so arbitrary
//! keys (including ones with `/` or `..`) never escape the cache directory.
//!
//! Expiry is fixed when an entry is written. Expired entries stay on disk
//! until the next read, the next [`LocalCache::cleanup_expired`] or the next
//! [`LocalCache::open`] notices them.
//!
//! A cache directory belongs to one process at a time: opening takes an
//! exclusive lock on `<dir>/LOCK` that is held until the cache is dropped.

use crate::error::{Result, StorageError};
use crate::types::CacheEntry;
use fs4::fs_std::FileExt;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const LOCK_FILE: &str = "LOCK";

/// Statistics about cache usage
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Number of expired entries encountered
    pub expired: u64,
    /// Total number of cached entries
    pub entries: usize,
    /// Total size of cached data in bytes
    pub size_bytes: u64,
}

impl CacheStats {
    /// Get hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Process-wide local cache
pub struct LocalCache {
    /// Cache directory; `None` when running without a cache
    cache_dir: Option<PathBuf>,
    /// In-memory index of cached entries
    index: RwLock<HashMap<String, CacheEntry>>,
    /// Cache statistics
    stats: RwLock<CacheStats>,
    /// Sequence for temporary file names
    write_seq: AtomicU64,
    /// Exclusive lock on the cache directory, released on drop
    _dir_lock: Option<File>,
}

impl LocalCache {
    /// Open (or create) the cache directory at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let cache_dir = path.as_ref().to_path_buf();
        let unavailable = |reason: String| StorageError::CacheUnavailable {
            path: cache_dir.clone(),
            reason,
        };

        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir)
                .await
                .map_err(|e| unavailable(format!("failed to create directory: {}", e)))?;

            // Set restrictive permissions on Unix
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&cache_dir, std::fs::Permissions::from_mode(0o700))
                    .await
                    .map_err(|e| unavailable(format!("failed to set permissions: {}", e)))?;
            }

            info!("Created cache directory: {}", cache_dir.display());
        }

        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(cache_dir.join(LOCK_FILE))
            .map_err(|e| unavailable(format!("failed to open lock file: {}", e)))?;
        let locked = lock_file
            .try_lock_exclusive()
            .map_err(|e| unavailable(format!("failed to lock directory: {}", e)))?;
        if !locked {
            return Err(unavailable(
                "directory is in use by another instance".to_string(),
            ));
        }

        let index = Self::load_index(&cache_dir)
            .await
            .map_err(|e| unavailable(format!("failed to read directory: {}", e)))?;

        Ok(Self {
            cache_dir: Some(cache_dir),
            index: RwLock::new(index),
            stats: RwLock::new(CacheStats::default()),
            write_seq: AtomicU64::new(0),
            _dir_lock: Some(lock_file),
        })
    }

    /// A cache that stores nothing: every lookup is a miss and writes are dropped
    pub fn disabled() -> Self {
        Self {
            cache_dir: None,
            index: RwLock::new(HashMap::new()),
            stats: RwLock::new(CacheStats::default()),
            write_seq: AtomicU64::new(0),
            _dir_lock: None,
        }
    }

    /// Check if caching is enabled
    pub fn is_enabled(&self) -> bool {
        self.cache_dir.is_some()
    }

    /// Cache directory, if enabled
    pub fn path(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    /// Check if a key is cached and not expired
    pub async fn exists(&self, key: &str) -> bool {
        let index = self.index.read().await;
        index.get(key).map(|e| !e.is_expired()).unwrap_or(false)
    }

    /// Get a cached payload if present and not expired
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        if !self.is_enabled() {
            return None;
        }

        let lookup = {
            let index = self.index.read().await;
            index.get(key).cloned()
        };

        match lookup {
            Some(entry) if entry.is_expired() => {
                debug!("Cache entry expired for: {}", key);
                {
                    let mut stats = self.stats.write().await;
                    stats.expired += 1;
                    stats.misses += 1;
                }
                if let Err(e) = self.invalidate(key).await {
                    warn!("Failed to evict expired cache entry {}: {}", key, e);
                }
                None
            }
            Some(entry) => match entry.decode_value() {
                Some(value) => {
                    debug!(
                        "Cache hit for: {} (TTL remaining: {}s)",
                        key,
                        entry.remaining_ttl()
                    );
                    self.stats.write().await.hits += 1;
                    Some(value)
                }
                None => {
                    warn!("Cache entry for {} is corrupt, discarding", key);
                    self.stats.write().await.misses += 1;
                    if let Err(e) = self.invalidate(key).await {
                        warn!("Failed to evict corrupt cache entry {}: {}", key, e);
                    }
                    None
                }
            },
            None => {
                debug!("Cache miss for: {}", key);
                self.stats.write().await.misses += 1;
                None
            }
        }
    }

    /// Store a payload that stays visible for `ttl`
    pub async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let Some(cache_dir) = &self.cache_dir else {
            return Ok(());
        };

        let entry = CacheEntry::new(key, value, ttl);
        let cache_file = Self::cache_file_path(cache_dir, key);
        let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
        let tmp_file = cache_file.with_extension(format!("json.tmp{}", seq));

        let json = serde_json::to_vec(&entry).map_err(|e| self.io_error(e.to_string()))?;

        fs::write(&tmp_file, &json)
            .await
            .map_err(|e| self.io_error(format!("failed to write cache file: {}", e)))?;

        // Set restrictive permissions on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp_file, std::fs::Permissions::from_mode(0o600))
                .await
                .ok(); // Ignore errors, not critical
        }

        fs::rename(&tmp_file, &cache_file)
            .await
            .map_err(|e| self.io_error(format!("failed to replace cache file: {}", e)))?;

        let mut index = self.index.write().await;
        index.insert(key.to_string(), entry);

        debug!("Cached {} ({} bytes, TTL: {}s)", key, value.len(), ttl.as_secs());

        Ok(())
    }

    /// Invalidate (remove) a cached entry
    pub async fn invalidate(&self, key: &str) -> Result<()> {
        let Some(cache_dir) = &self.cache_dir else {
            return Ok(());
        };

        let mut index = self.index.write().await;
        index.remove(key);

        let cache_file = Self::cache_file_path(cache_dir, key);
        match fs::remove_file(&cache_file).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(self.io_error(format!(
                    "failed to remove cache file {}: {}",
                    cache_file.display(),
                    e
                )))
            }
        }

        debug!("Invalidated cache entry: {}", key);

        Ok(())
    }

    /// Clear all cached entries
    pub async fn clear(&self) -> Result<()> {
        let Some(cache_dir) = &self.cache_dir else {
            return Ok(());
        };

        let mut index = self.index.write().await;
        index.clear();

        let mut entries = fs::read_dir(cache_dir)
            .await
            .map_err(|e| self.io_error(e.to_string()))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| self.io_error(e.to_string()))?
        {
            let path = entry.path();
            if path.is_file() && path.file_name().is_some_and(|n| n != LOCK_FILE) {
                fs::remove_file(&path)
                    .await
                    .map_err(|e| self.io_error(e.to_string()))?;
            }
        }

        let mut stats = self.stats.write().await;
        *stats = CacheStats::default();

        info!("Cleared local cache");

        Ok(())
    }

    /// Clean up expired cache entries
    pub async fn cleanup_expired(&self) -> Result<usize> {
        let expired_keys: Vec<String> = {
            let index = self.index.read().await;
            index
                .iter()
                .filter(|(_, entry)| entry.is_expired())
                .map(|(key, _)| key.clone())
                .collect()
        };

        for key in &expired_keys {
            self.invalidate(key).await?;
        }

        if !expired_keys.is_empty() {
            info!("Cleaned up {} expired cache entries", expired_keys.len());
        }

        Ok(expired_keys.len())
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        let stats = self.stats.read().await;
        let index = self.index.read().await;

        let mut result = stats.clone();
        result.entries = index.len();
        result.size_bytes = index.values().map(CacheEntry::size_bytes).sum();

        result
    }

    /// Build the index from the cache directory
    ///
    /// Expired, corrupt and half-written files are deleted.
    async fn load_index(dir: &Path) -> std::io::Result<HashMap<String, CacheEntry>> {
        let mut index = HashMap::new();
        let mut stale = Vec::new();
        let mut read_dir = fs::read_dir(dir).await?;

        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some("json") => {}
                Some(ext) if ext.starts_with("tmp") => {
                    stale.push(path);
                    continue;
                }
                _ => continue,
            }

            let cache_entry = match fs::read(&path).await {
                Ok(content) => match serde_json::from_slice::<CacheEntry>(&content) {
                    Ok(cache_entry) => cache_entry,
                    Err(e) => {
                        warn!("Discarding unparsable cache file {}: {}", path.display(), e);
                        stale.push(path);
                        continue;
                    }
                },
                Err(e) => {
                    warn!("Failed to read cache file {}: {}", path.display(), e);
                    continue;
                }
            };

            if cache_entry.is_expired() {
                stale.push(path);
            } else if cache_entry.decode_value().is_none() {
                warn!("Discarding corrupt cache entry for {}", cache_entry.key);
                stale.push(path);
            } else {
                index.insert(cache_entry.key.clone(), cache_entry);
            }
        }

        for path in &stale {
            if let Err(e) = fs::remove_file(path).await {
                warn!("Failed to remove stale cache file {}: {}", path.display(), e);
            }
        }

        if !index.is_empty() || !stale.is_empty() {
            debug!(
                "Loaded {} cache entries ({} stale files removed)",
                index.len(),
                stale.len()
            );
        }

        Ok(index)
    }

    /// Get the file path for a cache key
    fn cache_file_path(cache_dir: &Path, key: &str) -> PathBuf {
        cache_dir.join(format!("{:x}.json", Sha256::digest(key.as_bytes())))
    }

    fn io_error(&self, reason: String) -> StorageError {
        StorageError::CacheUnavailable {
            path: self.cache_dir.clone().unwrap_or_default(),
            reason,
        }
    }
}

impl std::fmt::Debug for LocalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCache")
            .field("cache_dir", &self.cache_dir)
            .finish_non_exhaustive()
    }
}
