//! Advisory distributed lock
//!
//! A lock on key `k` is a sentinel object `<prefix>/k.lock` whose body is the
//! RFC 3339 time it was taken. Acquisition polls the sentinel:
//!
//! - absent: write a fresh sentinel and succeed
//! - unparsable or older than the expiration: overwrite it and succeed
//! - otherwise: sleep one poll interval and retry until the deadline
//!
//! Reading and writing the sentinel are separate requests, so two processes
//! can both see "absent" and both write. Last writer wins; callers get
//! "usually exclusive", not mutual exclusion.

use crate::cache::LocalCache;
use crate::config::{CachedKeyPolicy, LockConfig};
use crate::error::{Result, StorageError};
use crate::store::ObjectStore;
use crate::types::{payload_cache_key, LockRecord, ObjectNamer};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Polling lock built on sentinel objects
pub struct DistributedLock {
    store: Arc<dyn ObjectStore>,
    cache: Arc<LocalCache>,
    bucket: String,
    names: ObjectNamer,
    config: LockConfig,
}

impl DistributedLock {
    /// Create a lock manager for a bucket and object prefix
    pub fn new(
        store: Arc<dyn ObjectStore>,
        cache: Arc<LocalCache>,
        bucket: impl Into<String>,
        names: ObjectNamer,
        config: LockConfig,
    ) -> Self {
        Self {
            store,
            cache,
            bucket: bucket.into(),
            names,
            config,
        }
    }

    /// Lock configuration in use
    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Acquire the lock for `key`, waiting at most the configured timeout
    pub async fn acquire(&self, key: &str) -> Result<()> {
        self.acquire_until(key, Instant::now() + self.config.timeout())
            .await
    }

    /// Acquire the lock for `key`, giving up at `deadline` or after the
    /// configured timeout, whichever comes first
    ///
    /// Dropping the returned future abandons the attempt without side effects
    /// beyond a sentinel that may already have been written.
    pub async fn acquire_until(&self, key: &str, deadline: Instant) -> Result<()> {
        if self.skips(key).await {
            debug!("Skipping lock for cached key: {}", key);
            return Ok(());
        }

        let started = Instant::now();
        let deadline = deadline.min(started + self.config.timeout());
        let lock_name = self.names.lock_name(key);

        loop {
            match self.store.get_object(&self.bucket, &lock_name).await {
                Err(e) if e.is_not_found() => return self.write_sentinel(key, &lock_name).await,
                Err(e) => warn!("Failed to read lock sentinel {}: {}", lock_name, e),
                Ok(body) => match LockRecord::parse(&body) {
                    None => {
                        warn!("Lock sentinel {} is unreadable, reclaiming", lock_name);
                        return self.write_sentinel(key, &lock_name).await;
                    }
                    Some(record) if record.is_expired(self.config.expiration()) => {
                        info!(
                            "Lock sentinel {} from {} expired, reclaiming",
                            lock_name, record.acquired_at
                        );
                        return self.write_sentinel(key, &lock_name).await;
                    }
                    Some(record) => {
                        debug!("Lock {} held since {}, waiting", key, record.acquired_at);
                    }
                },
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(StorageError::LockTimeout {
                    key: key.to_string(),
                    waited: now - started,
                });
            }
            tokio::time::sleep(self.config.poll_interval().min(deadline - now)).await;
        }
    }

    /// Release the lock for `key` by deleting its sentinel
    ///
    /// Deletion errors are returned, not retried.
    pub async fn release(&self, key: &str) -> Result<()> {
        if self.skips(key).await {
            debug!("Skipping unlock for cached key: {}", key);
            return Ok(());
        }

        let lock_name = self.names.lock_name(key);
        self.store.remove_object(&self.bucket, &lock_name).await?;
        debug!("Released lock: {}", key);
        Ok(())
    }

    async fn skips(&self, key: &str) -> bool {
        self.config.cached_key_policy == CachedKeyPolicy::SkipWhenCached
            && self.cache.exists(&payload_cache_key(key)).await
    }

    async fn write_sentinel(&self, key: &str, lock_name: &str) -> Result<()> {
        self.store
            .put_object(&self.bucket, lock_name, LockRecord::now().to_body())
            .await?;
        debug!("Acquired lock: {}", key);
        Ok(())
    }
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("bucket", &self.bucket)
            .field("names", &self.names)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryObjectStore;
    use chrono::Utc;
    use std::time::Duration;

    const BUCKET: &str = "certs";

    fn fast_config() -> LockConfig {
        LockConfig {
            expiration_seconds: 15,
            poll_interval_ms: 20,
            timeout_seconds: 1,
            cached_key_policy: CachedKeyPolicy::AlwaysLock,
        }
    }

    fn lock_with(
        store: Arc<MemoryObjectStore>,
        cache: Arc<LocalCache>,
        config: LockConfig,
    ) -> DistributedLock {
        DistributedLock::new(store, cache, BUCKET, ObjectNamer::new("prod"), config)
    }

    #[tokio::test]
    async fn test_acquire_writes_sentinel() {
        let store = Arc::new(MemoryObjectStore::with_bucket(BUCKET));
        let lock = lock_with(store.clone(), Arc::new(LocalCache::disabled()), fast_config());

        lock.acquire("cert/a").await.unwrap();

        let body = store.object(BUCKET, "prod/cert/a.lock").unwrap();
        let record = LockRecord::parse(&body).unwrap();
        assert!(!record.is_expired(Duration::from_secs(15)));
    }

    #[tokio::test]
    async fn test_second_acquire_times_out() {
        let store = Arc::new(MemoryObjectStore::with_bucket(BUCKET));
        let lock = lock_with(store.clone(), Arc::new(LocalCache::disabled()), fast_config());

        lock.acquire("cert/a").await.unwrap();

        let err = lock.acquire("cert/a").await.unwrap_err();
        match err {
            StorageError::LockTimeout { key, waited } => {
                assert_eq!(key, "cert/a");
                assert!(waited >= Duration::from_millis(900));
            }
            other => panic!("expected LockTimeout, got {:?}", other),
        }
        assert!(store.request_counts().get > 2);
    }

    #[tokio::test]
    async fn test_release_then_reacquire() {
        let store = Arc::new(MemoryObjectStore::with_bucket(BUCKET));
        let lock = lock_with(store.clone(), Arc::new(LocalCache::disabled()), fast_config());

        lock.acquire("cert/a").await.unwrap();
        lock.release("cert/a").await.unwrap();
        assert!(store.object(BUCKET, "prod/cert/a.lock").is_none());

        lock.acquire("cert/a").await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_sentinel_is_reclaimed() {
        let store = Arc::new(MemoryObjectStore::with_bucket(BUCKET));
        let stale = LockRecord {
            acquired_at: Utc::now() - chrono::Duration::minutes(2),
        };
        store.insert_object(BUCKET, "prod/cert/a.lock", stale.to_body(), Utc::now());
        let lock = lock_with(store.clone(), Arc::new(LocalCache::disabled()), fast_config());

        lock.acquire("cert/a").await.unwrap();

        let record = LockRecord::parse(&store.object(BUCKET, "prod/cert/a.lock").unwrap()).unwrap();
        assert!(record.acquired_at > stale.acquired_at);
        assert_eq!(store.request_counts().get, 1);
    }

    #[tokio::test]
    async fn test_corrupt_sentinel_is_reclaimed() {
        let store = Arc::new(MemoryObjectStore::with_bucket(BUCKET));
        store.insert_object(BUCKET, "prod/cert/a.lock", b"garbage".to_vec(), Utc::now());
        let lock = lock_with(store.clone(), Arc::new(LocalCache::disabled()), fast_config());

        lock.acquire("cert/a").await.unwrap();

        let body = store.object(BUCKET, "prod/cert/a.lock").unwrap();
        assert!(LockRecord::parse(&body).is_some());
    }

    #[tokio::test]
    async fn test_caller_deadline_wins() {
        let store = Arc::new(MemoryObjectStore::with_bucket(BUCKET));
        let lock = lock_with(store, Arc::new(LocalCache::disabled()), fast_config());
        lock.acquire("cert/a").await.unwrap();

        let started = Instant::now();
        let err = lock
            .acquire_until("cert/a", Instant::now() + Duration::from_millis(100))
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::LockTimeout { .. }));
        assert!(started.elapsed() < Duration::from_millis(900));
    }

    #[tokio::test]
    async fn test_concurrent_acquire_only_one_wins() {
        let store = Arc::new(MemoryObjectStore::with_bucket(BUCKET));
        let lock = lock_with(store, Arc::new(LocalCache::disabled()), fast_config());

        let (a, b) = tokio::join!(lock.acquire("cert/a"), lock.acquire("cert/a"));
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
    }

    #[tokio::test]
    async fn test_skip_when_cached_policy() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(LocalCache::open(dir.path()).await.unwrap());
        cache
            .set(&payload_cache_key("cert/a"), b"pem", Duration::from_secs(3600))
            .await
            .unwrap();

        let store = Arc::new(MemoryObjectStore::with_bucket(BUCKET));
        let config = LockConfig {
            cached_key_policy: CachedKeyPolicy::SkipWhenCached,
            ..fast_config()
        };
        let lock = lock_with(store.clone(), cache.clone(), config);

        lock.acquire("cert/a").await.unwrap();
        lock.release("cert/a").await.unwrap();
        assert_eq!(store.request_counts().total(), 0);

        // Uncached keys still take the sentinel
        lock.acquire("cert/b").await.unwrap();
        assert!(store.object(BUCKET, "prod/cert/b.lock").is_some());
    }

    #[tokio::test]
    async fn test_always_lock_ignores_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(LocalCache::open(dir.path()).await.unwrap());
        cache
            .set(&payload_cache_key("cert/a"), b"pem", Duration::from_secs(3600))
            .await
            .unwrap();

        let store = Arc::new(MemoryObjectStore::with_bucket(BUCKET));
        let lock = lock_with(store.clone(), cache, fast_config());

        lock.acquire("cert/a").await.unwrap();
        assert!(store.object(BUCKET, "prod/cert/a.lock").is_some());
    }
}
