//! Certificate storage facade
//!
//! [`CertStorage`] is what a certificate manager talks to. It combines the
//! remote object store, the local cache, the encryption transform and the
//! distributed lock:
//!
//! - `load` reads through the cache; misses are fetched, decrypted and cached
//! - `store` and `delete` go straight to the remote store and leave the cache
//!   alone unless `invalidate_on_write` is set, so a cached value can be up to
//!   one TTL stale
//! - `stat` caches [`KeyInfo`] in a cache namespace disjoint from payloads
//! - `exists` and `list` always ask the remote store

use crate::cache::LocalCache;
use crate::config::{CacheConfig, CacheFailurePolicy, LockConfig, StorageConfig};
use crate::error::{Result, StorageError};
use crate::lock::DistributedLock;
use crate::store::{ObjectStore, ObjectStoreError, S3ObjectStore};
use crate::transform::EncryptionTransform;
use crate::types::{key_info_cache_key, payload_cache_key, KeyInfo, ObjectNamer};
use anyhow::anyhow;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// How long construction waits for the bucket check
pub const BUCKET_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Cached, optionally encrypted key/value storage on an object store
pub struct CertStorage {
    store: Arc<dyn ObjectStore>,
    cache: Arc<LocalCache>,
    transform: EncryptionTransform,
    lock: DistributedLock,
    bucket: String,
    names: ObjectNamer,
    cache_ttl: Duration,
    invalidate_on_write: bool,
}

impl CertStorage {
    /// Connect to S3 using a full configuration
    ///
    /// Validates the configuration, builds the S3 client, checks that the
    /// bucket exists and opens the local cache.
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        config.validate()?;
        let store = S3ObjectStore::connect(&config.s3_options()).await;
        StorageBuilder::from_config(Arc::new(store), config)?
            .build()
            .await
    }

    /// Start building a facade over any object store
    pub fn builder(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> StorageBuilder {
        StorageBuilder::new(store, bucket)
    }

    /// Local cache handle
    pub fn cache(&self) -> &Arc<LocalCache> {
        &self.cache
    }

    /// Active encryption transform
    pub fn transform(&self) -> &EncryptionTransform {
        &self.transform
    }

    /// Bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Remote object name of a logical key
    pub fn object_name(&self, key: &str) -> String {
        self.names.object_name(key)
    }

    /// Store a value
    pub async fn store(&self, key: &str, value: &[u8]) -> Result<()> {
        let stored = self.transform.wrap(value)?;
        self.store
            .put_object(&self.bucket, &self.names.object_name(key), stored)
            .await?;
        debug!("Stored {} ({} bytes)", key, value.len());

        if self.invalidate_on_write {
            self.invalidate(key).await;
        }
        Ok(())
    }

    /// Load a value, preferring the local cache
    ///
    /// Missing, unreadable and undecryptable objects all surface as
    /// [`StorageError::NotFound`]; the cause is logged.
    pub async fn load(&self, key: &str) -> Result<Vec<u8>> {
        let cache_key = payload_cache_key(key);
        if let Some(value) = self.cache.get(&cache_key).await {
            return Ok(value);
        }

        let stored = match self
            .store
            .get_object(&self.bucket, &self.names.object_name(key))
            .await
        {
            Ok(stored) => stored,
            Err(ObjectStoreError::NotFound { .. }) => {
                debug!("Key not found in store: {}", key);
                return Err(StorageError::not_found(key));
            }
            Err(e) => {
                warn!("Failed to read {} from store: {}", key, e);
                return Err(StorageError::not_found(key));
            }
        };

        let value = self.transform.unwrap(&stored).map_err(|e| {
            warn!("Stored object for {} could not be decoded: {}", key, e);
            StorageError::not_found(key)
        })?;

        if let Err(e) = self.cache.set(&cache_key, &value, self.cache_ttl).await {
            warn!("Failed to cache {}: {}", key, e);
        }

        Ok(value)
    }

    /// Delete a value
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.store
            .remove_object(&self.bucket, &self.names.object_name(key))
            .await?;
        debug!("Deleted {}", key);

        if self.invalidate_on_write {
            self.invalidate(key).await;
        }
        Ok(())
    }

    /// Check whether a key exists in the remote store
    pub async fn exists(&self, key: &str) -> bool {
        self.store
            .stat_object(&self.bucket, &self.names.object_name(key))
            .await
            .is_ok()
    }

    /// Get metadata about a key, preferring the local cache
    ///
    /// Remote errors are returned unchanged.
    pub async fn stat(&self, key: &str) -> Result<KeyInfo> {
        let cache_key = key_info_cache_key(key);

        if let Some(raw) = self.cache.get(&cache_key).await {
            match serde_json::from_slice::<KeyInfo>(&raw) {
                Ok(info) => return Ok(info),
                Err(e) => debug!("Ignoring unreadable cached key info for {}: {}", key, e),
            }
        }

        let meta = self
            .store
            .stat_object(&self.bucket, &self.names.object_name(key))
            .await?;

        let info = KeyInfo {
            key: key.to_string(),
            size: meta.size,
            modified: meta.last_modified,
            is_terminal: true,
        };

        match serde_json::to_vec(&info) {
            Ok(raw) => {
                if let Err(e) = self.cache.set(&cache_key, &raw, self.cache_ttl).await {
                    warn!("Failed to cache key info for {}: {}", key, e);
                }
            }
            Err(e) => warn!("Failed to serialize key info for {}: {}", key, e),
        }

        Ok(info)
    }

    /// List keys under a prefix
    ///
    /// Returned names are logical keys. With `recursive` false, deeper keys
    /// are grouped into their common prefix ending in `/`.
    pub async fn list(&self, prefix: &str, recursive: bool) -> Result<Vec<String>> {
        let names = self
            .store
            .list_objects(&self.bucket, &self.names.object_name(prefix), recursive)
            .await?;

        Ok(names
            .iter()
            .filter_map(|name| self.names.key_of(name))
            .map(String::from)
            .collect())
    }

    /// Acquire the lock for a key
    pub async fn lock(&self, key: &str) -> Result<()> {
        self.lock.acquire(key).await
    }

    /// Acquire the lock for a key, giving up at `deadline`
    pub async fn lock_until(&self, key: &str, deadline: Instant) -> Result<()> {
        self.lock.acquire_until(key, deadline).await
    }

    /// Release the lock for a key
    pub async fn unlock(&self, key: &str) -> Result<()> {
        self.lock.release(key).await
    }

    async fn invalidate(&self, key: &str) {
        for cache_key in [payload_cache_key(key), key_info_cache_key(key)] {
            if let Err(e) = self.cache.invalidate(&cache_key).await {
                warn!("Failed to invalidate cache entry {}: {}", cache_key, e);
            }
        }
    }
}

impl std::fmt::Debug for CertStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertStorage")
            .field("bucket", &self.bucket)
            .field("names", &self.names)
            .field("transform", &self.transform)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

/// Assembles a [`CertStorage`]
pub struct StorageBuilder {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    prefix: String,
    encryption_key: Option<Zeroizing<Vec<u8>>>,
    cache: Option<Arc<LocalCache>>,
    cache_config: CacheConfig,
    lock_config: LockConfig,
    check_bucket: bool,
}

impl StorageBuilder {
    /// Create a builder with default cache and lock settings
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            prefix: String::new(),
            encryption_key: None,
            cache: None,
            cache_config: CacheConfig::default(),
            lock_config: LockConfig::default(),
            check_bucket: true,
        }
    }

    /// Create a builder from a full configuration
    ///
    /// Fails if the configured key file cannot be read or the key is malformed.
    pub fn from_config(store: Arc<dyn ObjectStore>, config: &StorageConfig) -> Result<Self> {
        Ok(Self {
            store,
            bucket: config.bucket.clone(),
            prefix: config.prefix.clone(),
            encryption_key: config.encryption_key_bytes()?,
            cache: None,
            cache_config: config.cache.clone(),
            lock_config: config.lock.clone(),
            check_bucket: true,
        })
    }

    /// Set the object name prefix
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the encryption key (32 bytes); an empty key means cleartext
    pub fn encryption_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.encryption_key = Some(Zeroizing::new(key.into()));
        self
    }

    /// Use an already opened cache instead of opening one from the cache config
    pub fn cache(mut self, cache: Arc<LocalCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Set the cache configuration
    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    /// Set the lock configuration
    pub fn lock_config(mut self, config: LockConfig) -> Self {
        self.lock_config = config;
        self
    }

    /// Skip the bucket existence check
    pub fn skip_bucket_check(mut self) -> Self {
        self.check_bucket = false;
        self
    }

    /// Build the facade
    pub async fn build(self) -> Result<CertStorage> {
        let transform = EncryptionTransform::from_key(self.encryption_key.as_deref().map(|k| &k[..]))?;

        if self.check_bucket {
            self.check_bucket_exists().await?;
        }

        let cache = match self.cache {
            Some(cache) => cache,
            None => Arc::new(open_cache(&self.cache_config).await?),
        };

        let names = ObjectNamer::new(self.prefix);
        let lock = DistributedLock::new(
            self.store.clone(),
            cache.clone(),
            self.bucket.clone(),
            names.clone(),
            self.lock_config,
        );

        info!(
            "Certificate storage ready (bucket: {}, prefix: {:?}, cache: {})",
            self.bucket,
            names.prefix(),
            if cache.is_enabled() { "on" } else { "off" }
        );

        Ok(CertStorage {
            store: self.store,
            cache,
            transform,
            lock,
            bucket: self.bucket,
            names,
            cache_ttl: self.cache_config.ttl(),
            invalidate_on_write: self.cache_config.invalidate_on_write,
        })
    }

    async fn check_bucket_exists(&self) -> Result<()> {
        let exists = tokio::time::timeout(
            BUCKET_CHECK_TIMEOUT,
            self.store.bucket_exists(&self.bucket),
        )
        .await
        .map_err(|_| {
            ObjectStoreError::Backend(anyhow!(
                "Timed out after {:?} checking bucket {}",
                BUCKET_CHECK_TIMEOUT,
                self.bucket
            ))
        })??;

        if !exists {
            return Err(StorageError::BucketMissing {
                bucket: self.bucket.clone(),
            });
        }
        Ok(())
    }
}

/// Open the cache described by `config`, applying its failure policy
async fn open_cache(config: &CacheConfig) -> Result<LocalCache> {
    if !config.enabled {
        info!("Local cache disabled");
        return Ok(LocalCache::disabled());
    }

    match LocalCache::open(config.expanded_path()).await {
        Ok(cache) => Ok(cache),
        Err(e) => match config.on_open_failure {
            CacheFailurePolicy::Fail => Err(e),
            CacheFailurePolicy::Degrade => {
                warn!("{}; continuing without a local cache", e);
                Ok(LocalCache::disabled())
            }
        },
    }
}
