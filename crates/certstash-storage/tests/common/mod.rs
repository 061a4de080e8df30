//! Common test utilities for certstash-storage
//!
//! Builds facades over an in-memory object store with the cache in a
//! temporary directory, so tests can inspect both sides.

#![allow(dead_code)]

use certstash_storage::{
    CacheConfig, CertStorage, LockConfig, MemoryObjectStore, StorageBuilder,
};
use std::sync::Arc;
use tempfile::TempDir;

pub const BUCKET: &str = "certs";
pub const PREFIX: &str = "prod";
pub const KEY: &[u8] = b"supersecretkeyofexactly32bytes!!";

/// A facade plus handles to everything behind it
pub struct Harness {
    pub storage: CertStorage,
    pub store: Arc<MemoryObjectStore>,
    pub cache_dir: TempDir,
}

impl Harness {
    /// Raw object body as the remote store holds it
    pub fn remote(&self, key: &str) -> Option<Vec<u8>> {
        self.store.object(BUCKET, &self.storage.object_name(key))
    }
}

/// Lock settings that keep tests fast
pub fn fast_lock() -> LockConfig {
    LockConfig {
        poll_interval_ms: 20,
        timeout_seconds: 1,
        ..Default::default()
    }
}

/// Builder for test facades
pub struct HarnessBuilder {
    store: Arc<MemoryObjectStore>,
    encryption_key: Option<Vec<u8>>,
    ttl_seconds: u64,
    invalidate_on_write: bool,
    lock: LockConfig,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            store: Arc::new(MemoryObjectStore::with_bucket(BUCKET)),
            encryption_key: None,
            ttl_seconds: 3600,
            invalidate_on_write: false,
            lock: fast_lock(),
        }
    }
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(mut self, store: Arc<MemoryObjectStore>) -> Self {
        self.store = store;
        self
    }

    pub fn encrypted(mut self) -> Self {
        self.encryption_key = Some(KEY.to_vec());
        self
    }

    pub fn ttl_seconds(mut self, ttl: u64) -> Self {
        self.ttl_seconds = ttl;
        self
    }

    pub fn invalidate_on_write(mut self) -> Self {
        self.invalidate_on_write = true;
        self
    }

    pub fn lock(mut self, lock: LockConfig) -> Self {
        self.lock = lock;
        self
    }

    pub async fn build(self) -> Harness {
        let cache_dir = tempfile::tempdir().expect("create cache dir");
        let cache_config = CacheConfig {
            path: cache_dir.path().join("cache"),
            ttl_seconds: self.ttl_seconds,
            invalidate_on_write: self.invalidate_on_write,
            ..Default::default()
        };

        let mut builder = StorageBuilder::new(self.store.clone(), BUCKET)
            .prefix(PREFIX)
            .cache_config(cache_config)
            .lock_config(self.lock);
        if let Some(key) = self.encryption_key {
            builder = builder.encryption_key(key);
        }

        let storage = builder.build().await.expect("build storage");
        Harness {
            storage,
            store: self.store,
            cache_dir,
        }
    }
}
