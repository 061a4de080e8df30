//! In-memory object store
//!
//! Holds objects in a process-local map. Request counters make it possible
//! to assert how many round trips an operation costs.

use super::{ObjectMeta, ObjectStore, ObjectStoreError};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    last_modified: DateTime<Utc>,
}

/// Per-operation request counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestCounts {
    pub get: u64,
    pub put: u64,
    pub remove: u64,
    pub stat: u64,
    pub list: u64,
}

impl RequestCounts {
    /// Total number of object requests
    pub fn total(&self) -> u64 {
        self.get + self.put + self.remove + self.stat + self.list
    }
}

#[derive(Debug, Default)]
struct Counters {
    get: AtomicU64,
    put: AtomicU64,
    remove: AtomicU64,
    stat: AtomicU64,
    list: AtomicU64,
}

/// Thread-safe in-memory [`ObjectStore`]
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    buckets: RwLock<HashSet<String>>,
    objects: RwLock<BTreeMap<(String, String), StoredObject>>,
    counters: Counters,
}

impl MemoryObjectStore {
    /// Create a store with no buckets
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store containing a single empty bucket
    pub fn with_bucket(bucket: impl Into<String>) -> Self {
        let store = Self::new();
        store.create_bucket(bucket);
        store
    }

    /// Create a bucket if it does not exist yet
    pub fn create_bucket(&self, bucket: impl Into<String>) {
        if let Ok(mut buckets) = self.buckets.write() {
            buckets.insert(bucket.into());
        }
    }

    /// Insert an object with an explicit modification time, bypassing counters
    pub fn insert_object(
        &self,
        bucket: &str,
        name: &str,
        data: impl Into<Vec<u8>>,
        last_modified: DateTime<Utc>,
    ) {
        if let Ok(mut objects) = self.objects.write() {
            objects.insert(
                (bucket.to_string(), name.to_string()),
                StoredObject {
                    data: data.into(),
                    last_modified,
                },
            );
        }
    }

    /// Read an object body directly, bypassing counters
    pub fn object(&self, bucket: &str, name: &str) -> Option<Vec<u8>> {
        self.objects
            .read()
            .ok()?
            .get(&(bucket.to_string(), name.to_string()))
            .map(|o| o.data.clone())
    }

    /// Snapshot of the request counters
    pub fn request_counts(&self) -> RequestCounts {
        RequestCounts {
            get: self.counters.get.load(Ordering::Relaxed),
            put: self.counters.put.load(Ordering::Relaxed),
            remove: self.counters.remove.load(Ordering::Relaxed),
            stat: self.counters.stat.load(Ordering::Relaxed),
            list: self.counters.list.load(Ordering::Relaxed),
        }
    }

    fn ensure_bucket(&self, bucket: &str) -> Result<(), ObjectStoreError> {
        let buckets = self
            .buckets
            .read()
            .map_err(|_| anyhow!("bucket table poisoned"))?;
        if buckets.contains(bucket) {
            Ok(())
        } else {
            Err(ObjectStoreError::Backend(anyhow!(
                "The specified bucket does not exist: {}",
                bucket
            )))
        }
    }

    fn lookup(&self, bucket: &str, name: &str) -> Result<StoredObject, ObjectStoreError> {
        self.ensure_bucket(bucket)?;
        let objects = self
            .objects
            .read()
            .map_err(|_| anyhow!("object table poisoned"))?;
        objects
            .get(&(bucket.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ObjectStoreError::not_found(name))
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, ObjectStoreError> {
        let buckets = self
            .buckets
            .read()
            .map_err(|_| anyhow!("bucket table poisoned"))?;
        Ok(buckets.contains(bucket))
    }

    async fn get_object(&self, bucket: &str, name: &str) -> Result<Vec<u8>, ObjectStoreError> {
        self.counters.get.fetch_add(1, Ordering::Relaxed);
        debug!("memory get {}/{}", bucket, name);
        self.lookup(bucket, name).map(|o| o.data)
    }

    async fn put_object(
        &self,
        bucket: &str,
        name: &str,
        data: Vec<u8>,
    ) -> Result<(), ObjectStoreError> {
        self.counters.put.fetch_add(1, Ordering::Relaxed);
        debug!("memory put {}/{} ({} bytes)", bucket, name, data.len());
        self.ensure_bucket(bucket)?;
        let mut objects = self
            .objects
            .write()
            .map_err(|_| anyhow!("object table poisoned"))?;
        objects.insert(
            (bucket.to_string(), name.to_string()),
            StoredObject {
                data,
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn remove_object(&self, bucket: &str, name: &str) -> Result<(), ObjectStoreError> {
        self.counters.remove.fetch_add(1, Ordering::Relaxed);
        debug!("memory remove {}/{}", bucket, name);
        self.ensure_bucket(bucket)?;
        let mut objects = self
            .objects
            .write()
            .map_err(|_| anyhow!("object table poisoned"))?;
        objects.remove(&(bucket.to_string(), name.to_string()));
        Ok(())
    }

    async fn stat_object(&self, bucket: &str, name: &str) -> Result<ObjectMeta, ObjectStoreError> {
        self.counters.stat.fetch_add(1, Ordering::Relaxed);
        let object = self.lookup(bucket, name)?;
        Ok(ObjectMeta {
            size: object.data.len() as u64,
            last_modified: object.last_modified,
        })
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        recursive: bool,
    ) -> Result<Vec<String>, ObjectStoreError> {
        self.counters.list.fetch_add(1, Ordering::Relaxed);
        self.ensure_bucket(bucket)?;
        let objects = self
            .objects
            .read()
            .map_err(|_| anyhow!("object table poisoned"))?;

        let mut names = BTreeSet::new();
        for (object_bucket, name) in objects.keys() {
            if object_bucket != bucket || !name.starts_with(prefix) {
                continue;
            }
            if recursive {
                names.insert(name.clone());
                continue;
            }
            // Collapse everything below the next delimiter into one common prefix
            let rest = &name[prefix.len()..];
            match rest.find('/') {
                Some(idx) => names.insert(format!("{}{}", prefix, &rest[..=idx])),
                None => names.insert(name.clone()),
            };
        }

        Ok(names.into_iter().collect())
    }
}
