//! Remote object store abstraction
//!
//! The facade talks to the authoritative store only through [`ObjectStore`].
//! Two implementations ship with the crate:
//!
//! - [`S3ObjectStore`]: AWS S3 and S3-compatible services (MinIO, Backblaze B2, Wasabi)
//! - [`MemoryObjectStore`]: process-local store for tests and dry runs

pub mod memory;
pub mod s3;

pub use memory::MemoryObjectStore;
pub use s3::S3ObjectStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Metadata of a stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Object size in bytes
    pub size: u64,
    /// Last modification time reported by the store
    pub last_modified: DateTime<Utc>,
}

/// Errors reported by an object store backend
#[derive(Error, Debug)]
pub enum ObjectStoreError {
    /// The object does not exist
    #[error("Object not found: {key}")]
    NotFound { key: String },

    /// Any other backend failure (transport, auth, throttling, ...)
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl ObjectStoreError {
    /// Create a not found error
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Check whether this error means the object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Capabilities the storage layer needs from a remote object store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Check whether the bucket exists and is accessible
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, ObjectStoreError>;

    /// Download the full body of an object
    async fn get_object(&self, bucket: &str, name: &str) -> Result<Vec<u8>, ObjectStoreError>;

    /// Upload an object, replacing any existing one
    async fn put_object(
        &self,
        bucket: &str,
        name: &str,
        data: Vec<u8>,
    ) -> Result<(), ObjectStoreError>;

    /// Remove an object. Removing a missing object succeeds.
    async fn remove_object(&self, bucket: &str, name: &str) -> Result<(), ObjectStoreError>;

    /// Fetch object metadata without the body
    async fn stat_object(&self, bucket: &str, name: &str) -> Result<ObjectMeta, ObjectStoreError>;

    /// List object names under a prefix
    ///
    /// When `recursive` is false, names are grouped at the next `/` and each
    /// group is returned once as its common prefix.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        recursive: bool,
    ) -> Result<Vec<String>, ObjectStoreError>;
}
