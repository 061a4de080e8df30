//! Error types for certstash-storage

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::store::ObjectStoreError;

/// Result type alias using certstash-storage's Error type
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors surfaced by the storage facade and its components
#[derive(Error, Debug)]
pub enum StorageError {
    /// Object is absent, unreadable or could not be decrypted
    #[error("Key not found: {key}")]
    NotFound { key: String },

    /// Encryption key has the wrong size
    #[error("Encryption key must be exactly {expected} bytes, got {actual} bytes")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Bucket does not exist at construction time
    #[error("S3 bucket {bucket} does not exist")]
    BucketMissing { bucket: String },

    /// Lock could not be acquired before the deadline
    #[error("Timed out acquiring lock for {key} after {waited:?}")]
    LockTimeout { key: String, waited: Duration },

    /// Ciphertext failed authentication or was malformed
    #[error("Payload authentication failed")]
    AuthenticationFailed,

    /// Encrypting a payload failed
    #[error("Failed to seal payload")]
    SealFailed,

    /// The local cache directory could not be opened
    #[error("Local cache at {path} is unavailable: {reason}")]
    CacheUnavailable { path: PathBuf, reason: String },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Error reported by the remote object store, propagated unchanged
    #[error(transparent)]
    Store(#[from] ObjectStoreError),
}

impl StorageError {
    /// Create a not found error
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Create an invalid config error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Check whether this error means the key does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::Store(ObjectStoreError::NotFound { .. })
        )
    }
}
