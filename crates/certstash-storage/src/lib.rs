//! Certificate storage on S3-compatible object stores
//!
//! This crate provides the storage backend a TLS certificate manager uses to
//! persist certificates, keys and account data:
//! - **Remote store**: any S3-compatible service, behind the [`ObjectStore`] trait
//! - **Encryption**: optional XChaCha20-Poly1305 sealing of every stored value
//! - **Local cache**: a TTL-bound on-disk read-through cache
//! - **Locking**: advisory cross-process locks built from sentinel objects
//!
//! ```no_run
//! # async fn demo() -> certstash_storage::Result<()> {
//! use certstash_storage::{CertStorage, StorageConfig};
//!
//! let config = StorageConfig::from_yaml_str("bucket: my-certificates\nprefix: prod\n")?;
//! let storage = CertStorage::connect(&config).await?;
//!
//! storage.lock("example.com/cert.pem").await?;
//! storage.store("example.com/cert.pem", b"-----BEGIN CERTIFICATE-----").await?;
//! storage.unlock("example.com/cert.pem").await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod lock;
pub mod storage;
pub mod store;
pub mod transform;
pub mod types;

// Re-export commonly used items
pub use cache::{CacheStats, LocalCache};
pub use config::{CacheConfig, CacheFailurePolicy, CachedKeyPolicy, LockConfig, StorageConfig};
pub use error::{Result, StorageError};
pub use lock::DistributedLock;
pub use storage::{CertStorage, StorageBuilder};
pub use store::{MemoryObjectStore, ObjectMeta, ObjectStore, ObjectStoreError, S3ObjectStore};
pub use transform::EncryptionTransform;
pub use types::{KeyInfo, LockRecord, ObjectNamer};
