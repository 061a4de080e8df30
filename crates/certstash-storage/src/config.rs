//! Storage configuration
//!
//! Loaded from YAML or assembled by the embedding process. Every field except
//! `bucket` has a default, so a minimal config file is:
//!
//! ```yaml
//! bucket: my-certificates
//! prefix: prod
//! ```

use crate::error::{Result, StorageError};
use crate::store::s3::S3ConnectOptions;
use crate::transform::KEY_SIZE;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use zeroize::Zeroizing;

/// Marks an `encryption_key` given as base64
pub const BASE64_KEY_PREFIX: &str = "base64:";

/// Top-level storage configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Custom S3-compatible endpoint (optional)
    #[serde(default)]
    pub endpoint: Option<String>,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// S3 bucket name
    pub bucket: String,
    /// Static access key id (optional)
    #[serde(default)]
    pub access_key_id: Option<String>,
    /// Static secret access key (optional)
    #[serde(default)]
    pub secret_access_key: Option<String>,
    /// Object name prefix; keys are stored as `<prefix>/<key>`
    #[serde(default)]
    pub prefix: String,
    /// Optional 32-byte encryption key. Leave empty for cleartext storage.
    ///
    /// The UTF-8 bytes of the string are the key, unless it starts with
    /// `base64:`, in which case the rest is decoded.
    #[serde(default)]
    pub encryption_key: Option<String>,
    /// File holding the raw 32-byte encryption key (alternative to `encryption_key`)
    #[serde(default)]
    pub encryption_key_file: Option<PathBuf>,
    /// Local cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
    /// Lock configuration
    #[serde(default)]
    pub lock: LockConfig,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: default_region(),
            bucket: String::new(),
            access_key_id: None,
            secret_access_key: None,
            prefix: String::new(),
            encryption_key: None,
            encryption_key_file: None,
            cache: CacheConfig::default(),
            lock: LockConfig::default(),
        }
    }
}

impl StorageConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StorageError::invalid_config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml_ng::from_str(content)
            .map_err(|e| StorageError::invalid_config(format!("Failed to parse config: {}", e)))
    }

    /// Check the configuration before any network call is made
    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(StorageError::invalid_config("bucket must not be empty"));
        }
        if let Some(key) = self.encryption_key_bytes()? {
            if key.len() != KEY_SIZE {
                return Err(StorageError::InvalidKeyLength {
                    expected: KEY_SIZE,
                    actual: key.len(),
                });
            }
        }
        if self.lock.poll_interval_ms == 0 {
            return Err(StorageError::invalid_config(
                "lock.poll_interval_ms must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Raw encryption key bytes, if a non-empty key is configured
    pub fn encryption_key_bytes(&self) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let inline = self.encryption_key.as_deref().filter(|key| !key.is_empty());

        match (inline, &self.encryption_key_file) {
            (Some(_), Some(_)) => Err(StorageError::invalid_config(
                "set only one of encryption_key and encryption_key_file",
            )),
            (Some(key), None) => match key.strip_prefix(BASE64_KEY_PREFIX) {
                Some(encoded) => BASE64
                    .decode(encoded.trim())
                    .map(|bytes| Some(Zeroizing::new(bytes)))
                    .map_err(|e| {
                        StorageError::invalid_config(format!(
                            "encryption_key is not valid base64: {}",
                            e
                        ))
                    }),
                None => Ok(Some(Zeroizing::new(key.as_bytes().to_vec()))),
            },
            (None, Some(path)) => {
                let expanded = shellexpand::tilde(&path.to_string_lossy()).to_string();
                let bytes = std::fs::read(&expanded).map_err(|e| {
                    StorageError::invalid_config(format!(
                        "Failed to read key file {}: {}",
                        expanded, e
                    ))
                })?;
                Ok(Some(Zeroizing::new(bytes)))
            }
            (None, None) => Ok(None),
        }
    }

    /// Connection options for the S3 client
    pub fn s3_options(&self) -> S3ConnectOptions {
        S3ConnectOptions {
            region: self.region.clone(),
            endpoint: self.endpoint.clone(),
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self.secret_access_key.clone(),
        }
    }
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("prefix", &self.prefix)
            .field(
                "encryption_key",
                &self.encryption_key.as_ref().map(|_| "<redacted>"),
            )
            .field("encryption_key_file", &self.encryption_key_file)
            .field("cache", &self.cache)
            .field("lock", &self.lock)
            .finish()
    }
}

/// What to do when the local cache cannot be opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheFailurePolicy {
    /// Log a warning and run without a cache (default)
    #[default]
    Degrade,
    /// Abort construction
    Fail,
}

/// Local cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether caching is enabled
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    /// Cache directory
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
    /// TTL for cached payloads and metadata, in seconds
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
    /// Behavior when the cache directory cannot be opened
    #[serde(default)]
    pub on_open_failure: CacheFailurePolicy,
    /// Evict cached entries when a key is stored or deleted
    #[serde(default)]
    pub invalidate_on_write: bool,
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_ttl() -> u64 {
    3600 // 1 hour
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("/tmp/certstash-cache")
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            path: default_cache_path(),
            ttl_seconds: default_cache_ttl(),
            on_open_failure: CacheFailurePolicy::default(),
            invalidate_on_write: false,
        }
    }
}

impl CacheConfig {
    /// TTL as a duration
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    /// Cache directory with `~` expanded
    pub fn expanded_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path.to_string_lossy()).to_string())
    }
}

/// How the lock treats keys whose payload is already cached locally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CachedKeyPolicy {
    /// Always take the remote sentinel (default)
    #[default]
    AlwaysLock,
    /// Treat a cached key as available and skip the sentinel on lock and unlock
    ///
    /// Saves remote round trips but gives no exclusion against other writers.
    SkipWhenCached,
}

/// Distributed lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Age after which a sentinel is considered abandoned, in seconds
    #[serde(default = "default_lock_expiration")]
    pub expiration_seconds: u64,
    /// Delay between acquisition attempts, in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Maximum time spent acquiring a lock, in seconds
    #[serde(default = "default_lock_timeout")]
    pub timeout_seconds: u64,
    /// Cached-key shortcut policy
    #[serde(default)]
    pub cached_key_policy: CachedKeyPolicy,
}

fn default_lock_expiration() -> u64 {
    15
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_lock_timeout() -> u64 {
    15
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            expiration_seconds: default_lock_expiration(),
            poll_interval_ms: default_poll_interval(),
            timeout_seconds: default_lock_timeout(),
            cached_key_policy: CachedKeyPolicy::default(),
        }
    }
}

impl LockConfig {
    /// Sentinel expiration as a duration
    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_seconds)
    }

    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Acquisition timeout as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}
