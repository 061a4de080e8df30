//! Storage data model
//!
//! Records the facade hands to callers and the formats it persists in the
//! local cache and in lock sentinel objects.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Metadata about a stored key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    /// Logical key
    pub key: String,
    /// Size of the stored object in bytes
    pub size: u64,
    /// Last modification time of the stored object
    pub modified: DateTime<Utc>,
    /// Whether the key names a leaf object rather than a directory
    pub is_terminal: bool,
}

/// Cache key of a logical key's payload
pub fn payload_cache_key(key: &str) -> String {
    format!("p:{}", key)
}

/// Cache key of a logical key's [`KeyInfo`]
pub fn key_info_cache_key(key: &str) -> String {
    format!("m:{}", key)
}

/// Content of a lock sentinel object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRecord {
    /// When the lock was taken
    pub acquired_at: DateTime<Utc>,
}

impl LockRecord {
    /// A lock taken now
    pub fn now() -> Self {
        Self {
            acquired_at: Utc::now(),
        }
    }

    /// Parse a sentinel body (a single RFC 3339 timestamp)
    pub fn parse(body: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(body).ok()?;
        let acquired_at = DateTime::parse_from_rfc3339(text.trim()).ok()?;
        Some(Self {
            acquired_at: acquired_at.with_timezone(&Utc),
        })
    }

    /// Serialize to the sentinel body
    pub fn to_body(&self) -> Vec<u8> {
        self.acquired_at
            .to_rfc3339_opts(SecondsFormat::Secs, true)
            .into_bytes()
    }

    /// Check whether the lock is older than `expiration`
    pub fn is_expired(&self, expiration: Duration) -> bool {
        match chrono::Duration::from_std(expiration) {
            Ok(expiration) => self.acquired_at + expiration < Utc::now(),
            Err(_) => false,
        }
    }
}

/// Suffix of lock sentinel object names
pub const LOCK_SUFFIX: &str = ".lock";

/// Maps logical keys to remote object names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectNamer {
    prefix: String,
}

impl ObjectNamer {
    /// Create a namer for an object name prefix
    ///
    /// Trailing slashes are ignored; an empty prefix maps keys to themselves.
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix: String = prefix.into();
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    /// Object prefix in use
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Remote object name of a logical key (`<prefix>/<key>`)
    pub fn object_name(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix, key)
        }
    }

    /// Remote object name of the lock sentinel for a logical key
    pub fn lock_name(&self, key: &str) -> String {
        format!("{}{}", self.object_name(key), LOCK_SUFFIX)
    }

    /// Logical key of a remote object name, if it lives under the prefix
    pub fn key_of<'a>(&self, name: &'a str) -> Option<&'a str> {
        if self.prefix.is_empty() {
            return Some(name);
        }
        name.strip_prefix(self.prefix.as_str())?.strip_prefix('/')
    }
}

/// Cache record persisted on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cache key
    pub key: String,
    /// Payload bytes (base64)
    pub value: String,
    /// When the entry was written
    pub cached_at: DateTime<Utc>,
    /// When the entry stops being visible
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Create a new cache entry that expires `ttl` from now
    pub fn new(key: &str, value: &[u8], ttl: Duration) -> Self {
        let cached_at = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            key: key.to_string(),
            value: BASE64.encode(value),
            cached_at,
            expires_at: cached_at.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Check if the cache entry has expired
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Decode the payload
    pub fn decode_value(&self) -> Option<Vec<u8>> {
        BASE64.decode(&self.value).ok()
    }

    /// Size of the decoded payload in bytes
    pub fn size_bytes(&self) -> u64 {
        // base64 carries 3 bytes per 4 characters
        let padding = self.value.bytes().rev().take_while(|b| *b == b'=').count() as u64;
        ((self.value.len() as u64 / 4) * 3).saturating_sub(padding)
    }

    /// Get remaining TTL in seconds
    pub fn remaining_ttl(&self) -> u64 {
        (self.expires_at - Utc::now()).num_seconds().max(0) as u64
    }
}
