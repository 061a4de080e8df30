//! CLI argument parsing with clap

use anyhow::{Context, Result};
use certstash_storage::StorageConfig;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Bucket used by `--memory` when none is configured
pub const MEMORY_BUCKET: &str = "certstash";

/// certstash - certificate storage on S3-compatible object stores
#[derive(Parser, Debug)]
#[command(name = "certstash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to a YAML storage config file
    #[arg(short, long, global = true, env = "CERTSTASH_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub storage: StorageArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Connection flags; each one overrides the config file
#[derive(Args, Debug, Default)]
pub struct StorageArgs {
    /// Custom S3-compatible endpoint (e.g., MinIO, Backblaze B2)
    #[arg(long, global = true, env = "CERTSTASH_ENDPOINT")]
    pub endpoint: Option<String>,

    /// AWS region
    #[arg(long, global = true, env = "CERTSTASH_REGION")]
    pub region: Option<String>,

    /// S3 bucket
    #[arg(long, global = true, env = "CERTSTASH_BUCKET")]
    pub bucket: Option<String>,

    /// Object name prefix
    #[arg(long, global = true, env = "CERTSTASH_PREFIX")]
    pub prefix: Option<String>,

    /// Static access key id
    #[arg(long, global = true, env = "CERTSTASH_ACCESS_KEY_ID")]
    pub access_key_id: Option<String>,

    /// Static secret access key
    #[arg(long, global = true, env = "CERTSTASH_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub secret_access_key: Option<String>,

    /// 32-byte encryption key; prefix with `base64:` for binary keys
    #[arg(long, global = true, env = "CERTSTASH_ENCRYPTION_KEY", hide_env_values = true)]
    pub encryption_key: Option<String>,

    /// File holding the raw 32-byte encryption key
    #[arg(long, global = true, env = "CERTSTASH_ENCRYPTION_KEY_FILE", conflicts_with = "encryption_key")]
    pub encryption_key_file: Option<PathBuf>,

    /// Local cache directory
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Disable the local cache
    #[arg(long, global = true)]
    pub no_cache: bool,

    /// Use a process-local in-memory store instead of S3
    #[arg(long, global = true)]
    pub memory: bool,
}

impl StorageArgs {
    /// Load the config file (if any) and apply flag overrides
    pub fn resolve(&self, config_path: Option<&std::path::Path>) -> Result<StorageConfig> {
        let mut config = match config_path {
            Some(path) => StorageConfig::from_yaml_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => StorageConfig::default(),
        };

        if let Some(endpoint) = &self.endpoint {
            config.endpoint = Some(endpoint.clone());
        }
        if let Some(region) = &self.region {
            config.region = region.clone();
        }
        if let Some(bucket) = &self.bucket {
            config.bucket = bucket.clone();
        }
        if let Some(prefix) = &self.prefix {
            config.prefix = prefix.clone();
        }
        if let Some(access_key_id) = &self.access_key_id {
            config.access_key_id = Some(access_key_id.clone());
        }
        if let Some(secret_access_key) = &self.secret_access_key {
            config.secret_access_key = Some(secret_access_key.clone());
        }
        if let Some(encryption_key) = &self.encryption_key {
            config.encryption_key = Some(encryption_key.clone());
            config.encryption_key_file = None;
        }
        if let Some(key_file) = &self.encryption_key_file {
            config.encryption_key_file = Some(key_file.clone());
            config.encryption_key = None;
        }
        if let Some(cache_dir) = &self.cache_dir {
            config.cache.path = cache_dir.clone();
        }
        if self.no_cache {
            config.cache.enabled = false;
        }
        if self.memory && config.bucket.is_empty() {
            config.bucket = MEMORY_BUCKET.to_string();
        }

        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the value of a key
    Get(GetArgs),

    /// Store a value from a file or stdin
    Put(PutArgs),

    /// Delete a key
    Rm(KeyArgs),

    /// Check whether a key exists (exit status 1 if not)
    Exists(KeyArgs),

    /// Show key metadata as JSON
    Stat(KeyArgs),

    /// List keys under a prefix
    Ls(LsArgs),

    /// Acquire the lock for a key and leave it held
    Lock(LockArgs),

    /// Release the lock for a key
    Unlock(KeyArgs),

    /// Local cache management
    #[command(subcommand)]
    Cache(CacheCommands),
}

#[derive(Args, Debug)]
pub struct KeyArgs {
    /// Storage key
    pub key: String,
}

#[derive(Args, Debug)]
pub struct GetArgs {
    /// Storage key
    pub key: String,

    /// Write to file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct PutArgs {
    /// Storage key
    pub key: String,

    /// Read value from file (defaults to stdin)
    #[arg(short, long)]
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct LsArgs {
    /// Key prefix
    #[arg(default_value = "")]
    pub prefix: String,

    /// Include keys below nested prefixes
    #[arg(short, long)]
    pub recursive: bool,
}

#[derive(Args, Debug)]
pub struct LockArgs {
    /// Storage key
    pub key: String,

    /// Give up after this many seconds (overrides lock.timeout_seconds)
    #[arg(long)]
    pub timeout: Option<u64>,
}

impl LockArgs {
    /// Apply `--timeout` to the lock configuration
    pub fn apply(&self, config: &mut StorageConfig) {
        if let Some(timeout) = self.timeout {
            config.lock.timeout_seconds = timeout;
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Show cache statistics
    Stats,

    /// Remove expired entries
    Cleanup,

    /// Remove all entries
    Clear,
}
