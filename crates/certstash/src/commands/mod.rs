//! Command implementations

pub mod cache;
pub mod lock;
pub mod object;

use anyhow::{Context, Result};
use certstash_storage::{CertStorage, MemoryObjectStore, StorageBuilder, StorageConfig};
use std::process::ExitCode;
use std::sync::Arc;

use crate::cli::{Cli, Commands, StorageArgs};

pub async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = cli.storage.resolve(cli.config.as_deref())?;
    let args = &cli.storage;

    let outcome = match cli.command {
        Commands::Get(cmd) => object::get(&connect(args, &config).await?, cmd).await,
        Commands::Put(cmd) => object::put(&connect(args, &config).await?, cmd).await,
        Commands::Rm(cmd) => object::rm(&connect(args, &config).await?, cmd).await,
        Commands::Exists(cmd) => {
            let found = object::exists(&connect(args, &config).await?, cmd).await?;
            return Ok(if found {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            });
        }
        Commands::Stat(cmd) => object::stat(&connect(args, &config).await?, cmd).await,
        Commands::Ls(cmd) => object::ls(&connect(args, &config).await?, cmd).await,
        Commands::Lock(cmd) => {
            cmd.apply(&mut config);
            lock::lock(&connect(args, &config).await?, cmd).await
        }
        Commands::Unlock(cmd) => lock::unlock(&connect(args, &config).await?, cmd).await,
        Commands::Cache(cmd) => cache::run(cmd, &config).await,
    };

    outcome.map(|()| ExitCode::SUCCESS)
}

/// Build the storage facade for the resolved configuration
async fn connect(args: &StorageArgs, config: &StorageConfig) -> Result<CertStorage> {
    if args.memory {
        config.validate()?;
        let store = Arc::new(MemoryObjectStore::with_bucket(config.bucket.clone()));
        return StorageBuilder::from_config(store, config)?
            .build()
            .await
            .context("Failed to open in-memory storage");
    }

    CertStorage::connect(config)
        .await
        .with_context(|| format!("Failed to connect to bucket {}", config.bucket))
}
