//! Key commands: get, put, rm, exists, stat, ls

use anyhow::{anyhow, Context, Result};
use certstash_storage::CertStorage;
use std::io::{Read, Write};

use crate::cli::{GetArgs, KeyArgs, LsArgs, PutArgs};
use crate::output;

pub async fn get(storage: &CertStorage, args: GetArgs) -> Result<()> {
    let value = storage.load(&args.key).await?;

    match args.output {
        Some(path) => {
            std::fs::write(&path, &value)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            output::success(&format!(
                "Wrote {} ({} bytes) to {}",
                args.key,
                value.len(),
                path.display()
            ));
        }
        None => std::io::stdout().write_all(&value)?,
    }
    Ok(())
}

pub async fn put(storage: &CertStorage, args: PutArgs) -> Result<()> {
    let value = match &args.file {
        Some(path) => {
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?
        }
        None => {
            let mut buffer = Vec::new();
            std::io::stdin().read_to_end(&mut buffer)?;
            buffer
        }
    };

    if value.is_empty() {
        output::warning(&format!("Storing an empty value for {}", args.key));
    }

    storage.store(&args.key, &value).await?;
    output::success(&format!("Stored {} ({} bytes)", args.key, value.len()));
    Ok(())
}

pub async fn rm(storage: &CertStorage, args: KeyArgs) -> Result<()> {
    storage.delete(&args.key).await?;
    output::success(&format!("Deleted {}", args.key));
    Ok(())
}

/// Print whether the key exists and return it for the exit status
pub async fn exists(storage: &CertStorage, args: KeyArgs) -> Result<bool> {
    let found = storage.exists(&args.key).await;
    println!("{}", found);
    Ok(found)
}

pub async fn stat(storage: &CertStorage, args: KeyArgs) -> Result<()> {
    let info = storage
        .stat(&args.key)
        .await
        .map_err(|e| anyhow!("Failed to stat {}: {}", args.key, e))?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

pub async fn ls(storage: &CertStorage, args: LsArgs) -> Result<()> {
    let keys = storage.list(&args.prefix, args.recursive).await?;

    if keys.is_empty() {
        output::info(&format!("No keys under {:?}", args.prefix));
        return Ok(());
    }

    for key in keys {
        println!("{}", key);
    }
    Ok(())
}
