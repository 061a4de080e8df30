//! Lock commands

use anyhow::Result;
use certstash_storage::CertStorage;

use crate::cli::{KeyArgs, LockArgs};
use crate::output;

pub async fn lock(storage: &CertStorage, args: LockArgs) -> Result<()> {
    storage.lock(&args.key).await?;

    output::success(&format!(
        "Locked {} (sentinel {}.lock)",
        args.key,
        storage.object_name(&args.key)
    ));
    output::info("The lock stays held until `certstash unlock` or until it expires");
    Ok(())
}

pub async fn unlock(storage: &CertStorage, args: KeyArgs) -> Result<()> {
    storage.unlock(&args.key).await?;
    output::success(&format!("Unlocked {}", args.key));
    Ok(())
}
