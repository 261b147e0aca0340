//! Lock command - checks the lock against the manifest.

use anyhow::Result;

use super::load_recipe;
use crate::config::Config;
use crate::lock;

/// Lock target for the lock command.
pub enum LockTarget {
    /// Full consistency report
    Check,
    /// Runtime closure digest only
    Digest,
}

pub fn cmd_lock(config: &Config, target: LockTarget) -> Result<()> {
    let recipe = load_recipe(config)?;
    let report = lock::verify(
        &recipe.manifest_path(&config.project),
        &recipe.lock_path(&config.project),
    )?;

    match target {
        LockTarget::Digest => println!("{}", report.digest),
        LockTarget::Check => {
            println!("Lock matches manifest for '{}'", report.root);
            println!("\nRuntime closure ({} packages):", report.closure.len());
            for pin in &report.closure {
                println!("  {}=={} ({} hashes)", pin.name, pin.version, pin.hashes.len());
            }
            if !report.dev_only.is_empty() {
                println!("\nLocked but not installed:");
                for name in &report.dev_only {
                    println!("  {}", name);
                }
            }
            println!("\nClosure digest: {}", report.digest);
        }
    }
    Ok(())
}
