//! Clean command - removes build artifacts.

use anyhow::Result;

use crate::clean;
use crate::config::Config;

/// Clean target for the clean command.
pub enum CleanTarget {
    /// Clean outputs only (default)
    Outputs,
    /// Clean the layer cache
    Cache,
    /// Clean everything
    All,
}

/// Execute the clean command.
pub fn cmd_clean(config: &Config, target: CleanTarget) -> Result<()> {
    match target {
        CleanTarget::Outputs => clean::clean_outputs(config)?,
        CleanTarget::Cache => clean::clean_cache(config)?,
        CleanTarget::All => {
            clean::clean_outputs(config)?;
            clean::clean_cache(config)?;
        }
    }
    Ok(())
}
