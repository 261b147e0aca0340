//! Runtime commands: `exec` and `whoami`.

use anyhow::Result;
use std::path::Path;

use super::load_recipe;
use crate::config::Config;
use crate::launch;

/// Replace this process with the service, as the execution identity.
pub fn cmd_exec(config: &Config, root: &Path) -> Result<()> {
    let recipe = load_recipe(config)?;
    launch::launch(&recipe, root)
}

/// Print the effective identity. Fails when running as root.
pub fn cmd_whoami() -> Result<()> {
    let current = launch::current_identity();
    println!("{}", current);
    launch::require_non_root()?;
    Ok(())
}
