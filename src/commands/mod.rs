//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `plan` - Print the ordered steps
//! - `render` - Write the Containerfile
//! - `build` - Materialize the image locally
//! - `verify` - Check a built image
//! - `lock` - Check the lock against the manifest
//! - `exec` - Runtime launcher and `whoami`
//! - `preflight` - Run preflight checks
//! - `show` - Display information
//! - `clean` - Clean build artifacts

pub mod build;
pub mod clean;
pub mod exec;
pub mod lock;
mod plan;
mod preflight;
mod render;
pub mod show;
mod verify;

pub use build::cmd_build;
pub use clean::cmd_clean;
pub use exec::{cmd_exec, cmd_whoami};
pub use lock::cmd_lock;
pub use plan::cmd_plan;
pub use preflight::cmd_preflight;
pub use render::cmd_render;
pub use show::cmd_show;
pub use verify::cmd_verify;

use anyhow::Result;

use crate::config::Config;
use crate::recipe::Recipe;

/// Load the configured recipe, or the defaults when there is none.
pub(crate) fn load_recipe(config: &Config) -> Result<Recipe> {
    Recipe::load_or_default(&config.recipe)
}
