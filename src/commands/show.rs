//! Show command - displays information.

use anyhow::Result;

use super::load_recipe;
use crate::build::executor::layer_keys;
use crate::build::layers::short;
use crate::build::{BuildContext, BuildRecord, LayerStore};
use crate::config::Config;
use crate::plan::Plan;

/// Show target for the show command.
pub enum ShowTarget {
    /// Show configuration
    Config,
    /// Show which layers of the current plan are cached
    Status,
}

/// Execute the show command.
pub fn cmd_show(target: ShowTarget, config: &Config) -> Result<()> {
    match target {
        ShowTarget::Config => config.print(),
        ShowTarget::Status => show_status(config)?,
    }
    Ok(())
}

fn show_status(config: &Config) -> Result<()> {
    let recipe = load_recipe(config)?;
    let plan = Plan::from_recipe(&recipe)?;
    let ctx = BuildContext::new(config, &recipe)?;
    let store = LayerStore::open(&config.cache_dir)?;

    println!("Layers ({}):", store.root().display());
    match layer_keys(&plan, &recipe, &ctx) {
        Ok(keys) => {
            for (op, key) in plan.ops().iter().zip(&keys) {
                let state = if !op.writes_filesystem() {
                    "RUNTIME"
                } else if store.contains(key) {
                    "CACHED"
                } else {
                    "MISSING"
                };
                println!("  [{:<7}] {:<13} {}", state, op.phase(), short(key));
            }
        }
        Err(e) => println!("  [WARN] Cannot compute layer keys: {:#}", e),
    }

    println!();
    match BuildRecord::load(&config.output.join("image.json")) {
        Ok(record) => {
            println!("Image: {}", config.image_dir().display());
            println!("  Identity: {}", record.identity);
            println!("  Closure:  {}", record.closure_digest);
            if record.recipe_digest != recipe.digest() {
                println!("  [WARN] built from a different recipe");
            }
        }
        Err(_) => println!("Image: not built"),
    }
    Ok(())
}
