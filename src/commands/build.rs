//! Build command - materializes the image locally.

use anyhow::Result;
use std::time::Instant;

use super::load_recipe;
use crate::build::{self, BuildContext, BuildReport};
use crate::config::Config;
use crate::plan::Plan;

/// Execute the build command.
pub fn cmd_build(config: &Config, no_cache: bool) -> Result<BuildReport> {
    println!("=== Bootstrap Build ===\n");
    let build_start = Instant::now();

    let recipe = load_recipe(config)?;
    let plan = Plan::from_recipe(&recipe)?;

    let mut ctx = BuildContext::new(config, &recipe)?;
    if no_cache {
        println!("Layer cache disabled for this build.");
        ctx = ctx.without_cache();
    }

    let report = build::execute(&plan, &recipe, &ctx)?;

    let elapsed = build_start.elapsed().as_secs_f64();
    println!("\n=== Build Complete ({:.1}s) ===", elapsed);
    println!("  Image:   {}", report.image.display());
    println!("  Closure: {}", report.closure_digest);
    Ok(report)
}
