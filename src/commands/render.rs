//! Render command - writes the Containerfile and ignore file.

use anyhow::Result;
use std::path::PathBuf;

use super::load_recipe;
use crate::config::Config;
use crate::plan::Plan;
use crate::render;

pub fn cmd_render(config: &Config, out: Option<PathBuf>) -> Result<()> {
    let recipe = load_recipe(config)?;
    let plan = Plan::from_recipe(&recipe)?;
    let dir = out.unwrap_or_else(|| config.project.clone());

    for path in render::write_all(&plan, &recipe, &dir)? {
        println!("Wrote {}", path.display());
    }
    Ok(())
}
