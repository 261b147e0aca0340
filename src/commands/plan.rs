//! Plan command - prints the ordered build steps.

use anyhow::Result;

use super::load_recipe;
use crate::config::Config;
use crate::plan::Plan;
use crate::render;

pub fn cmd_plan(config: &Config, json: bool) -> Result<()> {
    let recipe = load_recipe(config)?;
    let plan = Plan::from_recipe(&recipe)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    for (i, op) in plan.ops().iter().enumerate() {
        let context = if op.privileged() { "build" } else { "runtime" };
        let first = render::render_op(op);
        let first = first.lines().next().unwrap_or_default();
        println!("{:>2}. {:<13} [{:<7}] {}", i + 1, op.phase(), context, first);
    }
    Ok(())
}
