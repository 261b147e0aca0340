//! Preflight checks before a bootstrap build.
//!
//! Validates the recipe, the plan, the manifest and lock, and the host-side
//! inputs of the local executor. Run with `bootseq preflight`.

use anyhow::{bail, Result};

use crate::build::layers::short;
use crate::build::BuildContext;
use crate::config::Config;
use crate::launch;
use crate::lock;
use crate::plan::Plan;
use crate::recipe::{LayerOrder, Recipe};

/// Result of a single preflight check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    /// Check passed.
    Pass,
    /// Check failed - build will fail.
    Fail,
    /// Check passed but with a warning.
    Warn,
}

impl CheckResult {
    fn pass(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Pass,
            details: None,
        }
    }

    fn pass_with(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Pass,
            details: Some(details.to_string()),
        }
    }

    fn fail(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Fail,
            details: Some(details.to_string()),
        }
    }

    fn warn(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warn,
            details: Some(details.to_string()),
        }
    }
}

/// Results of all preflight checks.
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    /// Returns true if no check failed.
    pub fn all_passed(&self) -> bool {
        !self.checks.iter().any(|c| c.status == CheckStatus::Fail)
    }

    pub fn fail_count(&self) -> usize {
        self.checks.iter().filter(|c| c.status == CheckStatus::Fail).count()
    }

    pub fn warn_count(&self) -> usize {
        self.checks.iter().filter(|c| c.status == CheckStatus::Warn).count()
    }

    pub fn find(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }

    /// Print the report to stdout.
    pub fn print(&self) {
        println!("=== Preflight Check Results ===\n");

        for check in &self.checks {
            let (icon, status_str) = match check.status {
                CheckStatus::Pass => ("✓", "PASS"),
                CheckStatus::Fail => ("✗", "FAIL"),
                CheckStatus::Warn => ("⚠", "WARN"),
            };

            print!("  {} [{}] {}", icon, status_str, check.name);
            if let Some(details) = &check.details {
                println!(": {}", details);
            } else {
                println!();
            }
        }

        println!();
        let total = self.checks.len();
        let passed = self.checks.iter().filter(|c| c.status == CheckStatus::Pass).count();
        println!("Summary: {}/{} passed", passed, total);
        if self.fail_count() > 0 {
            println!("         {} FAILED - build will not succeed", self.fail_count());
        }
        if self.warn_count() > 0 {
            println!("         {} warnings", self.warn_count());
        }
    }
}

/// Run all preflight checks.
pub fn run_preflight(config: &Config) -> Result<PreflightReport> {
    let mut checks = Vec::new();

    let recipe = match Recipe::load_or_default(&config.recipe) {
        Ok(recipe) => {
            checks.push(CheckResult::pass_with(
                "Recipe",
                &if config.recipe.exists() {
                    config.recipe.display().to_string()
                } else {
                    "built-in defaults".to_string()
                },
            ));
            recipe
        }
        Err(e) => {
            checks.push(CheckResult::fail("Recipe", &format!("{:#}", e)));
            // Nothing else can be checked without a recipe.
            return Ok(PreflightReport { checks });
        }
    };

    checks.extend(check_recipe(&recipe));
    checks.extend(check_dependencies(&recipe, config));
    checks.extend(check_host(&recipe, config)?);

    Ok(PreflightReport { checks })
}

/// Run preflight checks and fail if any check failed.
pub fn run_preflight_or_fail(config: &Config) -> Result<()> {
    let report = run_preflight(config)?;
    report.print();

    if !report.all_passed() {
        bail!(
            "Preflight failed: {} check(s) failed. Fix the issues above before building.",
            report.fail_count()
        );
    }

    println!("All preflight checks passed!\n");
    Ok(())
}

fn check_recipe(recipe: &Recipe) -> Vec<CheckResult> {
    let mut results = Vec::new();

    match recipe.identity.validate() {
        Ok(()) => results.push(CheckResult::pass_with(
            "Identity",
            &recipe.identity.to_string(),
        )),
        Err(e) => results.push(CheckResult::fail("Identity", &e.to_string())),
    }

    match Plan::from_recipe(recipe) {
        Ok(plan) => results.push(CheckResult::pass_with(
            "Plan",
            &format!("{} steps", plan.ops().len()),
        )),
        Err(e) => results.push(CheckResult::fail("Plan", &e.to_string())),
    }

    match recipe.layout.order {
        LayerOrder::CacheFriendly => results.push(CheckResult::pass("Layer order")),
        LayerOrder::SourceFirst => results.push(CheckResult::warn(
            "Layer order",
            "source-first: every source edit reinstalls dependencies",
        )),
    }

    results
}

fn check_dependencies(recipe: &Recipe, config: &Config) -> Vec<CheckResult> {
    let mut results = Vec::new();
    let manifest = recipe.manifest_path(&config.project);
    let lock_path = recipe.lock_path(&config.project);

    let present = |name: &str, path: &std::path::Path| {
        if path.is_file() {
            CheckResult::pass_with(name, &path.display().to_string())
        } else {
            CheckResult::fail(name, &format!("Not found at {}", path.display()))
        }
    };
    results.push(present("Manifest", &manifest));
    results.push(present("Lock", &lock_path));

    if manifest.is_file() && lock_path.is_file() {
        match lock::verify(&manifest, &lock_path) {
            Ok(report) => results.push(CheckResult::pass_with(
                "Lock consistency",
                &format!(
                    "{} runtime packages, closure {}",
                    report.closure.len(),
                    short(&report.digest)
                ),
            )),
            Err(e) => results.push(CheckResult::fail("Lock consistency", &format!("{:#}", e))),
        }
    }

    results
}

fn check_host(recipe: &Recipe, config: &Config) -> Result<Vec<CheckResult>> {
    let mut results = Vec::new();
    let ctx = BuildContext::new(config, recipe)?;

    match ctx.require_tool() {
        Ok(path) => results.push(CheckResult::pass_with(
            "Tool binary",
            &path.display().to_string(),
        )),
        Err(e) => results.push(CheckResult::fail("Tool binary", &e.to_string())),
    }

    match ctx.require_base() {
        Ok(path) => results.push(CheckResult::pass_with(
            "Base rootfs",
            &path.display().to_string(),
        )),
        Err(e) => results.push(CheckResult::fail("Base rootfs", &e.to_string())),
    }

    let current = launch::current_identity();
    if current.euid == 0 {
        results.push(CheckResult::pass_with("Privilege", "running as root"));
    } else if current.euid == recipe.identity.uid && current.egid == recipe.identity.gid {
        results.push(CheckResult::pass_with(
            "Privilege",
            "not root, but already the execution identity",
        ));
    } else {
        results.push(CheckResult::warn(
            "Privilege",
            &format!(
                "not root ({}); ownership transfer to {} will fail",
                current,
                recipe.identity.numeric()
            ),
        ));
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counts() {
        let report = PreflightReport {
            checks: vec![
                CheckResult::pass("a"),
                CheckResult::warn("b", "careful"),
                CheckResult::fail("c", "broken"),
            ],
        };
        assert!(!report.all_passed());
        assert_eq!(report.fail_count(), 1);
        assert_eq!(report.warn_count(), 1);
        assert_eq!(report.find("b").map(|c| c.status), Some(CheckStatus::Warn));
    }

    #[test]
    fn test_source_first_warns() {
        let mut recipe = Recipe::default();
        recipe.layout.order = LayerOrder::SourceFirst;
        let checks = check_recipe(&recipe);
        let order = checks.iter().find(|c| c.name == "Layer order").unwrap();
        assert_eq!(order.status, CheckStatus::Warn);
    }

    #[test]
    fn test_root_identity_fails() {
        let mut recipe = Recipe::default();
        recipe.identity.uid = 0;
        let checks = check_recipe(&recipe);
        assert!(checks
            .iter()
            .filter(|c| c.name == "Identity" || c.name == "Plan")
            .all(|c| c.status == CheckStatus::Fail));
    }
}
