//! Tool configuration.
//!
//! Reads `.env` in the project directory, then the process environment.
//! Environment variables take precedence over the file.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::recipe::RECIPE_FILENAME;

/// Default bound on the install step.
pub const DEFAULT_INSTALL_TIMEOUT: Duration = Duration::from_secs(900);

/// Sequencer configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Project directory holding the recipe, manifest, lock and source.
    pub project: PathBuf,
    /// Recipe file (default: `<project>/bootseq.toml`)
    pub recipe: PathBuf,
    /// Output directory (default: `<project>/output`)
    pub output: PathBuf,
    /// Layer cache (default: `<user cache>/bootseq`)
    pub cache_dir: PathBuf,
    pub install_timeout: Duration,
    /// Local root filesystem used as the base image.
    pub base_rootfs: Option<PathBuf>,
    /// Host binary of the dependency tool.
    pub tool_binary: Option<PathBuf>,
}

impl Config {
    /// Load configuration for `project` from its `.env` and the environment.
    pub fn load(project: &Path) -> Result<Self> {
        let mut vars = HashMap::new();

        let env_path = project.join(".env");
        if env_path.exists() {
            let iter = dotenvy::from_path_iter(&env_path)
                .with_context(|| format!("Failed to read {}", env_path.display()))?;
            for item in iter {
                let (key, value) =
                    item.with_context(|| format!("Failed to parse {}", env_path.display()))?;
                vars.insert(key, value);
            }
        }

        for (key, value) in std::env::vars() {
            if key.starts_with("BOOTSEQ_") {
                vars.insert(key, value);
            }
        }

        Self::from_vars(project, &vars)
    }

    fn from_vars(project: &Path, vars: &HashMap<String, String>) -> Result<Self> {
        let path = |key: &str| {
            vars.get(key)
                .filter(|v| !v.trim().is_empty())
                .map(|v| resolve(project, v))
        };

        let install_timeout = match vars.get("BOOTSEQ_INSTALL_TIMEOUT") {
            Some(raw) => Duration::from_secs(raw.trim().parse().with_context(|| {
                format!("BOOTSEQ_INSTALL_TIMEOUT must be whole seconds, got '{}'", raw)
            })?),
            None => DEFAULT_INSTALL_TIMEOUT,
        };

        let cache_dir = path("BOOTSEQ_CACHE_DIR").unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join("bootseq")
        });

        Ok(Self {
            project: project.to_path_buf(),
            recipe: path("BOOTSEQ_RECIPE").unwrap_or_else(|| project.join(RECIPE_FILENAME)),
            output: path("BOOTSEQ_OUTPUT").unwrap_or_else(|| project.join("output")),
            cache_dir,
            install_timeout,
            base_rootfs: path("BOOTSEQ_BASE_ROOTFS"),
            tool_binary: path("BOOTSEQ_TOOL_BINARY"),
        })
    }

    /// Final image directory.
    pub fn image_dir(&self) -> PathBuf {
        self.output.join("image")
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        let unset = || "(unset)".to_string();
        println!("Configuration:");
        println!("  PROJECT: {}", self.project.display());
        println!("  BOOTSEQ_RECIPE: {}", self.recipe.display());
        if !self.recipe.exists() {
            println!("    (not found, built-in defaults apply)");
        }
        println!("  BOOTSEQ_OUTPUT: {}", self.output.display());
        println!("  BOOTSEQ_CACHE_DIR: {}", self.cache_dir.display());
        println!(
            "  BOOTSEQ_INSTALL_TIMEOUT: {}s",
            self.install_timeout.as_secs()
        );
        println!(
            "  BOOTSEQ_BASE_ROOTFS: {}",
            self.base_rootfs
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(unset)
        );
        println!(
            "  BOOTSEQ_TOOL_BINARY: {}",
            self.tool_binary
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(unset)
        );
    }
}

fn resolve(project: &Path, value: &str) -> PathBuf {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        path
    } else {
        project.join(path)
    }
}
