//! Build context shared across the executor.
//!
//! Resolves host-side inputs: project tree, base rootfs, tool binary and the
//! output and cache directories.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{Config, DEFAULT_INSTALL_TIMEOUT};
use crate::error::BootstrapError;
use crate::process;
use crate::recipe::Recipe;

/// Shared context for all build operations.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Project directory (manifest, lock and source live under it)
    pub project: PathBuf,
    /// Output directory; the image lands in `<output>/image`
    pub output: PathBuf,
    /// Layer cache directory
    pub cache_dir: PathBuf,
    /// Host root filesystem standing in for the base image
    pub base_rootfs: Option<PathBuf>,
    /// Host binary copied in as the dependency tool
    pub tool_binary: Option<PathBuf>,
    pub install_timeout: Duration,
    /// Reuse and record layer snapshots
    pub use_cache: bool,
}

impl BuildContext {
    /// Resolve a context from configuration and recipe.
    ///
    /// Environment settings win over the recipe. Without either, the tool is
    /// looked up on `PATH` by name.
    pub fn new(config: &Config, recipe: &Recipe) -> Result<Self> {
        let base_rootfs = config.base_rootfs.clone().or_else(|| {
            recipe
                .base
                .rootfs
                .as_ref()
                .map(|p| absolute(&config.project, p))
        });
        let tool_binary = config
            .tool_binary
            .clone()
            .or_else(|| {
                recipe
                    .tool
                    .binary
                    .as_ref()
                    .map(|p| absolute(&config.project, p))
            })
            .or_else(|| process::which(&recipe.tool.name));

        Ok(Self {
            project: config.project.clone(),
            output: config.output.clone(),
            cache_dir: config.cache_dir.clone(),
            base_rootfs,
            tool_binary,
            install_timeout: config.install_timeout,
            use_cache: true,
        })
    }

    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    /// Create a build context for testing with explicit paths.
    #[doc(hidden)]
    pub fn for_testing(project: &Path, base_rootfs: &Path, tool: &Path, work: &Path) -> Self {
        Self {
            project: project.to_path_buf(),
            output: work.join("output"),
            cache_dir: work.join("cache"),
            base_rootfs: Some(base_rootfs.to_path_buf()),
            tool_binary: Some(tool.to_path_buf()),
            install_timeout: DEFAULT_INSTALL_TIMEOUT,
            use_cache: true,
        }
    }

    pub fn image_dir(&self) -> PathBuf {
        self.output.join("image")
    }

    /// Staging directory; renamed to [`image_dir`](Self::image_dir) on success.
    pub fn partial_dir(&self) -> PathBuf {
        self.output.join(".image.partial")
    }

    pub fn record_path(&self) -> PathBuf {
        self.output.join("image.json")
    }

    /// The base rootfs, or `BaseUnavailable`.
    pub fn require_base(&self) -> std::result::Result<&Path, BootstrapError> {
        match &self.base_rootfs {
            Some(path) if path.is_dir() => Ok(path),
            Some(path) => Err(BootstrapError::BaseUnavailable(format!(
                "{} is not a directory",
                path.display()
            ))),
            None => Err(BootstrapError::BaseUnavailable(
                "no base rootfs configured (set BOOTSEQ_BASE_ROOTFS or base.rootfs)".to_string(),
            )),
        }
    }

    /// The tool binary, or `ToolUnavailable`.
    pub fn require_tool(&self) -> std::result::Result<&Path, BootstrapError> {
        match &self.tool_binary {
            Some(path) if path.is_file() => Ok(path),
            Some(path) => Err(BootstrapError::ToolUnavailable(format!(
                "{} is not a file",
                path.display()
            ))),
            None => Err(BootstrapError::ToolUnavailable(
                "tool not found on PATH (set BOOTSEQ_TOOL_BINARY or tool.binary)".to_string(),
            )),
        }
    }
}

fn absolute(project: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_paths() {
        let ctx = BuildContext::for_testing(
            Path::new("/p"),
            Path::new("/base"),
            Path::new("/uv"),
            Path::new("/w"),
        );
        assert_eq!(ctx.image_dir(), Path::new("/w/output/image"));
        assert_eq!(ctx.partial_dir(), Path::new("/w/output/.image.partial"));
        assert_eq!(ctx.record_path(), Path::new("/w/output/image.json"));
        assert!(!ctx.without_cache().use_cache);
    }

    #[test]
    fn test_missing_inputs_are_typed() {
        let dir = TempDir::new().unwrap();
        let ctx = BuildContext::for_testing(
            dir.path(),
            &dir.path().join("no-rootfs"),
            &dir.path().join("no-uv"),
            dir.path(),
        );
        assert!(matches!(
            ctx.require_base(),
            Err(BootstrapError::BaseUnavailable(_))
        ));
        assert!(matches!(
            ctx.require_tool(),
            Err(BootstrapError::ToolUnavailable(_))
        ));
    }
}
