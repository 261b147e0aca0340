//! Recipe: the typed inputs of a bootstrap build.
//!
//! A recipe names the base image, the dependency tool, the manifest and lock,
//! the application source tree, the execution identity and the layer order.
//! Every field defaults to the stock image layout, so an empty
//! `bootseq.toml` is a valid recipe.
//!
//! ```toml
//! [base]
//! image = "python:3.12-slim"
//!
//! [tool]
//! image = "ghcr.io/astral-sh/uv:latest"
//! path = "/bin/uv"
//!
//! [app]
//! entry = "bot.py"
//!
//! [layout]
//! order = "cache-friendly"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::build::files::IgnoreSet;
use crate::error::BootstrapError;
use crate::identity::Identity;

/// Default recipe file name, looked up in the project directory.
pub const RECIPE_FILENAME: &str = "bootseq.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Recipe {
    pub base: BaseSection,
    pub tool: ToolSection,
    pub dependencies: DependencySection,
    pub app: AppSection,
    pub identity: Identity,
    pub layout: LayoutSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BaseSection {
    /// Base runtime image reference.
    pub image: String,
    /// Local root filesystem standing in for `image` when building on the host.
    pub rootfs: Option<PathBuf>,
}

impl Default for BaseSection {
    fn default() -> Self {
        Self {
            image: "python:3.12-slim".to_string(),
            rootfs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolSection {
    /// Tool name, used to locate a host binary when `binary` is unset.
    pub name: String,
    /// Image the tool binary is taken from.
    pub image: String,
    /// Path of the binary inside `image`.
    pub source: String,
    /// Fixed placement inside the runtime image.
    pub path: String,
    /// Host binary used by the local executor.
    pub binary: Option<PathBuf>,
}

impl Default for ToolSection {
    fn default() -> Self {
        Self {
            name: "uv".to_string(),
            image: "ghcr.io/astral-sh/uv:latest".to_string(),
            source: "/uv".to_string(),
            path: "/bin/uv".to_string(),
            binary: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DependencySection {
    pub manifest: String,
    pub lock: String,
    /// Install arguments passed to the tool. Must install strictly from the
    /// lock and leave out development-only groups.
    pub install: Vec<String>,
}

impl Default for DependencySection {
    fn default() -> Self {
        Self {
            manifest: "pyproject.toml".to_string(),
            lock: "uv.lock".to_string(),
            install: vec![
                "sync".to_string(),
                "--locked".to_string(),
                "--no-dev".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppSection {
    /// Source tree, relative to the project directory.
    pub source: PathBuf,
    /// Fixed working location inside the image.
    pub workdir: String,
    /// Entry file handed to `<tool> run`.
    pub entry: String,
    /// Paths left out of the source copy.
    pub ignore: Vec<String>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            source: PathBuf::from("."),
            workdir: "/app".to_string(),
            entry: "bot.py".to_string(),
            ignore: [
                ".git",
                ".venv",
                "__pycache__",
                "*.pyc",
                ".env",
                "output",
                "Containerfile",
                ".containerignore",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LayoutSection {
    pub order: LayerOrder,
}

/// Where the source copy sits relative to the dependency install.
///
/// Only a caching contract: both orders produce the same image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayerOrder {
    /// Manifest and lock first, install, then source. Source edits reuse the
    /// install layer.
    #[default]
    CacheFriendly,
    /// Whole source tree first, then install. Any source edit reinstalls.
    SourceFirst,
}

impl Recipe {
    /// Load a recipe file. Missing tables take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read recipe at {}", path.display()))?;
        let recipe: Recipe = toml::from_str(&content)
            .with_context(|| format!("Failed to parse recipe at {}", path.display()))?;
        recipe.validate()?;
        Ok(recipe)
    }

    /// Load `path` if it exists, otherwise fall back to the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            log::debug!("no recipe at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> std::result::Result<(), BootstrapError> {
        self.identity.validate()?;

        if self.base.image.trim().is_empty() {
            return Err(invalid("base.image is empty"));
        }
        if self.tool.image.trim().is_empty() {
            return Err(invalid("tool.image is empty"));
        }
        for (field, value) in [
            ("tool.source", &self.tool.source),
            ("tool.path", &self.tool.path),
            ("app.workdir", &self.app.workdir),
        ] {
            if !value.starts_with('/') {
                return Err(invalid(&format!("{} '{}' must be absolute", field, value)));
            }
        }
        for (field, value) in [
            ("dependencies.manifest", &self.dependencies.manifest),
            ("dependencies.lock", &self.dependencies.lock),
            ("app.entry", &self.app.entry),
        ] {
            if !is_plain_relative(value) {
                return Err(invalid(&format!(
                    "{} '{}' must be a relative path inside the project",
                    field, value
                )));
            }
        }
        if self.dependencies.manifest == self.dependencies.lock {
            return Err(invalid("manifest and lock must be different files"));
        }
        if self.dependencies.install.is_empty() {
            return Err(invalid("dependencies.install is empty"));
        }
        let ignore = IgnoreSet::new(&self.app.ignore);
        for file in [&self.dependencies.manifest, &self.dependencies.lock] {
            if ignore.is_ignored(Path::new(file)) {
                return Err(invalid(&format!("app.ignore must not exclude '{}'", file)));
            }
        }
        Ok(())
    }

    /// Stable digest over the serialized recipe.
    pub fn digest(&self) -> String {
        // Serializing plain structs of strings and vectors cannot fail.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        format!("{:x}", Sha256::digest(&bytes))
    }

    /// Entry point argv: the placed tool runs the entry file, so the locked
    /// closure is the one used at runtime.
    pub fn entrypoint(&self) -> Vec<String> {
        vec![
            self.tool.path.clone(),
            "run".to_string(),
            self.app.entry.clone(),
        ]
    }

    /// Install argv: the placed tool followed by the install arguments.
    pub fn install_argv(&self) -> Vec<String> {
        let mut argv = vec![self.tool.path.clone()];
        argv.extend(self.dependencies.install.iter().cloned());
        argv
    }

    pub fn source_dir(&self, project: &Path) -> PathBuf {
        if self.app.source.is_absolute() {
            self.app.source.clone()
        } else {
            project.join(&self.app.source)
        }
    }

    pub fn manifest_path(&self, project: &Path) -> PathBuf {
        self.source_dir(project).join(&self.dependencies.manifest)
    }

    pub fn lock_path(&self, project: &Path) -> PathBuf {
        self.source_dir(project).join(&self.dependencies.lock)
    }
}

fn invalid(msg: &str) -> BootstrapError {
    BootstrapError::InvalidRecipe(msg.to_string())
}

fn is_plain_relative(value: &str) -> bool {
    let path = Path::new(value);
    !value.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
