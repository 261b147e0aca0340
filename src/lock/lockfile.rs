//! Dependency Lock (`uv.lock`) parsing.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use super::manifest::{normalize_name, Requirement};
use crate::error::BootstrapError;

#[derive(Debug, Clone, Deserialize)]
pub struct Lock {
    #[serde(default)]
    pub version: Option<u32>,
    #[serde(default, rename = "requires-python")]
    pub requires_python: Option<String>,
    #[serde(default, rename = "package")]
    pub packages: Vec<LockedPackage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LockedPackage {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub source: Option<toml::Table>,
    #[serde(default)]
    pub dependencies: Vec<DependencyRef>,
    #[serde(default, rename = "optional-dependencies")]
    pub optional_dependencies: BTreeMap<String, Vec<DependencyRef>>,
    #[serde(default, rename = "dev-dependencies")]
    pub dev_dependencies: BTreeMap<String, Vec<DependencyRef>>,
    #[serde(default)]
    pub sdist: Option<Artifact>,
    #[serde(default)]
    pub wheels: Vec<Artifact>,
    #[serde(default)]
    pub metadata: Option<PackageMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DependencyRef {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub extra: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Artifact {
    #[serde(default)]
    pub hash: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageMetadata {
    #[serde(default, rename = "requires-dist")]
    pub requires_dist: Vec<RequirementEntry>,
    #[serde(default, rename = "requires-dev")]
    pub requires_dev: BTreeMap<String, Vec<RequirementEntry>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequirementEntry {
    pub name: String,
    #[serde(default)]
    pub specifier: Option<String>,
    #[serde(default)]
    pub marker: Option<String>,
}

impl RequirementEntry {
    pub fn requirement(&self) -> Requirement {
        Requirement::new(&self.name, self.specifier.as_deref().unwrap_or(""))
    }

    /// The optional-dependency group this entry belongs to, from an
    /// `extra == '<name>'` clause in its marker.
    pub fn extra(&self) -> Option<String> {
        let marker = self.marker.as_deref()?;
        let mut rest = marker;
        while let Some(idx) = rest.find("extra") {
            let tail = rest[idx + "extra".len()..].trim_start();
            rest = &rest[idx + "extra".len()..];
            let Some(value) = tail.strip_prefix("==") else {
                continue;
            };
            let value = value.trim_start();
            let Some(quote) = value.chars().next().filter(|c| *c == '\'' || *c == '"') else {
                continue;
            };
            if let Some((name, _)) = value[1..].split_once(quote) {
                return Some(normalize_name(name));
            }
        }
        None
    }
}

/// Where a locked package comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Registry,
    Url,
    Git,
    Local,
    Unknown,
}

impl LockedPackage {
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }

    pub fn source_kind(&self) -> SourceKind {
        let Some(source) = &self.source else {
            return SourceKind::Unknown;
        };
        if source.contains_key("registry") {
            SourceKind::Registry
        } else if source.contains_key("url") {
            SourceKind::Url
        } else if source.contains_key("git") {
            SourceKind::Git
        } else if ["editable", "virtual", "directory", "path"]
            .iter()
            .any(|k| source.contains_key(*k))
        {
            SourceKind::Local
        } else {
            SourceKind::Unknown
        }
    }

    /// True if the lock must carry a content hash for this package.
    pub fn requires_hash(&self) -> bool {
        matches!(self.source_kind(), SourceKind::Registry | SourceKind::Url)
    }

    /// Every artifact hash, sorted.
    pub fn hashes(&self) -> Vec<String> {
        let mut hashes: Vec<String> = self
            .sdist
            .iter()
            .chain(self.wheels.iter())
            .filter_map(|a| a.hash.clone())
            .collect();
        hashes.sort();
        hashes.dedup();
        hashes
    }

    pub fn version_or_empty(&self) -> &str {
        self.version.as_deref().unwrap_or("")
    }
}

impl Lock {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BootstrapError::LockMissing(path.to_path_buf()).into());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read lock at {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid lock at {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let lock: Lock = toml::from_str(content)?;
        Ok(lock)
    }

    /// All locked versions of a package name.
    pub fn find(&self, name: &str) -> Vec<&LockedPackage> {
        let name = normalize_name(name);
        self.packages
            .iter()
            .filter(|p| p.normalized_name() == name)
            .collect()
    }
}
