//! Dependency Manifest (`pyproject.toml`) parsing.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use crate::error::BootstrapError;

/// A requirement reduced to what the lock records: normalized name and
/// whitespace-free specifier. Markers and extras are not compared.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Requirement {
    pub name: String,
    pub specifier: String,
}

impl Requirement {
    /// Parse a PEP 508 requirement string.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let name_end = raw
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'))
            .unwrap_or(raw.len());
        if name_end == 0 {
            return None;
        }
        let name = normalize_name(&raw[..name_end]);
        let mut rest = &raw[name_end..];

        // Marker
        if let Some(idx) = rest.find(';') {
            rest = &rest[..idx];
        }
        // Extras
        let rest = rest.trim_start();
        let rest = match rest.strip_prefix('[') {
            Some(after) => after.split_once(']').map(|(_, tail)| tail).unwrap_or(""),
            None => rest,
        };

        let specifier: String = rest
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '(' && *c != ')')
            .collect();
        Some(Self { name, specifier })
    }

    pub fn new(name: &str, specifier: &str) -> Self {
        Self {
            name: normalize_name(name),
            specifier: specifier.chars().filter(|c| !c.is_whitespace()).collect(),
        }
    }
}

/// PEP 503 name normalization.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_sep = false;
    for c in name.chars() {
        if c == '-' || c == '_' || c == '.' {
            if !last_sep {
                out.push('-');
            }
            last_sep = true;
        } else {
            out.push(c.to_ascii_lowercase());
            last_sep = false;
        }
    }
    out
}

#[derive(Debug, Default, Deserialize)]
struct PyProject {
    project: Option<ProjectTable>,
    #[serde(default, rename = "dependency-groups")]
    dependency_groups: BTreeMap<String, Vec<toml::Value>>,
    #[serde(default)]
    tool: ToolTable,
}

#[derive(Debug, Deserialize)]
struct ProjectTable {
    name: String,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default, rename = "optional-dependencies")]
    optional_dependencies: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct ToolTable {
    #[serde(default)]
    uv: UvTable,
}

#[derive(Debug, Default, Deserialize)]
struct UvTable {
    #[serde(default, rename = "dev-dependencies")]
    dev_dependencies: Vec<String>,
}

/// The parsed Dependency Manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Normalized project name.
    pub name: String,
    /// Runtime requirements.
    pub runtime: BTreeSet<Requirement>,
    /// Optional requirements by extra. Declared, locked, never installed.
    pub extras: BTreeMap<String, BTreeSet<Requirement>>,
    /// Development-only requirements by group.
    pub dev: BTreeMap<String, BTreeSet<Requirement>>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BootstrapError::ManifestMissing(path.to_path_buf()).into());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest at {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid manifest at {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let doc: PyProject = toml::from_str(content)?;
        let project = doc
            .project
            .context("manifest has no [project] table")?;

        let mut runtime = BTreeSet::new();
        for raw in &project.dependencies {
            runtime.insert(parse_requirement(raw)?);
        }

        let mut extras: BTreeMap<String, BTreeSet<Requirement>> = BTreeMap::new();
        for (extra, reqs) in &project.optional_dependencies {
            let entry = extras.entry(normalize_name(extra)).or_default();
            for raw in reqs {
                entry.insert(parse_requirement(raw)?);
            }
        }

        let mut dev: BTreeMap<String, BTreeSet<Requirement>> = BTreeMap::new();
        for group in doc.dependency_groups.keys() {
            let mut visiting = BTreeSet::new();
            let reqs = resolve_group(&doc.dependency_groups, group, &mut visiting)?;
            dev.insert(normalize_name(group), reqs);
        }
        if !doc.tool.uv.dev_dependencies.is_empty() {
            let entry = dev.entry("dev".to_string()).or_default();
            for raw in &doc.tool.uv.dev_dependencies {
                entry.insert(parse_requirement(raw)?);
            }
        }

        Ok(Self {
            name: normalize_name(&project.name),
            runtime,
            extras,
            dev,
        })
    }
}

fn parse_requirement(raw: &str) -> Result<Requirement> {
    Requirement::parse(raw).with_context(|| format!("invalid requirement '{}'", raw))
}

// Flattens `{ include-group = "..." }` references, rejecting cycles.
fn resolve_group(
    groups: &BTreeMap<String, Vec<toml::Value>>,
    name: &str,
    visiting: &mut BTreeSet<String>,
) -> Result<BTreeSet<Requirement>> {
    if !visiting.insert(name.to_string()) {
        anyhow::bail!("dependency group '{}' includes itself", name);
    }
    let items = groups
        .get(name)
        .with_context(|| format!("unknown dependency group '{}'", name))?;

    let mut out = BTreeSet::new();
    for item in items {
        match item {
            toml::Value::String(raw) => {
                out.insert(parse_requirement(raw)?);
            }
            toml::Value::Table(table) => {
                let included = table
                    .get("include-group")
                    .and_then(|v| v.as_str())
                    .with_context(|| format!("unsupported entry in group '{}'", name))?;
                out.extend(resolve_group(groups, included, visiting)?);
            }
            other => anyhow::bail!("unsupported entry {} in group '{}'", other, name),
        }
    }
    visiting.remove(name);
    Ok(out)
}
