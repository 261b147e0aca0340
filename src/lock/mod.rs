//! Lock verification.
//!
//! The lock is read-only input. A lock that disagrees with the manifest fails
//! the build. Nothing here ever re-resolves.
//!
//! The runtime closure is everything reachable from the root package's
//! runtime dependencies. Its digest covers names, versions and artifact
//! hashes only, so two builds against the same lock agree on it regardless
//! of when they run.

pub mod lockfile;
pub mod manifest;

pub use lockfile::{Lock, LockedPackage};
pub use manifest::{Manifest, Requirement};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;

use crate::error::{BootstrapError, Result};

/// A package pinned in the runtime closure.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pin {
    pub name: String,
    pub version: String,
    pub hashes: Vec<String>,
}

/// Outcome of a successful consistency check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockReport {
    pub root: String,
    /// Runtime closure, sorted by name then version.
    pub closure: Vec<Pin>,
    /// Locked packages outside the runtime closure: dev groups and extras.
    pub dev_only: Vec<String>,
    pub digest: String,
}

/// Load manifest and lock from disk and check them against each other.
pub fn verify(manifest_path: &Path, lock_path: &Path) -> anyhow::Result<LockReport> {
    let manifest = Manifest::load(manifest_path)?;
    let lock = Lock::load(lock_path)?;
    Ok(check_consistency(&manifest, &lock)?)
}

/// Check that `lock` is exactly the resolution of `manifest`.
pub fn check_consistency(manifest: &Manifest, lock: &Lock) -> Result<LockReport> {
    let roots = lock.find(&manifest.name);
    let root = match roots.as_slice() {
        [root] => *root,
        [] => {
            return Err(BootstrapError::LockDrift(format!(
                "project '{}' is not in the lock",
                manifest.name
            )))
        }
        _ => {
            return Err(BootstrapError::LockDrift(format!(
                "project '{}' appears more than once in the lock",
                manifest.name
            )))
        }
    };
    let metadata = root.metadata.clone().unwrap_or_default();

    let mut locked_runtime: BTreeSet<Requirement> = BTreeSet::new();
    let mut locked_extras: BTreeMap<String, BTreeSet<Requirement>> = BTreeMap::new();
    for entry in &metadata.requires_dist {
        match entry.extra() {
            Some(extra) => {
                locked_extras.entry(extra).or_default().insert(entry.requirement());
            }
            None => {
                locked_runtime.insert(entry.requirement());
            }
        }
    }
    compare_sets("runtime", &manifest.runtime, &locked_runtime)?;
    compare_groups("extra", &manifest.extras, &locked_extras)?;

    let locked_dev: BTreeMap<String, BTreeSet<Requirement>> = metadata
        .requires_dev
        .iter()
        .map(|(group, reqs)| {
            (
                manifest::normalize_name(group),
                reqs.iter().map(|r| r.requirement()).collect(),
            )
        })
        .collect();
    compare_groups("dev group", &manifest.dev, &locked_dev)?;

    let closure = runtime_closure(lock, root)?;
    for pkg in &closure {
        if pkg.requires_hash() && pkg.hashes().is_empty() {
            return Err(BootstrapError::Unpinned {
                name: pkg.name.clone(),
                version: pkg.version_or_empty().to_string(),
            });
        }
    }

    let mut pins: Vec<Pin> = closure
        .iter()
        .map(|p| Pin {
            name: p.normalized_name(),
            version: p.version_or_empty().to_string(),
            hashes: p.hashes(),
        })
        .collect();
    pins.sort();
    pins.dedup();

    let in_closure: BTreeSet<&str> = pins.iter().map(|p| p.name.as_str()).collect();
    let root_name = root.normalized_name();
    let mut dev_only: Vec<String> = lock
        .packages
        .iter()
        .map(|p| p.normalized_name())
        .filter(|n| n != &root_name && !in_closure.contains(n.as_str()))
        .collect();
    dev_only.sort();
    dev_only.dedup();

    Ok(LockReport {
        root: root_name,
        digest: closure_digest(&pins),
        closure: pins,
        dev_only,
    })
}

/// SHA-256 over `name==version` lines followed by each package's hashes.
pub fn closure_digest(pins: &[Pin]) -> String {
    let mut sorted: Vec<&Pin> = pins.iter().collect();
    sorted.sort();
    let mut hasher = Sha256::new();
    for pin in sorted {
        hasher.update(format!("{}=={}\n", pin.name, pin.version).as_bytes());
        for hash in &pin.hashes {
            hasher.update(format!("  {}\n", hash).as_bytes());
        }
    }
    format!("{:x}", hasher.finalize())
}

fn compare_sets(
    what: &str,
    declared: &BTreeSet<Requirement>,
    locked: &BTreeSet<Requirement>,
) -> Result<()> {
    let missing: Vec<String> = declared.difference(locked).map(describe).collect();
    let extra: Vec<String> = locked.difference(declared).map(describe).collect();
    if missing.is_empty() && extra.is_empty() {
        return Ok(());
    }
    let mut parts = Vec::new();
    if !missing.is_empty() {
        parts.push(format!("not locked: {}", missing.join(", ")));
    }
    if !extra.is_empty() {
        parts.push(format!("locked but not declared: {}", extra.join(", ")));
    }
    Err(BootstrapError::LockDrift(format!(
        "{} requirements differ ({})",
        what,
        parts.join("; ")
    )))
}

fn compare_groups(
    what: &str,
    declared: &BTreeMap<String, BTreeSet<Requirement>>,
    locked: &BTreeMap<String, BTreeSet<Requirement>>,
) -> Result<()> {
    let empty = BTreeSet::new();
    let names: BTreeSet<&String> = declared.keys().chain(locked.keys()).collect();
    for name in names {
        compare_sets(
            &format!("{} '{}'", what, name),
            declared.get(name).unwrap_or(&empty),
            locked.get(name).unwrap_or(&empty),
        )?;
    }
    Ok(())
}

fn describe(req: &Requirement) -> String {
    format!("{}{}", req.name, req.specifier)
}

// Breadth-first walk over runtime edges. Dev edges are never followed.
fn runtime_closure<'a>(
    lock: &'a Lock,
    root: &'a LockedPackage,
) -> Result<Vec<&'a LockedPackage>> {
    let mut seen: BTreeSet<(String, String)> = BTreeSet::new();
    let mut out = Vec::new();
    let mut queue: VecDeque<(&lockfile::DependencyRef, &LockedPackage)> =
        root.dependencies.iter().map(|d| (d, root)).collect();

    while let Some((dep, parent)) = queue.pop_front() {
        let candidates: Vec<&LockedPackage> = lock
            .find(&dep.name)
            .into_iter()
            .filter(|p| dep.version.is_none() || p.version == dep.version)
            .collect();
        if candidates.is_empty() {
            return Err(BootstrapError::LockDrift(format!(
                "'{}' depends on '{}', which is not in the lock",
                parent.name, dep.name
            )));
        }

        for pkg in candidates {
            let key = (pkg.normalized_name(), pkg.version_or_empty().to_string());
            let first_visit = seen.insert(key);
            if first_visit {
                out.push(pkg);
                queue.extend(pkg.dependencies.iter().map(|d| (d, pkg)));
            }
            for extra in &dep.extra {
                if let Some(extra_deps) = pkg.optional_dependencies.get(extra) {
                    queue.extend(extra_deps.iter().map(|d| (d, pkg)));
                }
            }
        }
    }
    Ok(out)
}
