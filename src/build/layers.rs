//! Layer snapshot store.
//!
//! Each filesystem-changing layer is kept as a full copy of the image tree
//! after that layer, under `<cache>/layers/<key>/rootfs`, with a
//! `layer.json` beside it. A snapshot is only visible once its metadata is
//! written, so an interrupted store is never mistaken for a hit.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::files::{copy_tree, IgnoreSet};
use crate::plan::Phase;

const META_FILE: &str = "layer.json";
const ROOTFS_DIR: &str = "rootfs";

/// Metadata stored next to a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerMeta {
    pub key: String,
    pub parent: Option<String>,
    pub phase: Phase,
    pub descriptor: String,
}

#[derive(Debug, Clone)]
pub struct LayerStore {
    root: PathBuf,
}

impl LayerStore {
    pub fn open(cache_dir: &Path) -> Result<Self> {
        let root = cache_dir.join("layers");
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create layer cache at {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        let dir = self.dir(key);
        dir.join(META_FILE).is_file() && dir.join(ROOTFS_DIR).is_dir()
    }

    pub fn meta(&self, key: &str) -> Option<LayerMeta> {
        let content = fs::read_to_string(self.dir(key).join(META_FILE)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Snapshot `tree` as layer `meta.key`, replacing any previous copy.
    pub fn store(&self, meta: &LayerMeta, tree: &Path) -> Result<()> {
        let dir = self.dir(&meta.key);
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .with_context(|| format!("Failed to clear stale layer {}", dir.display()))?;
        }
        copy_tree(tree, &dir.join(ROOTFS_DIR), &IgnoreSet::default(), is_root())?;
        let json = serde_json::to_string_pretty(meta)?;
        fs::write(dir.join(META_FILE), json)
            .with_context(|| format!("Failed to write layer metadata in {}", dir.display()))?;
        log::debug!("stored layer {} ({})", short(&meta.key), meta.phase);
        Ok(())
    }

    /// Copy snapshot `key` into `dest`, which must not exist yet.
    pub fn restore(&self, key: &str, dest: &Path) -> Result<()> {
        if !self.contains(key) {
            anyhow::bail!("Layer {} is not in the cache", short(key));
        }
        copy_tree(&self.dir(key).join(ROOTFS_DIR), dest, &IgnoreSet::default(), is_root())?;
        log::debug!("restored layer {} into {}", short(key), dest.display());
        Ok(())
    }

    /// Metadata of every complete layer, sorted by phase.
    pub fn list(&self) -> Result<Vec<LayerMeta>> {
        let mut layers = Vec::new();
        for entry in fs::read_dir(&self.root)
            .with_context(|| format!("Failed to read {}", self.root.display()))?
        {
            let entry = entry?;
            let key = entry.file_name().to_string_lossy().to_string();
            if let Some(meta) = self.meta(&key).filter(|_| self.contains(&key)) {
                layers.push(meta);
            }
        }
        layers.sort_by(|a, b| a.phase.cmp(&b.phase).then_with(|| a.key.cmp(&b.key)));
        Ok(layers)
    }

    /// Remove every snapshot. Returns how many were removed.
    pub fn remove_all(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.is_dir() {
                fs::remove_dir_all(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// First twelve characters of a key, for display.
pub fn short(key: &str) -> &str {
    &key[..key.len().min(12)]
}

fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn meta(key: &str, phase: Phase) -> LayerMeta {
        LayerMeta {
            key: key.to_string(),
            parent: None,
            phase,
            descriptor: "{}".to_string(),
        }
    }

    #[test]
    fn test_store_and_restore() {
        let cache = TempDir::new().unwrap();
        let tree = TempDir::new().unwrap();
        fs::create_dir_all(tree.path().join("app")).unwrap();
        fs::write(tree.path().join("app/uv.lock"), "lock").unwrap();

        let store = LayerStore::open(cache.path()).unwrap();
        assert!(!store.contains("abc"));
        store.store(&meta("abc", Phase::Declarations), tree.path()).unwrap();
        assert!(store.contains("abc"));
        assert_eq!(store.meta("abc").unwrap().phase, Phase::Declarations);

        let dest = TempDir::new().unwrap().path().join("restored");
        store.restore("abc", &dest).unwrap();
        assert_eq!(fs::read_to_string(dest.join("app/uv.lock")).unwrap(), "lock");
    }

    #[test]
    fn test_incomplete_layer_is_not_a_hit() {
        let cache = TempDir::new().unwrap();
        let store = LayerStore::open(cache.path()).unwrap();
        fs::create_dir_all(store.root().join("half/rootfs")).unwrap();
        assert!(!store.contains("half"));
        assert!(store.list().unwrap().is_empty());
        assert!(store.restore("half", &cache.path().join("out")).is_err());
    }

    #[test]
    fn test_list_and_remove_all() {
        let cache = TempDir::new().unwrap();
        let tree = TempDir::new().unwrap();
        let store = LayerStore::open(cache.path()).unwrap();
        store.store(&meta("k2", Phase::Install), tree.path()).unwrap();
        store.store(&meta("k1", Phase::Base), tree.path()).unwrap();

        let phases: Vec<Phase> = store.list().unwrap().iter().map(|m| m.phase).collect();
        assert_eq!(phases, vec![Phase::Base, Phase::Install]);
        assert_eq!(store.remove_all().unwrap(), 2);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_short_key() {
        assert_eq!(short("0123456789abcdef"), "0123456789ab");
        assert_eq!(short("abc"), "abc");
    }
}
