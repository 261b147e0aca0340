//! Content hashing for layer cache keys.
//!
//! Uses SHA256 over actual content, not mtimes, for everything a layer copies
//! in. The base root filesystem is the exception: it is fingerprinted by
//! path, size and mtime because hashing a whole distribution on every build
//! costs more than it saves.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use crate::build::files::{list_tree, IgnoreSet};

/// Compute SHA256 hash of multiple files concatenated.
/// Returns None if any file doesn't exist.
/// Logs a warning if a file exists but can't be read.
pub fn hash_files(paths: &[&Path]) -> Option<String> {
    let mut hasher = Sha256::new();
    for path in paths {
        if !path.exists() {
            return None;
        }
        match fs::read(path) {
            Ok(content) => {
                // Length prefix keeps "ab"+"c" distinct from "a"+"bc".
                hasher.update((content.len() as u64).to_le_bytes());
                hasher.update(&content);
            }
            Err(e) => {
                log::warn!(
                    "Failed to read {} for hashing: {} (cache will be invalidated)",
                    path.display(),
                    e
                );
                return None;
            }
        }
    }
    Some(format!("{:x}", hasher.finalize()))
}

/// Content hash of a filtered tree: relative paths, entry kinds, modes,
/// symlink targets and file contents, in sorted order.
pub fn hash_tree(root: &Path, ignore: &IgnoreSet) -> Result<String> {
    let mut hasher = Sha256::new();
    for rel in list_tree(root, ignore)? {
        let path = root.join(&rel);
        let meta = fs::symlink_metadata(&path)
            .with_context(|| format!("Failed to stat {}", path.display()))?;
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update([0]);
        hasher.update((meta.mode() & 0o7777).to_le_bytes());
        if meta.file_type().is_symlink() {
            hasher.update(b"L");
            hasher.update(fs::read_link(&path)?.to_string_lossy().as_bytes());
        } else if meta.is_file() {
            hasher.update(b"F");
            let content =
                fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
            hasher.update((content.len() as u64).to_le_bytes());
            hasher.update(&content);
        } else {
            hasher.update(b"D");
        }
        hasher.update([0]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Cheap fingerprint of a tree: relative paths, sizes and mtimes.
pub fn fingerprint_tree(root: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    for rel in list_tree(root, &IgnoreSet::default())? {
        let meta = fs::symlink_metadata(root.join(&rel))?;
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update(meta.len().to_le_bytes());
        hasher.update(meta.mtime().to_le_bytes());
        hasher.update(meta.mtime_nsec().to_le_bytes());
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Chain a layer key onto its parent: H(parent || descriptor || input).
pub fn chain_key(parent: Option<&str>, descriptor: &str, input: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parent.unwrap_or("").as_bytes());
    hasher.update([0]);
    hasher.update(descriptor.as_bytes());
    hasher.update([0]);
    hasher.update(input.unwrap_or("").as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_hash_files_missing_is_none() {
        assert!(hash_files(&[Path::new("/nonexistent/file")]).is_none());
    }

    #[test]
    fn test_hash_files_boundaries() {
        let dir = TempDir::new().unwrap();
        let (a, b, c, d) = (
            dir.path().join("a"),
            dir.path().join("b"),
            dir.path().join("c"),
            dir.path().join("d"),
        );
        fs::write(&a, "ab").unwrap();
        fs::write(&b, "c").unwrap();
        fs::write(&c, "a").unwrap();
        fs::write(&d, "bc").unwrap();
        assert_ne!(
            hash_files(&[a.as_path(), b.as_path()]),
            hash_files(&[c.as_path(), d.as_path()])
        );
    }

    #[test]
    fn test_hash_tree_ignores_ignored_and_tracks_content() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("bot.py"), "v1").unwrap();
        let ignore = IgnoreSet::new(["*.log"]);
        let before = hash_tree(dir.path(), &ignore).unwrap();

        fs::write(dir.path().join("debug.log"), "noise").unwrap();
        assert_eq!(before, hash_tree(dir.path(), &ignore).unwrap());

        fs::write(dir.path().join("bot.py"), "v2").unwrap();
        assert_ne!(before, hash_tree(dir.path(), &ignore).unwrap());
    }

    #[test]
    fn test_chain_key_depends_on_parent() {
        let a = chain_key(None, "WORKDIR /app", None);
        let b = chain_key(Some("x"), "WORKDIR /app", None);
        assert_ne!(a, b);
        assert_eq!(a, chain_key(None, "WORKDIR /app", None));
    }
}
