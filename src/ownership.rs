//! Ownership transfer and inspection of the application directory.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{BootstrapError, Result};

/// Recursively give `root` and everything under it to `uid:gid`.
///
/// Symlinks are re-owned themselves, never followed. Returns the number of
/// entries changed.
pub fn transfer(root: &Path, uid: u32, gid: u32) -> Result<usize> {
    if !root.exists() {
        return Err(BootstrapError::OwnershipTransfer {
            path: root.to_path_buf(),
            reason: "directory does not exist".to_string(),
        });
    }

    let mut count = 0;
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| BootstrapError::OwnershipTransfer {
            path: root.to_path_buf(),
            reason: e.to_string(),
        })?;
        std::os::unix::fs::lchown(entry.path(), Some(uid), Some(gid)).map_err(|e| {
            BootstrapError::OwnershipTransfer {
                path: entry.path().to_path_buf(),
                reason: e.to_string(),
            }
        })?;
        count += 1;
    }
    log::debug!("chown {}:{} on {} entries under {}", uid, gid, count, root.display());
    Ok(count)
}

/// Entries under `root` (inclusive) not owned by `uid:gid`.
pub fn inspect(root: &Path, uid: u32, gid: u32) -> Result<Vec<PathBuf>> {
    let mut foreign = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
        let meta = fs::symlink_metadata(entry.path())?;
        if meta.uid() != uid || meta.gid() != gid {
            foreign.push(entry.path().to_path_buf());
        }
    }
    Ok(foreign)
}

/// Fail unless every entry under `root` is owned by `uid:gid`.
pub fn verify_owned(root: &Path, uid: u32, gid: u32) -> Result<()> {
    let foreign = inspect(root, uid, gid)?;
    if foreign.is_empty() {
        return Ok(());
    }
    for path in foreign.iter().take(10) {
        log::warn!("not owned by {}:{}: {}", uid, gid, path.display());
    }
    Err(BootstrapError::OwnershipMismatch {
        root: root.to_path_buf(),
        uid,
        gid,
        count: foreign.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn own_ids() -> (u32, u32) {
        // SAFETY: geteuid/getegid have no preconditions and cannot fail.
        unsafe { (libc::geteuid(), libc::getegid()) }
    }

    #[test]
    fn test_transfer_to_self_and_verify() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/reader.py"), "").unwrap();
        std::os::unix::fs::symlink("src/reader.py", dir.path().join("link")).unwrap();

        let (uid, gid) = own_ids();
        let changed = transfer(dir.path(), uid, gid).unwrap();
        assert_eq!(changed, 4);
        verify_owned(dir.path(), uid, gid).unwrap();
    }

    #[test]
    fn test_inspect_reports_foreign_entries() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a"), "").unwrap();
        let (uid, gid) = own_ids();
        let foreign = inspect(dir.path(), uid.wrapping_add(1), gid).unwrap();
        assert_eq!(foreign.len(), 2);

        let err = verify_owned(dir.path(), uid.wrapping_add(1), gid).unwrap_err();
        assert!(matches!(err, BootstrapError::OwnershipMismatch { count: 2, .. }));
    }

    #[test]
    fn test_transfer_missing_dir_fails() {
        let err = transfer(Path::new("/nonexistent/app"), 1000, 1000).unwrap_err();
        assert!(matches!(err, BootstrapError::OwnershipTransfer { .. }));
    }
}
