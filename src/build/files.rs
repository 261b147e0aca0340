//! File and tree copying for image layers.

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Ignore patterns for the source copy.
///
/// A pattern matches a path if it equals the whole relative path or any
/// single component of it. `*.ext` matches file names by suffix.
#[derive(Debug, Clone, Default)]
pub struct IgnoreSet {
    patterns: Vec<String>,
    /// Relative subtrees excluded outright.
    subtrees: Vec<PathBuf>,
}

impl IgnoreSet {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().trim_end_matches('/').to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            subtrees: Vec::new(),
        }
    }

    /// Also exclude each of `dirs` that lies under `root`. Others are skipped.
    pub fn excluding_under(mut self, root: &Path, dirs: &[&Path]) -> Self {
        let canonical_root = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        for dir in dirs {
            // A directory that does not exist yet only matches literally.
            let rel = match fs::canonicalize(dir) {
                Ok(dir) => dir.strip_prefix(&canonical_root).map(Path::to_path_buf),
                Err(_) => dir.strip_prefix(root).map(Path::to_path_buf),
            };
            if let Ok(rel) = rel {
                if !rel.as_os_str().is_empty() {
                    self.subtrees.push(rel);
                }
            }
        }
        self
    }

    pub fn is_ignored(&self, rel: &Path) -> bool {
        if self.subtrees.iter().any(|dir| rel.starts_with(dir)) {
            return true;
        }
        let rel_str = rel.to_string_lossy();
        self.patterns.iter().any(|pattern| {
            if rel_str == pattern.as_str() {
                return true;
            }
            rel.components().any(|c| {
                let name = c.as_os_str().to_string_lossy();
                match pattern.strip_prefix('*') {
                    Some(suffix) => name.ends_with(suffix),
                    None => name == pattern.as_str(),
                }
            })
        })
    }
}

/// Every non-ignored entry under `src`, as relative paths in sorted order.
pub fn list_tree(src: &Path, ignore: &IgnoreSet) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let walker = WalkDir::new(src)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.path()
                .strip_prefix(src)
                .map(|rel| !ignore.is_ignored(rel))
                .unwrap_or(false)
        });
    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", src.display()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("{} escaped {}", entry.path().display(), src.display()))?;
        out.push(rel.to_path_buf());
    }
    Ok(out)
}

/// Copy a tree from `src` into `dst`, skipping ignored entries.
///
/// Modes and symlinks are preserved. Ownership is preserved only when
/// `keep_owner` is set, which needs root for foreign owners.
pub fn copy_tree(src: &Path, dst: &Path, ignore: &IgnoreSet, keep_owner: bool) -> Result<usize> {
    if !src.is_dir() {
        anyhow::bail!("Source tree {} is not a directory", src.display());
    }
    fs::create_dir_all(dst)
        .with_context(|| format!("Failed to create {}", dst.display()))?;

    let mut copied = 0;
    let mut dir_modes = Vec::new();
    for rel in list_tree(src, ignore)? {
        let from = src.join(&rel);
        let to = dst.join(&rel);
        if let Some(mode) = copy_entry(&from, &to, keep_owner)? {
            dir_modes.push((to, mode));
        }
        copied += 1;
    }
    // Directory modes last, so read-only directories can still be filled.
    for (dir, mode) in dir_modes.iter().rev() {
        fs::set_permissions(dir, fs::Permissions::from_mode(*mode))?;
    }
    if keep_owner {
        copy_owner(src, dst)?;
    }
    Ok(copied)
}

/// Copy a single file, creating parent directories and keeping its mode.
pub fn copy_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(from, to)
        .with_context(|| format!("Failed to copy {} to {}", from.display(), to.display()))?;
    Ok(())
}

/// Copy a file and force its mode.
pub fn copy_file_mode(from: &Path, to: &Path, mode: u32) -> Result<()> {
    copy_file(from, to)?;
    fs::set_permissions(to, fs::Permissions::from_mode(mode))
        .with_context(|| format!("Failed to set mode on {}", to.display()))?;
    Ok(())
}

// Returns the mode to apply once the directory's contents are in place.
fn copy_entry(from: &Path, to: &Path, keep_owner: bool) -> Result<Option<u32>> {
    let meta = fs::symlink_metadata(from)
        .with_context(|| format!("Failed to stat {}", from.display()))?;
    let file_type = meta.file_type();
    let mut dir_mode = None;

    if file_type.is_dir() {
        fs::create_dir_all(to)?;
        dir_mode = Some(meta.mode() & 0o7777);
    } else if file_type.is_symlink() {
        let target = fs::read_link(from)?;
        if fs::symlink_metadata(to).is_ok() {
            fs::remove_file(to)?;
        }
        std::os::unix::fs::symlink(&target, to)
            .with_context(|| format!("Failed to link {}", to.display()))?;
    } else if file_type.is_file() {
        if to.is_symlink() {
            fs::remove_file(to)?;
        }
        copy_file(from, to)?;
    } else {
        log::warn!("skipping special file {}", from.display());
        return Ok(None);
    }

    if keep_owner {
        copy_owner(from, to)?;
    }
    Ok(dir_mode)
}

fn copy_owner(from: &Path, to: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(from)?;
    std::os::unix::fs::lchown(to, Some(meta.uid()), Some(meta.gid()))
        .with_context(|| format!("Failed to preserve owner of {}", to.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_ignore_patterns() {
        let ignore = IgnoreSet::new([".git", "*.pyc", "output/", "docs/draft.md"]);
        assert!(ignore.is_ignored(Path::new(".git")));
        assert!(ignore.is_ignored(Path::new(".git/HEAD")));
        assert!(ignore.is_ignored(Path::new("src/__pycache__/x.pyc")));
        assert!(ignore.is_ignored(Path::new("output")));
        assert!(ignore.is_ignored(Path::new("docs/draft.md")));
        assert!(!ignore.is_ignored(Path::new("docs/readme.md")));
        assert!(!ignore.is_ignored(Path::new("src/reader.py")));
    }

    #[test]
    fn test_excluding_under_only_takes_nested_dirs() {
        let root = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();
        let out = root.path().join("build/out");
        fs::create_dir_all(&out).unwrap();

        let ignore = IgnoreSet::default().excluding_under(
            root.path(),
            &[out.as_path(), elsewhere.path(), root.path()],
        );
        assert!(ignore.is_ignored(Path::new("build/out")));
        assert!(ignore.is_ignored(Path::new("build/out/image/app/bot.py")));
        assert!(!ignore.is_ignored(Path::new("build")));
        assert!(!ignore.is_ignored(Path::new("build/outline.md")));
        assert!(!ignore.is_ignored(Path::new("bot.py")));
    }

    #[test]
    fn test_copy_tree_skips_ignored() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join("src")).unwrap();
        fs::create_dir_all(src.path().join(".git")).unwrap();
        fs::write(src.path().join("bot.py"), "print('hi')\n").unwrap();
        fs::write(src.path().join("src/reader.py"), "").unwrap();
        fs::write(src.path().join("src/reader.pyc"), "").unwrap();
        fs::write(src.path().join(".git/HEAD"), "ref").unwrap();

        let ignore = IgnoreSet::new([".git", "*.pyc"]);
        let copied = copy_tree(src.path(), dst.path(), &ignore, false).unwrap();

        assert_eq!(copied, 3);
        assert!(dst.path().join("bot.py").exists());
        assert!(dst.path().join("src/reader.py").exists());
        assert!(!dst.path().join("src/reader.pyc").exists());
        assert!(!dst.path().join(".git").exists());
    }

    #[test]
    fn test_copy_tree_keeps_symlinks_and_modes() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::write(src.path().join("run.sh"), "#!/bin/sh\n").unwrap();
        fs::set_permissions(src.path().join("run.sh"), fs::Permissions::from_mode(0o755)).unwrap();
        std::os::unix::fs::symlink("run.sh", src.path().join("start")).unwrap();

        copy_tree(src.path(), dst.path(), &IgnoreSet::default(), false).unwrap();

        let mode = fs::metadata(dst.path().join("run.sh")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert_eq!(
            fs::read_link(dst.path().join("start")).unwrap(),
            PathBuf::from("run.sh")
        );
    }

    #[test]
    fn test_list_tree_sorted() {
        let src = TempDir::new().unwrap();
        fs::write(src.path().join("b"), "").unwrap();
        fs::write(src.path().join("a"), "").unwrap();
        let listed = list_tree(src.path(), &IgnoreSet::default()).unwrap();
        assert_eq!(listed, vec![PathBuf::from("a"), PathBuf::from("b")]);
    }
}
