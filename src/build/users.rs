//! User and group management inside the image root.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::error::BootstrapError;
use crate::identity::{Identity, DEFAULT_SHELL};

/// A parsed passwd or group line: name and primary numeric id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub id: u32,
    pub gid: Option<u32>,
}

/// Read entries from `etc/passwd` under `root`.
///
/// Returns:
/// - Ok(vec) with every user (empty if the file doesn't exist)
/// - Err if file exists but is corrupted/unreadable
pub fn read_users(root: &Path) -> Result<Vec<Entry>> {
    let passwd_path = root.join("etc/passwd");
    if !passwd_path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(&passwd_path)
        .with_context(|| format!("Failed to read passwd file at {}", passwd_path.display()))?;

    let mut entries = Vec::new();
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        let parts: Vec<&str> = line.split(':').collect();
        if parts.len() < 4 {
            anyhow::bail!(
                "Corrupted passwd file: malformed line '{}' at {}",
                line,
                passwd_path.display()
            );
        }
        let uid: u32 = parts[2].parse().with_context(|| {
            format!(
                "Corrupted passwd file: invalid UID '{}' for user '{}' at {}",
                parts[2],
                parts[0],
                passwd_path.display()
            )
        })?;
        let gid: u32 = parts[3].parse().with_context(|| {
            format!(
                "Corrupted passwd file: invalid GID '{}' for user '{}' at {}",
                parts[3],
                parts[0],
                passwd_path.display()
            )
        })?;
        entries.push(Entry {
            name: parts[0].to_string(),
            id: uid,
            gid: Some(gid),
        });
    }
    Ok(entries)
}

/// Read entries from `etc/group` under `root`.
pub fn read_groups(root: &Path) -> Result<Vec<Entry>> {
    let group_path = root.join("etc/group");
    if !group_path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(&group_path)
        .with_context(|| format!("Failed to read group file at {}", group_path.display()))?;

    let mut entries = Vec::new();
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        let parts: Vec<&str> = line.split(':').collect();
        if parts.len() < 3 {
            anyhow::bail!(
                "Corrupted group file: malformed line '{}' at {}",
                line,
                group_path.display()
            );
        }
        let gid: u32 = parts[2].parse().with_context(|| {
            format!(
                "Corrupted group file: invalid GID '{}' for group '{}' at {}",
                parts[2],
                parts[0],
                group_path.display()
            )
        })?;
        entries.push(Entry {
            name: parts[0].to_string(),
            id: gid,
            gid: None,
        });
    }
    Ok(entries)
}

/// Ensure the identity's group exists with its fixed gid.
///
/// An identical entry is left alone. A same-name entry with another gid, or
/// another group already holding the gid, is a collision.
pub fn ensure_group(root: &Path, identity: &Identity) -> Result<()> {
    let groups = read_groups(root)?;
    for entry in &groups {
        if entry.name == identity.group && entry.id == identity.gid {
            return Ok(());
        }
        if entry.name == identity.group {
            return Err(BootstrapError::IdentityCollision(format!(
                "group '{}' already exists with gid {}",
                entry.name, entry.id
            ))
            .into());
        }
        if entry.id == identity.gid {
            return Err(BootstrapError::IdentityCollision(format!(
                "gid {} already belongs to group '{}'",
                entry.id, entry.name
            ))
            .into());
        }
    }

    append_line(
        &root.join("etc/group"),
        &format!("{}:x:{}:\n", identity.group, identity.gid),
    )
    .with_context(|| format!("Failed to write group for {}", identity.group))
}

/// Ensure the identity's user exists with its fixed uid and primary gid.
pub fn ensure_user(root: &Path, identity: &Identity) -> Result<()> {
    let users = read_users(root)?;
    for entry in &users {
        if entry.name == identity.user
            && entry.id == identity.uid
            && entry.gid == Some(identity.gid)
        {
            return Ok(());
        }
        if entry.name == identity.user {
            return Err(BootstrapError::IdentityCollision(format!(
                "user '{}' already exists with uid {}",
                entry.name, entry.id
            ))
            .into());
        }
        if entry.id == identity.uid {
            return Err(BootstrapError::IdentityCollision(format!(
                "uid {} already belongs to user '{}'",
                entry.id, entry.name
            ))
            .into());
        }
    }

    let line = format!(
        "{}:x:{}:{}::{}:{}\n",
        identity.user, identity.uid, identity.gid, identity.home, DEFAULT_SHELL
    );
    append_line(&root.join("etc/passwd"), &line)
        .with_context(|| format!("Failed to write passwd for user {}", identity.user))
}

/// Create the identity: group first, then the user that references it.
pub fn create_identity(root: &Path, identity: &Identity) -> Result<()> {
    fs::create_dir_all(root.join("etc"))?;
    ensure_group(root, identity)?;
    ensure_user(root, identity)?;
    Ok(())
}

// Unreadable files fail fast instead of being silently replaced.
fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut content = if path.exists() {
        fs::read_to_string(path)?
    } else {
        String::new()
    };
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(line);
    fs::write(path, content)?;
    Ok(())
}
