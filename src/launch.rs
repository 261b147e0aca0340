//! Runtime entry: privilege drop and service exec.
//!
//! Inside the image the process should already be the execution identity.
//! When started as root anyway, the launcher drops to the recipe's identity
//! before anything else. It never runs the service as root.

use anyhow::{Context, Result};
use std::ffi::CString;
use std::fmt;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Command;

use crate::error::BootstrapError;
use crate::identity::Identity;
use crate::recipe::Recipe;

/// Real and effective ids of the current process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessIdentity {
    pub uid: u32,
    pub gid: u32,
    pub euid: u32,
    pub egid: u32,
}

impl ProcessIdentity {
    pub fn is_root(&self) -> bool {
        self.uid == 0 || self.euid == 0
    }

    pub fn matches(&self, identity: &Identity) -> bool {
        self.uid == identity.uid
            && self.euid == identity.uid
            && self.gid == identity.gid
            && self.egid == identity.gid
    }
}

impl fmt::Display for ProcessIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "uid={} gid={} euid={} egid={}",
            self.uid, self.gid, self.euid, self.egid
        )
    }
}

pub fn current_identity() -> ProcessIdentity {
    // SAFETY: the get*id calls have no preconditions and cannot fail.
    unsafe {
        ProcessIdentity {
            uid: libc::getuid(),
            gid: libc::getgid(),
            euid: libc::geteuid(),
            egid: libc::getegid(),
        }
    }
}

/// Fail if the effective identity is root.
pub fn require_non_root() -> std::result::Result<ProcessIdentity, BootstrapError> {
    let current = current_identity();
    if current.is_root() {
        return Err(BootstrapError::RunningAsRoot {
            uid: current.euid,
            gid: current.egid,
        });
    }
    Ok(current)
}

/// Permanently switch to `identity`.
///
/// Order matters: supplementary groups and gid must change while the process
/// still has the privilege to change them, uid last.
pub fn drop_to(identity: &Identity) -> std::result::Result<ProcessIdentity, BootstrapError> {
    identity.validate()?;

    let current = current_identity();
    if current.matches(identity) {
        return Ok(current);
    }
    if current.euid != 0 {
        return Err(BootstrapError::PrivilegeDrop(format!(
            "running as {} and cannot switch to {}",
            current,
            identity.numeric()
        )));
    }

    let gid = identity.gid as libc::gid_t;
    let uid = identity.uid as libc::uid_t;
    // SAFETY: plain syscalls on process credentials; the group list pointer
    // is valid for the duration of the call.
    unsafe {
        if libc::setgroups(1, &gid) != 0 {
            return Err(last_os_error("setgroups"));
        }
        if libc::setgid(gid) != 0 {
            return Err(last_os_error("setgid"));
        }
        if libc::setuid(uid) != 0 {
            return Err(last_os_error("setuid"));
        }
        // Root must not be recoverable.
        if libc::setuid(0) == 0 {
            return Err(BootstrapError::PrivilegeDrop(
                "root could be regained after setuid".to_string(),
            ));
        }
    }

    let after = current_identity();
    if !after.matches(identity) {
        return Err(BootstrapError::PrivilegeDrop(format!(
            "expected {} after drop, process is {}",
            identity.numeric(),
            after
        )));
    }
    log::info!("dropped privileges to {}", identity);
    Ok(after)
}

fn last_os_error(call: &str) -> BootstrapError {
    BootstrapError::PrivilegeDrop(format!("{}: {}", call, std::io::Error::last_os_error()))
}

/// Drop privileges if needed, then replace this process with the service.
///
/// `root` is the filesystem root the workdir lives under (`/` inside the
/// image). On success this never returns: the service's exit status is the
/// container's.
pub fn launch(recipe: &Recipe, root: &Path) -> Result<()> {
    let identity = &recipe.identity;
    let current = current_identity();
    let current = if current.is_root() {
        drop_to(identity)?
    } else {
        current
    };
    if current.is_root() {
        require_non_root()?;
    }
    if !current.matches(identity) {
        return Err(BootstrapError::PrivilegeDrop(format!(
            "process is {} but the recipe identity is {}",
            current,
            identity.numeric()
        ))
        .into());
    }

    let workdir = root.join(recipe.app.workdir.trim_start_matches('/'));
    std::env::set_current_dir(&workdir)
        .with_context(|| format!("Failed to enter {}", workdir.display()))?;

    let argv = recipe.entrypoint();
    let tool = root.join(argv[0].trim_start_matches('/'));
    // Validate argv early: exec reports interior NULs poorly.
    for arg in &argv {
        CString::new(arg.as_str())
            .with_context(|| format!("Entry point argument contains NUL: {:?}", arg))?;
    }

    log::info!("exec {} {}", tool.display(), argv[1..].join(" "));
    let err = Command::new(&tool)
        .args(&argv[1..])
        .env("HOME", &identity.home)
        .env("USER", &identity.user)
        .exec();
    Err(err).with_context(|| format!("Failed to exec {}", tool.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_identity_is_consistent() {
        let id = current_identity();
        assert_eq!(id.is_root(), id.uid == 0 || id.euid == 0);
    }

    #[test]
    fn test_require_non_root_matches_euid() {
        let id = current_identity();
        match require_non_root() {
            Ok(current) => assert!(!current.is_root()),
            Err(BootstrapError::RunningAsRoot { uid, .. }) => {
                assert!(id.is_root());
                assert_eq!(uid, id.euid);
            }
            Err(other) => panic!("unexpected error {}", other),
        }
    }

    #[test]
    fn test_drop_to_rejects_root_identity() {
        let root = Identity {
            uid: 0,
            gid: 0,
            ..Identity::default()
        };
        assert!(matches!(
            drop_to(&root),
            Err(BootstrapError::ReservedIdentity { id: 0, .. })
        ));
    }

    #[test]
    fn test_drop_to_without_privilege_fails_cleanly() {
        let id = current_identity();
        if id.euid == 0 {
            // Dropping for real would strip the test runner's privileges.
            return;
        }
        let other = Identity {
            uid: id.uid.max(1000) + 1,
            gid: id.gid.max(1000) + 1,
            ..Identity::default()
        };
        assert!(matches!(drop_to(&other), Err(BootstrapError::PrivilegeDrop(_))));
    }

    #[test]
    fn test_matches_requires_all_ids() {
        let id = ProcessIdentity {
            uid: 1000,
            gid: 1000,
            euid: 1000,
            egid: 100,
        };
        assert!(!id.matches(&Identity::default()));
        assert_eq!(id.to_string(), "uid=1000 gid=1000 euid=1000 egid=100");
    }
}
