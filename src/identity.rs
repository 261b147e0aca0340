//! The non-root execution identity.
//!
//! One user/group pair with fixed numeric ids, created at build time. It owns
//! the application directory and is the only principal the service runs as.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{BootstrapError, Result};

/// First id outside the range distributions reserve for system accounts.
pub const FIRST_UNRESERVED_ID: u32 = 1000;

/// Login shell written into the passwd entry.
pub const DEFAULT_SHELL: &str = "/bin/sh";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Identity {
    pub user: String,
    pub group: String,
    pub uid: u32,
    pub gid: u32,
    pub home: String,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            user: "appuser".to_string(),
            group: "appuser".to_string(),
            uid: 1000,
            gid: 1000,
            home: "/home/appuser".to_string(),
        }
    }
}

impl Identity {
    /// Reject root and anything inside the reserved system range.
    pub fn validate(&self) -> Result<()> {
        for id in [self.uid, self.gid] {
            if id == 0 {
                return Err(BootstrapError::ReservedIdentity {
                    id,
                    reason: "root cannot be the execution identity",
                });
            }
            if id < FIRST_UNRESERVED_ID {
                return Err(BootstrapError::ReservedIdentity {
                    id,
                    reason: "ids below 1000 collide with system accounts",
                });
            }
        }
        if !valid_name(&self.user) {
            return Err(BootstrapError::InvalidRecipe(format!(
                "invalid user name '{}'",
                self.user
            )));
        }
        if !valid_name(&self.group) {
            return Err(BootstrapError::InvalidRecipe(format!(
                "invalid group name '{}'",
                self.group
            )));
        }
        if !self.home.starts_with('/') {
            return Err(BootstrapError::InvalidRecipe(format!(
                "home '{}' must be absolute",
                self.home
            )));
        }
        Ok(())
    }

    /// Numeric `uid:gid` form used by `USER` and `chown`.
    pub fn numeric(&self) -> String {
        format!("{}:{}", self.uid, self.gid)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.user, self.group, self.numeric())
    }
}

// Portable passwd names: lowercase start, then [a-z0-9_-], at most 32 chars.
fn valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 32
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}
