//! Error taxonomy for the bootstrap lifecycle.
//!
//! Every variant is terminal for the step that produced it. There is no
//! partial-success state: a failed step aborts the build and leaves no
//! published image behind.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for sequencer operations.
pub type Result<T> = std::result::Result<T, BootstrapError>;

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Base environment unavailable: {0}")]
    BaseUnavailable(String),

    #[error("Dependency tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("Dependency tool not placed at {}: install cannot run", .0.display())]
    ToolMissing(PathBuf),

    #[error("Dependency manifest not found at {}", .0.display())]
    ManifestMissing(PathBuf),

    #[error("Dependency lock not found at {}", .0.display())]
    LockMissing(PathBuf),

    #[error("Lock does not match manifest: {0}")]
    LockDrift(String),

    #[error("Locked package {name}=={version} carries no hash")]
    Unpinned { name: String, version: String },

    #[error("Dependency install failed: {0}")]
    InstallFailed(String),

    #[error("Invalid step order: {0}")]
    OrderViolation(String),

    #[error("Identity {id} is reserved: {reason}")]
    ReservedIdentity { id: u32, reason: &'static str },

    #[error("Identity collision: {0}")]
    IdentityCollision(String),

    #[error("Ownership transfer failed for {}: {reason}", .path.display())]
    OwnershipTransfer { path: PathBuf, reason: String },

    #[error("{count} entries under {} are not owned by {uid}:{gid}", .root.display())]
    OwnershipMismatch {
        root: PathBuf,
        uid: u32,
        gid: u32,
        count: usize,
    },

    #[error("Privilege drop failed: {0}")]
    PrivilegeDrop(String),

    #[error("Refusing to run as root (uid={uid}, gid={gid})")]
    RunningAsRoot { uid: u32, gid: u32 },

    #[error("Invalid recipe: {0}")]
    InvalidRecipe(String),
}
