//! Bootseq: locked-dependency, least-privilege service images.
//!
//! A bootstrap plan takes a service from a base runtime image to a running
//! process in a fixed order: place the dependency tool, copy manifest and
//! lock, install strictly from the lock, copy the source, hand the working
//! directory to a non-root identity, drop privileges, and run the entry file
//! through the tool.
//!
//! The library exposes every stage for the CLI and for integration tests.

pub mod build;
pub mod cache;
pub mod clean;
pub mod commands;
pub mod config;
pub mod error;
pub mod identity;
pub mod launch;
pub mod lock;
pub mod logging;
pub mod ownership;
pub mod plan;
pub mod preflight;
pub mod process;
pub mod recipe;
pub mod render;
pub mod timing;

pub use error::{BootstrapError, Result};
pub use identity::Identity;
pub use plan::{Op, Phase, Plan};
pub use recipe::{LayerOrder, Recipe};
