//! Local image build.
//!
//! - `context`: host-side inputs for a build
//! - `executor`: runs a plan op by op into a staging tree
//! - `files`: tree and file copying with ignore patterns
//! - `layers`: snapshot store behind the layer cache
//! - `users`: passwd/group entries inside the image

pub mod context;
pub mod executor;
pub mod files;
pub mod layers;
pub mod users;

pub use context::BuildContext;
pub use executor::{execute, BuildRecord, BuildReport, LayerReport, LayerStatus};
pub use layers::LayerStore;
