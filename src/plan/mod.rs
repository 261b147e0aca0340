//! The bootstrap plan: ordered build operations and their invariants.
//!
//! A plan is data describing WHAT happens, in order. The renderer turns it
//! into a Containerfile; the executor materializes it on the host. Both read
//! the same ops, so the order checked here is the order that runs.
//!
//! ```text
//! From → PlaceTool → Workdir → CopyDeclarations → Install → CopySource
//!      → CreateIdentity → DropPrivileges → Entrypoint
//! ```

pub mod stage;

pub use stage::{Handover, Privileged, Stage, Unprivileged};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{BootstrapError, Result};
use crate::identity::Identity;
use crate::recipe::{LayerOrder, Recipe};

/// Step kinds, in cache-friendly order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum Phase {
    /// Acquire the base runtime environment.
    Base = 1,
    /// Place the dependency tool.
    Tool = 2,
    /// Establish the working directory.
    Workdir = 3,
    /// Copy manifest and lock.
    Declarations = 4,
    /// Install the locked closure.
    Install = 5,
    /// Copy application source.
    Source = 6,
    /// Create the identity and transfer ownership.
    Identity = 7,
    /// Switch to the identity.
    Drop = 8,
    /// Declare the entry point.
    Entry = 9,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Base => "base",
            Phase::Tool => "tool",
            Phase::Workdir => "workdir",
            Phase::Declarations => "declarations",
            Phase::Install => "install",
            Phase::Source => "source",
            Phase::Identity => "identity",
            Phase::Drop => "drop",
            Phase::Entry => "entry",
        };
        f.pad(name)
    }
}

/// A single build operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Op {
    From {
        image: String,
    },
    PlaceTool {
        image: String,
        source: String,
        dest: String,
    },
    Workdir {
        path: String,
    },
    CopyDeclarations {
        files: Vec<String>,
    },
    Install {
        argv: Vec<String>,
    },
    CopySource {
        ignore: Vec<String>,
    },
    CreateIdentity {
        identity: Identity,
        workdir: String,
    },
    DropPrivileges {
        uid: u32,
        gid: u32,
    },
    Entrypoint {
        argv: Vec<String>,
    },
}

impl Op {
    pub fn phase(&self) -> Phase {
        match self {
            Op::From { .. } => Phase::Base,
            Op::PlaceTool { .. } => Phase::Tool,
            Op::Workdir { .. } => Phase::Workdir,
            Op::CopyDeclarations { .. } => Phase::Declarations,
            Op::Install { .. } => Phase::Install,
            Op::CopySource { .. } => Phase::Source,
            Op::CreateIdentity { .. } => Phase::Identity,
            Op::DropPrivileges { .. } => Phase::Drop,
            Op::Entrypoint { .. } => Phase::Entry,
        }
    }

    /// True if the op needs the build's elevated context.
    pub fn privileged(&self) -> bool {
        self.phase() <= Phase::Identity
    }

    /// True if the op changes the image filesystem.
    pub fn writes_filesystem(&self) -> bool {
        self.phase() <= Phase::Identity
    }

    /// Canonical text of the op, used in layer keys.
    pub fn descriptor(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}

/// An ordered, validated list of build operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    order: LayerOrder,
    ops: Vec<Op>,
}

impl Plan {
    pub(crate) fn assemble(order: LayerOrder, ops: Vec<Op>) -> Self {
        Self { order, ops }
    }

    /// Build the plan for a recipe through the typed stages.
    pub fn from_recipe(recipe: &Recipe) -> Result<Self> {
        recipe.validate()?;

        let order = recipe.layout.order;
        let stage = Stage::from_image(&recipe.base.image, order)
            .place_tool(&recipe.tool.image, &recipe.tool.source, &recipe.tool.path)
            .workdir(&recipe.app.workdir);

        let stage = match order {
            LayerOrder::CacheFriendly => stage
                .copy_declarations(&[
                    recipe.dependencies.manifest.clone(),
                    recipe.dependencies.lock.clone(),
                ])
                .install(&recipe.install_argv())
                .copy_source(&recipe.app.ignore),
            LayerOrder::SourceFirst => stage
                .copy_source(&recipe.app.ignore)
                .install(&recipe.install_argv()),
        };

        let plan = stage
            .create_identity(&recipe.identity, &recipe.app.workdir)
            .drop_privileges()
            .entrypoint(&recipe.entrypoint());
        plan.validate()?;
        Ok(plan)
    }

    /// Accept an arbitrary op list, validated.
    pub fn from_ops(order: LayerOrder, ops: Vec<Op>) -> Result<Self> {
        let plan = Self { order, ops };
        plan.validate()?;
        Ok(plan)
    }

    /// Accept an op list without validation.
    #[doc(hidden)]
    pub fn for_testing(order: LayerOrder, ops: Vec<Op>) -> Self {
        Self { order, ops }
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn order(&self) -> LayerOrder {
        self.order
    }

    fn find(&self, phase: Phase) -> Option<usize> {
        self.ops.iter().position(|op| op.phase() == phase)
    }

    fn count(&self, phase: Phase) -> usize {
        self.ops.iter().filter(|op| op.phase() == phase).count()
    }

    /// Placed tool path, if the plan places one.
    pub fn tool_path(&self) -> Option<&str> {
        self.ops.iter().find_map(|op| match op {
            Op::PlaceTool { dest, .. } => Some(dest.as_str()),
            _ => None,
        })
    }

    pub fn workdir(&self) -> Option<&str> {
        self.ops.iter().find_map(|op| match op {
            Op::Workdir { path } => Some(path.as_str()),
            _ => None,
        })
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.ops.iter().find_map(|op| match op {
            Op::CreateIdentity { identity, .. } => Some(identity),
            _ => None,
        })
    }

    pub fn entrypoint(&self) -> Option<&[String]> {
        self.ops.iter().find_map(|op| match op {
            Op::Entrypoint { argv } => Some(argv.as_slice()),
            _ => None,
        })
    }

    /// Check every ordering invariant of the lifecycle.
    pub fn validate(&self) -> Result<()> {
        // Base environment first, exactly once.
        if self.count(Phase::Base) != 1 || self.find(Phase::Base) != Some(0) {
            return Err(violation("the base image must be the first and only FROM"));
        }

        for phase in [
            Phase::Tool,
            Phase::Workdir,
            Phase::Install,
            Phase::Source,
            Phase::Identity,
            Phase::Drop,
            Phase::Entry,
        ] {
            match self.count(phase) {
                1 => {}
                0 => return Err(violation(&format!("missing {} step", phase))),
                n => return Err(violation(&format!("{} step appears {} times", phase, n))),
            }
        }
        if self.count(Phase::Declarations) > 1 {
            return Err(violation("declarations copied more than once"));
        }

        // Every `find` below is Some: each phase appears exactly once.
        let at = |phase| self.find(phase).unwrap_or(usize::MAX);
        let install = at(Phase::Install);
        let source = at(Phase::Source);
        let identity = at(Phase::Identity);

        if at(Phase::Tool) > install {
            return Err(violation(
                "the dependency tool must be placed before the install step",
            ));
        }

        let workdir = at(Phase::Workdir);
        let first_use = [Some(install), Some(source), self.find(Phase::Declarations)]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or(install);
        if workdir > first_use {
            return Err(violation(
                "the working directory must be set before anything is copied into it",
            ));
        }

        match self.order {
            LayerOrder::CacheFriendly => {
                match self.find(Phase::Declarations) {
                    Some(decls) if decls < install => {}
                    _ => {
                        return Err(violation(
                            "manifest and lock must be copied before the install step",
                        ))
                    }
                }
                if source < install {
                    return Err(violation(
                        "cache-friendly order copies source only after the install step",
                    ));
                }
            }
            LayerOrder::SourceFirst => {
                let declared = self
                    .find(Phase::Declarations)
                    .map_or(false, |decls| decls < install);
                if !declared && source > install {
                    return Err(violation(
                        "manifest and lock must be in place before the install step",
                    ));
                }
            }
        }

        if let Some(last_privileged) = self
            .ops
            .iter()
            .enumerate()
            .filter(|(_, op)| op.privileged() && op.phase() != Phase::Identity)
            .map(|(i, _)| i)
            .max()
        {
            if last_privileged > identity {
                return Err(violation(
                    "identity creation must follow every privileged step",
                ));
            }
        }

        let drop = at(Phase::Drop);
        if drop != identity + 1 {
            return Err(violation(
                "privileges must be dropped directly after the identity is created",
            ));
        }
        if let (Some(created), Op::DropPrivileges { uid, gid }) = (self.identity(), &self.ops[drop])
        {
            if created.uid != *uid || created.gid != *gid {
                return Err(violation(&format!(
                    "privilege drop targets {}:{} but the created identity is {}",
                    uid,
                    gid,
                    created.numeric()
                )));
            }
        }

        if at(Phase::Entry) != self.ops.len() - 1 {
            return Err(violation("the entry point must be the final step"));
        }
        match (self.entrypoint(), self.tool_path()) {
            (Some(argv), Some(tool)) if argv.first().map(String::as_str) == Some(tool) => {}
            _ => {
                return Err(violation(
                    "the entry point must be invoked through the placed dependency tool",
                ))
            }
        }

        Ok(())
    }
}

fn violation(msg: &str) -> BootstrapError {
    BootstrapError::OrderViolation(msg.to_string())
}
