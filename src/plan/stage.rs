//! Typed build stages.
//!
//! Privileged operations only exist on `Stage<Privileged>`. Creating the
//! execution identity hands the stage over, and dropping privileges is the
//! only way to reach `Stage<Unprivileged>`, which can do nothing but declare
//! the entry point. A plan that installs or copies after the privilege drop
//! does not compile.

use std::marker::PhantomData;

use super::{Op, Plan};
use crate::identity::Identity;
use crate::recipe::LayerOrder;

/// Build-time context with elevated privilege.
#[derive(Debug)]
pub struct Privileged;

/// Identity created and ownership transferred; privileges not yet dropped.
#[derive(Debug)]
pub struct Handover;

/// Runtime context: the non-root identity is active.
#[derive(Debug)]
pub struct Unprivileged;

#[derive(Debug)]
pub struct Stage<S> {
    order: LayerOrder,
    ops: Vec<Op>,
    identity: Option<Identity>,
    _state: PhantomData<S>,
}

impl<S> Stage<S> {
    fn push(mut self, op: Op) -> Self {
        self.ops.push(op);
        self
    }

    fn into_state<T>(self) -> Stage<T> {
        Stage {
            order: self.order,
            ops: self.ops,
            identity: self.identity,
            _state: PhantomData,
        }
    }

    /// Operations recorded so far.
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }
}

impl Stage<Privileged> {
    /// Start from the base runtime image.
    pub fn from_image(image: &str, order: LayerOrder) -> Self {
        Self {
            order,
            ops: vec![Op::From {
                image: image.to_string(),
            }],
            identity: None,
            _state: PhantomData,
        }
    }

    /// Place the dependency tool at a fixed, executable path.
    pub fn place_tool(self, image: &str, source: &str, dest: &str) -> Self {
        self.push(Op::PlaceTool {
            image: image.to_string(),
            source: source.to_string(),
            dest: dest.to_string(),
        })
    }

    pub fn workdir(self, path: &str) -> Self {
        self.push(Op::Workdir {
            path: path.to_string(),
        })
    }

    /// Copy the manifest and lock, ahead of the source tree.
    pub fn copy_declarations(self, files: &[String]) -> Self {
        self.push(Op::CopyDeclarations {
            files: files.to_vec(),
        })
    }

    /// Install the locked closure.
    pub fn install(self, argv: &[String]) -> Self {
        self.push(Op::Install {
            argv: argv.to_vec(),
        })
    }

    pub fn copy_source(self, ignore: &[String]) -> Self {
        self.push(Op::CopySource {
            ignore: ignore.to_vec(),
        })
    }

    /// Create the execution identity and give it the working directory.
    /// This is the last privileged operation.
    pub fn create_identity(mut self, identity: &Identity, workdir: &str) -> Stage<Handover> {
        self.identity = Some(identity.clone());
        self.push(Op::CreateIdentity {
            identity: identity.clone(),
            workdir: workdir.to_string(),
        })
        .into_state()
    }
}

impl Stage<Handover> {
    /// Switch to the identity created in the previous step.
    pub fn drop_privileges(self) -> Stage<Unprivileged> {
        let (uid, gid) = self
            .identity
            .as_ref()
            .map(|id| (id.uid, id.gid))
            .unwrap_or_default();
        self.push(Op::DropPrivileges { uid, gid }).into_state()
    }
}

impl Stage<Unprivileged> {
    /// Declare the entry point. Finishes the plan.
    pub fn entrypoint(self, argv: &[String]) -> Plan {
        let order = self.order;
        let stage = self.push(Op::Entrypoint {
            argv: argv.to_vec(),
        });
        Plan::assemble(order, stage.ops)
    }
}
