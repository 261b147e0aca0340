//! Containerfile rendering.
//!
//! One instruction per op, in plan order. The ignore file keeps the build
//! context equal to what the local executor copies.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::plan::{Op, Plan};
use crate::recipe::Recipe;

pub const CONTAINERFILE: &str = "Containerfile";
pub const IGNOREFILE: &str = ".containerignore";

/// Render a single op as a Containerfile instruction.
pub fn render_op(op: &Op) -> String {
    match op {
        Op::From { image } => format!("FROM {}", image),
        Op::PlaceTool {
            image,
            source,
            dest,
        } => format!("COPY --from={} {} {}", image, source, dest),
        Op::Workdir { path } => format!("WORKDIR {}", path),
        Op::CopyDeclarations { files } => format!("COPY {} ./", files.join(" ")),
        Op::Install { argv } => format!("RUN {}", shell_join(argv)),
        Op::CopySource { .. } => "COPY . .".to_string(),
        Op::CreateIdentity { identity, workdir } => format!(
            "RUN groupadd --gid {gid} {group} \\\n    && useradd --uid {uid} --gid {gid} --home-dir {home} --create-home --shell /bin/sh {user} \\\n    && chown -R {uid}:{gid} {workdir}",
            gid = identity.gid,
            uid = identity.uid,
            group = identity.group,
            user = identity.user,
            home = identity.home,
            workdir = workdir,
        ),
        Op::DropPrivileges { uid, gid } => format!("USER {}:{}", uid, gid),
        Op::Entrypoint { argv } => format!("CMD {}", json_argv(argv)),
    }
}

/// Render the whole plan.
pub fn render_containerfile(plan: &Plan) -> String {
    let mut out = String::new();
    let mut previous = None;
    for op in plan.ops() {
        let phase = op.phase();
        // Blank line between phases, none inside one.
        if previous.is_some() && previous != Some(phase) {
            out.push('\n');
        }
        out.push_str(&render_op(op));
        out.push('\n');
        previous = Some(phase);
    }
    out
}

/// Render the ignore file for the build context.
pub fn render_ignore(recipe: &Recipe) -> String {
    let mut out = String::new();
    for pattern in &recipe.app.ignore {
        let pattern = pattern.trim_end_matches('/');
        if pattern.starts_with('*') {
            out.push_str(&format!("**/{}\n", pattern));
        } else if pattern.contains('/') {
            out.push_str(&format!("{}\n", pattern));
        } else {
            out.push_str(&format!("{}\n**/{}\n", pattern, pattern));
        }
    }
    // Re-include the declarations whatever the patterns above match.
    for file in [&recipe.dependencies.manifest, &recipe.dependencies.lock] {
        out.push_str(&format!("!{}\n", file));
    }
    out
}

/// Write `Containerfile` and `.containerignore` into `dir`.
pub fn write_all(plan: &Plan, recipe: &Recipe, dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let containerfile = dir.join(CONTAINERFILE);
    let ignore = dir.join(IGNOREFILE);
    fs::write(&containerfile, render_containerfile(plan))
        .with_context(|| format!("Failed to write {}", containerfile.display()))?;
    fs::write(&ignore, render_ignore(recipe))
        .with_context(|| format!("Failed to write {}", ignore.display()))?;
    Ok(vec![containerfile, ignore])
}

fn json_argv(argv: &[String]) -> String {
    serde_json::to_string(argv).unwrap_or_else(|_| "[]".to_string())
}

fn shell_join(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| shell_quote(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}
