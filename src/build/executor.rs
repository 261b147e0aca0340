//! Local materialization of a plan.
//!
//! Every op runs against a staging tree at `<output>/.image.partial`. Layer
//! keys are computed up front and chained, so the longest cached prefix can
//! be restored in one copy. The staging tree only becomes `<output>/image`
//! once every op has succeeded.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::context::BuildContext;
use super::files::{copy_file, copy_file_mode, copy_tree, IgnoreSet};
use super::layers::{short, LayerMeta, LayerStore};
use super::users;
use crate::cache;
use crate::error::BootstrapError;
use crate::identity::Identity;
use crate::lock;
use crate::ownership;
use crate::plan::{Op, Phase, Plan};
use crate::process::Cmd;
use crate::recipe::Recipe;
use crate::timing::Timer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayerStatus {
    /// Restored from the layer cache.
    Cached,
    /// Executed in this build.
    Built,
    /// Runtime metadata; nothing to execute.
    Recorded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerReport {
    pub phase: Phase,
    pub key: String,
    pub status: LayerStatus,
}

/// Outcome of a successful build.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub image: PathBuf,
    pub layers: Vec<LayerReport>,
    pub closure_digest: String,
    pub duration: Duration,
}

impl BuildReport {
    pub fn status(&self, phase: Phase) -> Option<LayerStatus> {
        self.layers
            .iter()
            .find(|layer| layer.phase == phase)
            .map(|layer| layer.status)
    }

    pub fn built(&self) -> usize {
        self.layers
            .iter()
            .filter(|layer| layer.status == LayerStatus::Built)
            .count()
    }
}

/// Persisted description of a published image, `<output>/image.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub recipe_digest: String,
    pub base_image: String,
    pub tool_image: String,
    pub tool_path: String,
    pub workdir: String,
    pub identity: Identity,
    pub entrypoint: Vec<String>,
    pub closure_digest: String,
    pub layers: Vec<LayerReport>,
}

impl BuildRecord {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).with_context(|| {
            format!(
                "No build record at {}. Run 'bootseq build' first.",
                path.display()
            )
        })?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse build record {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write build record {}", path.display()))
    }
}

/// Path of an absolute image path under `root`.
pub fn in_image(root: &Path, path: &str) -> PathBuf {
    root.join(path.trim_start_matches('/'))
}

/// Materialize `plan` and publish it as `<output>/image`.
///
/// On any failure the staging tree is removed and no image is published.
pub fn execute(plan: &Plan, recipe: &Recipe, ctx: &BuildContext) -> Result<BuildReport> {
    let started = Instant::now();
    let partial = ctx.partial_dir();
    if partial.exists() {
        fs::remove_dir_all(&partial)
            .with_context(|| format!("Failed to clear stale {}", partial.display()))?;
    }
    fs::create_dir_all(&ctx.output)
        .with_context(|| format!("Failed to create {}", ctx.output.display()))?;

    let published = run(plan, recipe, ctx, &partial)
        .and_then(|layers| publish(plan, recipe, ctx, &partial, layers, started));
    match published {
        Ok(report) => {
            println!(
                "Image ready at {} ({} of {} layers built)",
                report.image.display(),
                report.built(),
                report.layers.len()
            );
            Ok(report)
        }
        Err(e) => {
            if partial.exists() {
                if let Err(cleanup) = fs::remove_dir_all(&partial) {
                    println!("  [WARN] Failed to remove {}: {}", partial.display(), cleanup);
                }
            }
            Err(e)
        }
    }
}

fn run(
    plan: &Plan,
    recipe: &Recipe,
    ctx: &BuildContext,
    partial: &Path,
) -> Result<Vec<LayerReport>> {
    let keys = layer_keys(plan, recipe, ctx)?;
    let store = if ctx.use_cache {
        Some(LayerStore::open(&ctx.cache_dir)?)
    } else {
        None
    };

    // Longest cached prefix. Keys are chained, so a hit implies its parents.
    let resume = store.as_ref().and_then(|store| {
        plan.ops()
            .iter()
            .zip(&keys)
            .enumerate()
            .filter(|(_, (op, key))| op.writes_filesystem() && store.contains(key))
            .map(|(i, _)| i)
            .max()
    });

    match (resume, &store) {
        (Some(i), Some(store)) => {
            store.restore(&keys[i], partial)?;
        }
        _ => fs::create_dir_all(partial)?,
    }

    let mut layers = Vec::with_capacity(plan.ops().len());
    for (i, (op, key)) in plan.ops().iter().zip(&keys).enumerate() {
        let phase = op.phase();
        if resume.is_some_and(|last| i <= last) {
            println!("  [CACHED] {} {}", phase, short(key));
            layers.push(LayerReport {
                phase,
                key: key.clone(),
                status: LayerStatus::Cached,
            });
            continue;
        }

        if !op.writes_filesystem() {
            layers.push(LayerReport {
                phase,
                key: key.clone(),
                status: LayerStatus::Recorded,
            });
            continue;
        }

        println!("  [BUILD] {}", phase);
        let timer = Timer::start(&phase.to_string());
        apply(op, plan, recipe, ctx, partial)?;
        timer.finish();

        if let Some(store) = &store {
            let meta = LayerMeta {
                key: key.clone(),
                parent: i.checked_sub(1).map(|p| keys[p].clone()),
                phase,
                descriptor: op.descriptor(),
            };
            store.store(&meta, partial)?;
        }
        layers.push(LayerReport {
            phase,
            key: key.clone(),
            status: LayerStatus::Built,
        });
    }
    Ok(layers)
}

/// Chained key per op: H(parent, descriptor, input digest).
pub fn layer_keys(plan: &Plan, recipe: &Recipe, ctx: &BuildContext) -> Result<Vec<String>> {
    let source = recipe.source_dir(&ctx.project);
    let mut keys: Vec<String> = Vec::with_capacity(plan.ops().len());
    for op in plan.ops() {
        let input = match op {
            Op::From { .. } => Some(cache::fingerprint_tree(ctx.require_base()?)?),
            Op::PlaceTool { .. } => {
                let tool = ctx.require_tool()?;
                Some(cache::hash_files(&[tool]).ok_or_else(|| {
                    BootstrapError::ToolUnavailable(format!("cannot read {}", tool.display()))
                })?)
            }
            Op::CopyDeclarations { files } => Some(declarations_digest(&source, files)),
            Op::CopySource { ignore } => {
                Some(cache::hash_tree(&source, &source_ignore(ignore, &source, ctx))?)
            }
            _ => None,
        };
        let key = cache::chain_key(
            keys.last().map(String::as_str),
            &op.descriptor(),
            input.as_deref(),
        );
        keys.push(key);
    }
    Ok(keys)
}

// The build's own output and cache never count as source.
fn source_ignore(patterns: &[String], source: &Path, ctx: &BuildContext) -> IgnoreSet {
    IgnoreSet::new(patterns)
        .excluding_under(source, &[ctx.output.as_path(), ctx.cache_dir.as_path()])
}

// Absent files hash as absent so that deleting the lock changes the key.
fn declarations_digest(source: &Path, files: &[String]) -> String {
    let parts: Vec<String> = files
        .iter()
        .map(|file| {
            let path = source.join(file);
            let digest =
                cache::hash_files(&[path.as_path()]).unwrap_or_else(|| "absent".to_string());
            format!("{}={}", file, digest)
        })
        .collect();
    cache::chain_key(None, &parts.join("\n"), None)
}

fn apply(op: &Op, plan: &Plan, recipe: &Recipe, ctx: &BuildContext, image: &Path) -> Result<()> {
    let workdir = plan.workdir().unwrap_or(&recipe.app.workdir);
    let source = recipe.source_dir(&ctx.project);

    match op {
        Op::From { image: reference } => {
            let base = ctx.require_base()?;
            log::info!("base {} from {}", reference, base.display());
            copy_tree(base, image, &IgnoreSet::default(), running_as_root())
                .map_err(|e| BootstrapError::BaseUnavailable(format!("{:#}", e)))?;
        }
        Op::PlaceTool { dest, .. } => {
            let tool = ctx.require_tool()?;
            copy_file_mode(tool, &in_image(image, dest), 0o755)
                .map_err(|e| BootstrapError::ToolUnavailable(format!("{:#}", e)))?;
        }
        Op::Workdir { path } => {
            let dir = in_image(image, path);
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Op::CopyDeclarations { files } => {
            let dest = in_image(image, workdir);
            for file in files {
                let from = source.join(file);
                if from.exists() {
                    copy_file(&from, &dest.join(file))?;
                } else {
                    log::warn!("{} is missing; install will fail", from.display());
                }
            }
        }
        Op::Install { argv } => install(argv, recipe, ctx, image, workdir)?,
        Op::CopySource { ignore } => {
            let ignore = source_ignore(ignore, &source, ctx);
            let count = copy_tree(&source, &in_image(image, workdir), &ignore, false)?;
            log::debug!("copied {} source entries", count);
        }
        Op::CreateIdentity {
            identity,
            workdir: owned,
        } => {
            users::create_identity(image, identity)?;
            let home = in_image(image, &identity.home);
            fs::create_dir_all(&home).map_err(|e| BootstrapError::OwnershipTransfer {
                path: home.clone(),
                reason: e.to_string(),
            })?;
            ownership::transfer(&in_image(image, owned), identity.uid, identity.gid)?;
            ownership::transfer(&home, identity.uid, identity.gid)?;
        }
        Op::DropPrivileges { .. } | Op::Entrypoint { .. } => {}
    }
    Ok(())
}

fn install(
    argv: &[String],
    recipe: &Recipe,
    ctx: &BuildContext,
    image: &Path,
    workdir: &str,
) -> Result<()> {
    let program = argv.first().ok_or_else(|| {
        BootstrapError::InstallFailed("install command is empty".to_string())
    })?;
    let tool = in_image(image, program);
    if !is_executable(&tool) {
        return Err(BootstrapError::ToolMissing(PathBuf::from(program)).into());
    }

    let cwd = in_image(image, workdir);
    let report = lock::verify(
        &cwd.join(&recipe.dependencies.manifest),
        &cwd.join(&recipe.dependencies.lock),
    )?;
    log::info!(
        "lock ok: {} runtime packages, closure {}",
        report.closure.len(),
        short(&report.digest)
    );

    // The placed copy runs, not a host tool of the same name.
    let mut host_argv = argv.to_vec();
    host_argv[0] = tool.to_string_lossy().into_owned();
    Cmd::from_argv(&host_argv)?
        .dir(&cwd)
        .timeout(ctx.install_timeout)
        .error_msg(format!("'{}' failed", argv.join(" ")))
        .run()
        .map_err(|e| BootstrapError::InstallFailed(format!("{:#}", e)))?;
    Ok(())
}

fn publish(
    plan: &Plan,
    recipe: &Recipe,
    ctx: &BuildContext,
    partial: &Path,
    layers: Vec<LayerReport>,
    started: Instant,
) -> Result<BuildReport> {
    let workdir = plan.workdir().unwrap_or(&recipe.app.workdir).to_string();
    let in_workdir = in_image(partial, &workdir);
    let closure = lock::verify(
        &in_workdir.join(&recipe.dependencies.manifest),
        &in_workdir.join(&recipe.dependencies.lock),
    )?;

    let record = BuildRecord {
        recipe_digest: recipe.digest(),
        base_image: recipe.base.image.clone(),
        tool_image: recipe.tool.image.clone(),
        tool_path: plan.tool_path().unwrap_or(&recipe.tool.path).to_string(),
        workdir,
        identity: plan.identity().cloned().unwrap_or_else(|| recipe.identity.clone()),
        entrypoint: plan
            .entrypoint()
            .map(<[String]>::to_vec)
            .unwrap_or_else(|| recipe.entrypoint()),
        closure_digest: closure.digest.clone(),
        layers: layers.clone(),
    };
    let image = ctx.image_dir();
    swap_in(ctx, partial, &record)?;

    Ok(BuildReport {
        image,
        layers,
        closure_digest: closure.digest,
        duration: started.elapsed(),
    })
}

// Image and record change together. The previous pair is set aside and
// restored if either rename fails.
fn swap_in(ctx: &BuildContext, partial: &Path, record: &BuildRecord) -> Result<()> {
    let image = ctx.image_dir();
    let record_path = ctx.record_path();
    let previous = ctx.output.join(".image.previous");
    let previous_record = ctx.output.join(".image.json.previous");
    let staged_record = ctx.output.join(".image.json.partial");

    for stale in [&previous_record, &staged_record] {
        if stale.exists() {
            fs::remove_file(stale)?;
        }
    }
    if previous.exists() {
        fs::remove_dir_all(&previous)
            .with_context(|| format!("Failed to clear stale {}", previous.display()))?;
    }
    record.save(&staged_record)?;

    let had_image = image.exists();
    let had_record = record_path.exists();
    if had_image {
        fs::rename(&image, &previous)
            .with_context(|| format!("Failed to set aside {}", image.display()))?;
    }
    if had_record {
        if let Err(e) = fs::rename(&record_path, &previous_record) {
            if had_image {
                fs::rename(&previous, &image)
                    .with_context(|| format!("Failed to restore {}", image.display()))?;
            }
            return Err(e)
                .with_context(|| format!("Failed to set aside {}", record_path.display()));
        }
    }

    let swapped = match fs::rename(partial, &image) {
        Ok(()) => fs::rename(&staged_record, &record_path)
            .with_context(|| format!("Failed to write build record {}", record_path.display()))
            .inspect_err(|_| {
                // Back to the staging path, which the caller removes.
                if let Err(undo) = fs::rename(&image, partial) {
                    log::warn!("failed to withdraw {}: {}", image.display(), undo);
                }
            }),
        Err(e) => {
            Err(anyhow::Error::new(e).context(format!("Failed to publish {}", image.display())))
        }
    };

    if let Err(e) = swapped {
        if had_image {
            fs::rename(&previous, &image)
                .with_context(|| format!("Failed to restore {}", image.display()))?;
        }
        if had_record {
            fs::rename(&previous_record, &record_path)
                .with_context(|| format!("Failed to restore {}", record_path.display()))?;
        }
        if let Err(cleanup) = fs::remove_file(&staged_record) {
            log::warn!("failed to remove {}: {}", staged_record.display(), cleanup);
        }
        return Err(e);
    }

    if had_image {
        fs::remove_dir_all(&previous)
            .with_context(|| format!("Failed to remove {}", previous.display()))?;
    }
    if had_record {
        fs::remove_file(&previous_record)?;
    }
    Ok(())
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn running_as_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_in_image() {
        assert_eq!(in_image(Path::new("/img"), "/bin/uv"), Path::new("/img/bin/uv"));
        assert_eq!(in_image(Path::new("/img"), "app"), Path::new("/img/app"));
    }

    #[test]
    fn test_declarations_digest_sees_deleted_lock() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("pyproject.toml"), "m").unwrap();
        fs::write(dir.path().join("uv.lock"), "l").unwrap();
        let files = vec!["pyproject.toml".to_string(), "uv.lock".to_string()];
        let before = declarations_digest(dir.path(), &files);
        assert_eq!(before, declarations_digest(dir.path(), &files));

        fs::remove_file(dir.path().join("uv.lock")).unwrap();
        assert_ne!(before, declarations_digest(dir.path(), &files));
    }

    #[test]
    fn test_is_executable() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("uv");
        fs::write(&file, "#!/bin/sh\n").unwrap();
        assert!(!is_executable(&file));
        fs::set_permissions(&file, fs::Permissions::from_mode(0o755)).unwrap();
        assert!(is_executable(&file));
        assert!(!is_executable(dir.path()));
    }

    fn sample_record() -> BuildRecord {
        BuildRecord {
            recipe_digest: "r".to_string(),
            base_image: "python:3.12-slim".to_string(),
            tool_image: "ghcr.io/astral-sh/uv:latest".to_string(),
            tool_path: "/bin/uv".to_string(),
            workdir: "/app".to_string(),
            identity: Identity::default(),
            entrypoint: vec!["/bin/uv".to_string(), "run".to_string(), "bot.py".to_string()],
            closure_digest: "c".to_string(),
            layers: vec![LayerReport {
                phase: Phase::Install,
                key: "k".to_string(),
                status: LayerStatus::Cached,
            }],
        }
    }

    #[test]
    fn test_record_roundtrip_on_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("image.json");
        let record = sample_record();
        record.save(&path).unwrap();
        assert_eq!(BuildRecord::load(&path).unwrap(), record);
        assert!(BuildRecord::load(&dir.path().join("missing.json")).is_err());
    }

    fn previous_build(dir: &Path) -> BuildContext {
        let ctx = BuildContext::for_testing(dir, dir, dir, dir);
        fs::create_dir_all(ctx.image_dir()).unwrap();
        fs::write(ctx.image_dir().join("old"), "old").unwrap();
        fs::write(ctx.record_path(), "{}").unwrap();
        ctx
    }

    #[test]
    fn test_swap_in_replaces_image_and_record() {
        let dir = TempDir::new().unwrap();
        let ctx = previous_build(dir.path());
        let partial = ctx.partial_dir();
        fs::create_dir_all(&partial).unwrap();
        fs::write(partial.join("new"), "new").unwrap();

        swap_in(&ctx, &partial, &sample_record()).unwrap();

        assert!(ctx.image_dir().join("new").exists());
        assert!(!ctx.image_dir().join("old").exists());
        assert!(!partial.exists());
        assert_eq!(BuildRecord::load(&ctx.record_path()).unwrap(), sample_record());
        assert!(!ctx.output.join(".image.previous").exists());
        assert!(!ctx.output.join(".image.json.previous").exists());
    }

    #[test]
    fn test_failed_swap_keeps_previous_build() {
        let dir = TempDir::new().unwrap();
        let ctx = previous_build(dir.path());
        let missing = ctx.output.join("no-such-staging");

        assert!(swap_in(&ctx, &missing, &sample_record()).is_err());

        assert_eq!(fs::read_to_string(ctx.image_dir().join("old")).unwrap(), "old");
        assert_eq!(fs::read_to_string(ctx.record_path()).unwrap(), "{}");
        assert!(!ctx.output.join(".image.json.partial").exists());
    }
}
