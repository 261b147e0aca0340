//! Shared test utilities for bootseq tests.
#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use bootseq::build::BuildContext;
use bootseq::{Identity, Recipe};

pub const MANIFEST: &str = r#"[project]
name = "bot"
version = "0.1.0"
requires-python = ">=3.12"
dependencies = ["aiohttp>=3.9", "pypdf>=4"]

[dependency-groups]
dev = ["pytest>=8"]
"#;

pub const LOCK: &str = r#"version = 1
requires-python = ">=3.12"

[[package]]
name = "aiohttp"
version = "3.9.5"
source = { registry = "https://pypi.org/simple" }
dependencies = [{ name = "yarl" }]
sdist = { url = "https://files.example/aiohttp.tar.gz", hash = "sha256:a1" }

[[package]]
name = "bot"
version = "0.1.0"
source = { virtual = "." }
dependencies = [{ name = "aiohttp" }, { name = "pypdf" }]

[package.dev-dependencies]
dev = [{ name = "pytest" }]

[package.metadata]
requires-dist = [
    { name = "aiohttp", specifier = ">=3.9" },
    { name = "pypdf", specifier = ">=4" },
]

[package.metadata.requires-dev]
dev = [{ name = "pytest", specifier = ">=8" }]

[[package]]
name = "pypdf"
version = "4.2.0"
source = { registry = "https://pypi.org/simple" }
wheels = [{ url = "https://files.example/pypdf.whl", hash = "sha256:p1" }]

[[package]]
name = "pytest"
version = "8.2.0"
source = { registry = "https://pypi.org/simple" }
wheels = [{ url = "https://files.example/pytest.whl", hash = "sha256:t1" }]

[[package]]
name = "yarl"
version = "1.9.4"
source = { registry = "https://pypi.org/simple" }
wheels = [{ url = "https://files.example/yarl.whl", hash = "sha256:y1" }]
"#;

/// Test environment: a project, a base rootfs and a fake dependency tool.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Project with manifest, lock and source
    pub project: PathBuf,
    /// Mock base root filesystem
    pub rootfs: PathBuf,
    /// Output and cache live here
    pub work: PathBuf,
    /// Fake dependency tool on the host
    pub tool: PathBuf,
    /// Every tool invocation appends one line here
    pub invocations_log: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base = temp_dir.path();

        let project = base.join("project");
        let rootfs = base.join("rootfs");
        let work = base.join("work");
        let tool = base.join("host-bin/uv");
        let invocations_log = base.join("uv-invocations.log");

        create_mock_project(&project);
        create_mock_rootfs(&rootfs);
        fs::create_dir_all(&work).expect("Failed to create work dir");
        create_fake_tool(&tool, &invocations_log, 0);

        Self {
            _temp_dir: temp_dir,
            project,
            rootfs,
            work,
            tool,
            invocations_log,
        }
    }

    pub fn build_context(&self) -> BuildContext {
        BuildContext::for_testing(&self.project, &self.rootfs, &self.tool, &self.work)
    }

    /// Default recipe with the given execution identity.
    pub fn recipe(&self, identity: &Identity) -> Recipe {
        let mut recipe = Recipe::default();
        recipe.identity = identity.clone();
        recipe
    }

    /// How many times the fake tool ran.
    pub fn invocations(&self) -> usize {
        fs::read_to_string(&self.invocations_log)
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    /// Replace the fake tool with one that exits with `code`.
    pub fn set_tool_exit(&self, code: i32) {
        create_fake_tool(&self.tool, &self.invocations_log, code);
    }

    pub fn write_project_file(&self, rel: &str, content: &str) {
        let path = self.project.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dir");
        }
        fs::write(path, content).expect("Failed to write project file");
    }
}

/// An identity the current process can hand files to, if any.
///
/// Root can transfer to the stock 1000:1000. An unprivileged runner can only
/// transfer to itself, and only when its own ids are outside the reserved
/// range. Returns None otherwise; callers skip.
pub fn usable_identity() -> Option<Identity> {
    // SAFETY: geteuid/getegid have no preconditions and cannot fail.
    let (uid, gid) = unsafe { (libc::geteuid(), libc::getegid()) };
    if uid == 0 {
        return Some(Identity::default());
    }
    if uid >= 1000 && gid >= 1000 {
        return Some(Identity {
            uid,
            gid,
            ..Identity::default()
        });
    }
    eprintln!("skipping: uid {} cannot transfer ownership to a non-reserved identity", uid);
    None
}

/// Project tree shaped like the stock service.
pub fn create_mock_project(project: &Path) {
    let files = [
        ("pyproject.toml", MANIFEST),
        ("uv.lock", LOCK),
        ("bot.py", "print('bot')\n"),
        ("src/__init__.py", ""),
        ("src/reader.py", "def read():\n    pass\n"),
        ("src/__pycache__/reader.cpython-312.pyc", "bytecode"),
        (".git/HEAD", "ref: refs/heads/main\n"),
        (".env", "DISCORD_TOKEN=secret\n"),
    ];
    for (rel, content) in files {
        let path = project.join(rel);
        fs::create_dir_all(path.parent().expect("path has parent"))
            .expect("Failed to create project dir");
        fs::write(&path, content).expect("Failed to write project file");
    }
}

/// Minimal base rootfs with passwd and group files.
pub fn create_mock_rootfs(rootfs: &Path) {
    for dir in ["bin", "etc", "usr/lib", "home"] {
        fs::create_dir_all(rootfs.join(dir)).expect("Failed to create mock rootfs dir");
    }
    fs::write(rootfs.join("etc/passwd"), "root:x:0:0:root:/root:/bin/sh\n")
        .expect("Failed to create passwd");
    fs::write(rootfs.join("etc/group"), "root:x:0:\n").expect("Failed to create group");
}

/// Shell script standing in for the dependency tool.
///
/// Logs its arguments, refuses to run without a lock in its working
/// directory, and creates `.venv` like a real sync would.
pub fn create_fake_tool(path: &Path, log: &Path, exit_code: i32) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create tool dir");
    }
    let script = format!(
        "#!/bin/sh\n\
         echo \"$*\" >> '{log}'\n\
         [ -f uv.lock ] || {{ echo 'uv.lock not found' >&2; exit 2; }}\n\
         [ {code} -eq 0 ] || {{ echo 'resolution failed' >&2; exit {code}; }}\n\
         mkdir -p .venv/lib\n\
         echo installed > .venv/lib/marker\n",
        log = log.display(),
        code = exit_code,
    );
    fs::write(path, script).expect("Failed to write fake tool");
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .expect("Failed to set tool permissions");
}
