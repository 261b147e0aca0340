//! Runtime identity tests: plan split, recipe identity rules, the real
//! privilege drop and the root refusal of the launcher.

mod helpers;

use bootseq::launch;
use bootseq::recipe::Recipe;
use bootseq::{BootstrapError, Identity, Op, Phase, Plan};

#[test]
fn test_only_drop_and_entry_are_unprivileged() {
    let plan = Plan::from_recipe(&Recipe::default()).unwrap();
    let runtime: Vec<Phase> = plan
        .ops()
        .iter()
        .filter(|op| !op.privileged())
        .map(Op::phase)
        .collect();
    assert_eq!(runtime, vec![Phase::Drop, Phase::Entry]);
}

#[test]
fn test_recipe_rejects_root_and_reserved_identities() {
    for (uid, gid) in [(0, 1000), (1000, 0), (999, 1000), (1000, 500)] {
        let mut recipe = Recipe::default();
        recipe.identity = Identity {
            uid,
            gid,
            ..Identity::default()
        };
        let err = Plan::from_recipe(&recipe).unwrap_err();
        assert!(
            matches!(err, BootstrapError::ReservedIdentity { .. }),
            "{}:{} accepted",
            uid,
            gid
        );
    }
}

#[test]
fn test_whoami_refuses_root() {
    let current = launch::current_identity();
    let result = launch::require_non_root();
    if current.euid == 0 {
        assert!(matches!(result, Err(BootstrapError::RunningAsRoot { uid: 0, .. })));
    } else {
        assert_eq!(result.unwrap(), current);
    }
}

#[test]
fn test_launch_refuses_foreign_identity() {
    let current = launch::current_identity();
    if current.euid == 0 {
        // Launching as root would really drop this test process's privileges.
        return;
    }
    let env = helpers::TestEnv::new();
    let mut recipe = Recipe::default();
    recipe.identity = Identity {
        uid: current.uid.max(1000) + 7,
        gid: current.gid.max(1000) + 7,
        ..Identity::default()
    };

    let err = launch::launch(&recipe, &env.rootfs).unwrap_err();
    assert!(
        matches!(err.downcast_ref::<BootstrapError>(), Some(BootstrapError::PrivilegeDrop(_))),
        "{:#}",
        err
    );
}

#[test]
fn test_drop_from_root_reports_fixed_identity() {
    if launch::current_identity().euid != 0 {
        // Only root can switch identities.
        return;
    }

    // The drop is irreversible, so it runs in a forked child that reports
    // through its exit status.
    // SAFETY: the child only makes credential syscalls and exits with _exit.
    let pid = unsafe { libc::fork() };
    assert!(pid >= 0, "fork failed: {}", std::io::Error::last_os_error());
    if pid == 0 {
        let identity = Identity::default();
        let code = match launch::drop_to(&identity) {
            Err(_) => 1,
            Ok(_) if !launch::current_identity().matches(&identity) => 2,
            // SAFETY: plain syscall; it must fail once root is gone.
            Ok(_) if unsafe { libc::setuid(0) } == 0 => 3,
            Ok(_) if launch::require_non_root().is_err() => 4,
            Ok(_) => 0,
        };
        // SAFETY: leave the child without running the test harness's exit path.
        unsafe { libc::_exit(code) };
    }

    let mut status = 0;
    // SAFETY: pid is our own child.
    let waited = unsafe { libc::waitpid(pid, &mut status, 0) };
    assert_eq!(waited, pid);
    assert!(libc::WIFEXITED(status), "child did not exit normally");
    assert_eq!(
        libc::WEXITSTATUS(status),
        0,
        "child failed check {} after dropping to 1000:1000",
        libc::WEXITSTATUS(status)
    );
    // The parent keeps its privileges.
    assert_eq!(launch::current_identity().euid, 0);
}
