//! Cross-invocation handoff tests
//!
//! Drives the setup/reversal pairing the way the hosting system does: two
//! program invocations that share no memory and communicate only through the
//! persisted phase record and the host state itself. The k0s binary is
//! replaced with a script that records what was asked of it.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use k0sbox::state::{Phase, PhaseStore};
use k0sbox::teardown::{self, K0sHost};

fn fake_k0s(dir: &Path, log: &Path) -> PathBuf {
    let bin = dir.join("k0s");
    std::fs::write(
        &bin,
        format!("#!/bin/sh\necho \"$1\" >> {}\n", log.display()),
    )
    .unwrap();
    std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
    bin
}

#[tokio::test]
async fn post_phase_reverses_a_recorded_setup() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("calls.log");
    let bin = fake_k0s(dir.path(), &log);
    let cni = dir.path().join("net.d");
    std::fs::create_dir_all(&cni).unwrap();

    // Main phase: record that setup ran, before any mutation.
    let store = PhaseStore::new(dir.path().join("state.json"));
    store.record(Phase::SetupDone).await.unwrap();

    // Post phase: rediscover from the record and reverse everything.
    assert_eq!(store.load().await, Phase::SetupDone);
    let host = K0sHost::with_paths(&bin, vec![cni.clone()]);
    let report = teardown::run(&host).await;
    store.record(Phase::Reversed).await.unwrap();

    assert!(report.clean(), "warnings: {:?}", report.warnings);
    let calls = std::fs::read_to_string(&log).unwrap();
    assert_eq!(calls, "stop\nreset\n", "stop must precede reset");
    assert!(!bin.exists(), "binary must be removed");
    assert!(!cni.exists(), "CNI directory must be removed");
    assert_eq!(store.load().await, Phase::Reversed);
}

#[tokio::test]
async fn post_phase_without_marker_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("calls.log");
    let bin = fake_k0s(dir.path(), &log);

    let store = PhaseStore::new(dir.path().join("state.json"));
    assert_eq!(store.load().await, Phase::NotStarted);

    // The dispatcher would stop here; even if teardown were reached with the
    // binary gone, it must make zero mutating calls.
    std::fs::remove_file(&bin).unwrap();
    let host = K0sHost::with_paths(&bin, vec![]);
    let report = teardown::run(&host).await;

    assert!(report.clean());
    assert!(!log.exists(), "no command may run when there is nothing to reverse");
}

#[tokio::test]
async fn reversal_tolerates_a_failing_runtime() {
    // The fake k0s fails on `reset`; the binary and CNI directory are still
    // removed and the run ends with warnings, not an error.
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("calls.log");
    let bin = dir.path().join("k0s");
    std::fs::write(
        &bin,
        format!(
            "#!/bin/sh\necho \"$1\" >> {}\n[ \"$1\" = reset ] && exit 1\nexit 0\n",
            log.display()
        ),
    )
    .unwrap();
    std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
    let cni = dir.path().join("net.d");
    std::fs::create_dir_all(&cni).unwrap();

    let host = K0sHost::with_paths(&bin, vec![cni.clone()]);
    let report = teardown::run(&host).await;

    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("reset"));
    let calls = std::fs::read_to_string(&log).unwrap();
    assert_eq!(calls, "stop\nreset\n");
    assert!(!bin.exists());
    assert!(!cni.exists());
}
