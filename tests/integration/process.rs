//! End-to-end scenarios against a real `ProcessManager` spawning real child
//! processes (no mocks: the process manager has no dependency seam here).
use std::time::Duration;

use fleetctl::process::{ProcessManager, ProcessRecord};

fn manager() -> (ProcessManager, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir_all(dir.path().join("pids")).unwrap();
    std::fs::create_dir_all(dir.path().join("logs")).unwrap();
    let mgr = ProcessManager::new(dir.path().join("pids"), dir.path().join("logs"));
    (mgr, dir)
}

/// E1: fresh `up`/`down` against a single agent.
#[test]
fn fresh_up_then_down_leaves_no_trace() {
    let (mgr, dir) = manager();

    let record = mgr
        .start(
            "a",
            "/bin/sleep 50",
            &["/bin/sleep".into(), "50".into()],
            &[],
        )
        .expect("start");

    assert!(mgr.is_running(record.pid));
    let persisted = dir.path().join("pids/a.json");
    assert!(persisted.exists());

    let log_path = dir.path().join("logs/a.log");
    assert!(log_path.exists());
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&log_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    mgr.stop_all().expect("stop_all");

    assert!(!persisted.exists());
    assert!(!mgr.is_running(record.pid));
}

/// E2: a stale record left behind by a controller that never got to run
/// `down` (or whose agent died out from under it) is reconciled away
/// without error.
#[test]
fn stale_record_is_reconciled_on_down() {
    let (mgr, dir) = manager();

    let ghost = ProcessRecord {
        pid: 999_999,
        name: "ghost".into(),
        command: "/bin/does-not-matter".into(),
        args: vec![],
        started_at: chrono::Utc::now(),
        log_file: dir.path().join("logs/ghost.log"),
    };
    let ghost_path = dir.path().join("pids/ghost.json");
    std::fs::write(&ghost_path, serde_json::to_vec_pretty(&ghost).unwrap()).unwrap();

    assert!(mgr.stop_all().is_ok());
    assert!(!ghost_path.exists());
}

/// A process killed directly (not through `stop`) is still detected as
/// dead by `is_running`, and its stale record is swept on the next
/// `list_processes` pass (invoked internally by `stop_all`).
#[test]
fn killed_process_record_is_swept() {
    let (mgr, dir) = manager();

    let record = mgr
        .start(
            "b",
            "/bin/sleep 50",
            &["/bin/sleep".into(), "50".into()],
            &[],
        )
        .expect("start");

    // Kill the whole process group directly, bypassing `stop`.
    let _ = nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(-record.pid),
        nix::sys::signal::Signal::SIGKILL,
    );
    std::thread::sleep(Duration::from_millis(200));
    assert!(!mgr.is_running(record.pid));

    mgr.stop_all().expect("stop_all");
    assert!(!dir.path().join("pids/b.json").exists());
}
