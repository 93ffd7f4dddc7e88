//! End-to-end crash-recovery scenarios against a real `ProcessManager` and
//! `HealthMonitor`. The mail client points at an address nothing listens
//! on: classification for a crashed agent never consults agent status, so
//! the resulting connection failures are harmless and just exercise the
//! "no heartbeat available" path for free.
use std::collections::BTreeMap;
use std::sync::mpsc;
use std::time::Duration;

use fleetctl::clients::mail::HttpMailClient;
use fleetctl::config::{AgentConfig, ModelIdentifier};
use fleetctl::health::{Classification, HealthMonitor};
use fleetctl::process::ProcessManager;

fn harness() -> (tempfile::TempDir, ProcessManager, HttpMailClient) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("pids")).unwrap();
    std::fs::create_dir_all(dir.path().join("logs")).unwrap();
    let mgr = ProcessManager::new(dir.path().join("pids"), dir.path().join("logs"));
    let mail = HttpMailClient::with_timeout("http://127.0.0.1:1", Duration::from_millis(100));
    (dir, mgr, mail)
}

fn agent(command_line: &str, autorestart: bool) -> AgentConfig {
    AgentConfig {
        command_line: command_line.to_string(),
        model_identifier: ModelIdentifier::Claude,
        phases: vec!["x".into()],
        autorestart,
    }
}

/// E5: crash recovery. Killing an agent's pid out from under the monitor
/// causes the next tick to restart it under a new pid with one recorded
/// restart attempt.
#[test]
fn crashed_agent_is_restarted_once() {
    let (_dir, mgr, mail) = harness();
    let monitor = HealthMonitor::new(["a".to_string()]);
    let mut agents = BTreeMap::new();
    agents.insert("a".to_string(), agent("/bin/sleep 50", true));

    let first = mgr
        .start("a", "/bin/sleep 50", &["/bin/sleep".into(), "50".into()], &[])
        .expect("start a");

    let _ = nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(-first.pid),
        nix::sys::signal::Signal::SIGKILL,
    );
    std::thread::sleep(Duration::from_millis(200));
    assert!(!mgr.is_running(first.pid));

    let (tx, _rx) = mpsc::channel();
    let states = monitor.tick(&agents, &mgr, &mail, &tx);

    let a_state = states.iter().find(|s| s.name == "a").expect("a present");
    assert_eq!(a_state.classification, Classification::Crashed);
    assert_eq!(a_state.restart_attempts, 1);

    let second = mgr.get_process_info("a").expect("restarted");
    assert_ne!(second.pid, first.pid);
    assert!(mgr.is_running(second.pid));

    mgr.stop_all().ok();
}

/// E6: restart cap. `MAX_RESTART_ATTEMPTS` (3) kills each earn a restart;
/// the monitor trips `failed_permanent` on the tick that would be the 4th
/// attempt, and stops restarting from then on.
#[test]
fn repeated_crashes_trip_the_restart_cap() {
    let (_dir, mgr, mail) = harness();
    let monitor = HealthMonitor::new(["a".to_string()]);
    let mut agents = BTreeMap::new();
    agents.insert("a".to_string(), agent("/bin/sleep 50", true));

    mgr.start("a", "/bin/sleep 50", &["/bin/sleep".into(), "50".into()], &[])
        .expect("start a");

    let (tx, _rx) = mpsc::channel();

    // Three kill+tick cycles each restart the agent under a fresh pid,
    // exhausting MAX_RESTART_ATTEMPTS.
    let mut last_pid = mgr.get_process_info("a").unwrap().pid;
    for _ in 0..3 {
        let _ = nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(-last_pid),
            nix::sys::signal::Signal::SIGKILL,
        );
        std::thread::sleep(Duration::from_millis(200));
        monitor.tick(&agents, &mgr, &mail, &tx);
        let record = mgr.get_process_info("a").expect("restarted");
        assert_ne!(record.pid, last_pid);
        last_pid = record.pid;
    }

    // No mail heartbeat is ever observed (nothing listens on the mail
    // URL), so even the currently-alive agent classifies Unresponsive and
    // the cap trips on this tick without a further kill being needed.
    let capped = monitor.tick(&agents, &mgr, &mail, &tx);
    let a_state = capped.iter().find(|s| s.name == "a").unwrap();
    assert!(a_state.failed_permanent);
    assert_eq!(a_state.restart_attempts, 3);

    // The process from the third restart is left running untouched; the
    // monitor no longer restarts it.
    let after_cap = mgr.get_process_info("a").expect("record still present");
    assert_eq!(after_cap.pid, last_pid);

    mgr.stop_all().ok();
}
