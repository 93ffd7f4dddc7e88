//! End-to-end hot-reload scenarios: a real TOML file on disk, loaded,
//! mutated, and reconciled through the full `ReloadEngine`.
use std::fs;

use fleetctl::config;
use fleetctl::process::ProcessManager;
use fleetctl::reload::ReloadEngine;

fn write_config(path: &std::path::Path, agents_toml: &str) {
    let contents = format!(
        r#"
[core]
task_db_path = "/tmp/fleetctl-test-tasks.json"

[services.mail]
start_command = "/bin/true"
url = "http://127.0.0.1:9"

{agents_toml}
"#
    );
    fs::write(path, contents).unwrap();
}

fn harness() -> (tempfile::TempDir, ProcessManager, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("pids")).unwrap();
    fs::create_dir_all(dir.path().join("logs")).unwrap();
    let mgr = ProcessManager::new(dir.path().join("pids"), dir.path().join("logs"));
    let config_path = dir.path().join("fleet.toml");
    (dir, mgr, config_path)
}

/// E3: hot add. Starting from one agent, adding a second via a live config
/// edit starts the new agent and leaves the first agent's pid untouched.
#[test]
fn hot_add_starts_the_new_agent_without_disturbing_the_old() {
    let (_dir, mgr, config_path) = harness();

    write_config(
        &config_path,
        r#"
[agents.a]
command = "/bin/sleep 50"
model = "claude"
phases = ["x"]
"#,
    );
    let initial = config::load_config(&config_path).expect("initial load");
    let engine = ReloadEngine::new(config_path.clone(), initial);

    let a_record = mgr
        .start("a", "/bin/sleep 50", &["/bin/sleep".into(), "50".into()], &[])
        .expect("start a");

    write_config(
        &config_path,
        r#"
[agents.a]
command = "/bin/sleep 50"
model = "claude"
phases = ["x"]

[agents.b]
command = "/bin/sleep 50"
model = "claude"
phases = ["x"]
"#,
    );

    let outcome = engine.reload(&mgr).expect("reload");
    assert_eq!(outcome.added, vec!["b".to_string()]);
    assert!(outcome.changed.is_empty());
    assert!(outcome.removed.is_empty());
    assert!(outcome.failed.is_empty());

    let b_record = mgr.get_process_info("b").expect("b started");
    assert!(mgr.is_running(b_record.pid));

    let a_after = mgr.get_process_info("a").expect("a untouched");
    assert_eq!(a_after.pid, a_record.pid);

    mgr.stop_all().ok();
}

/// E4: hot change. Changing `a`'s command line restarts it under a new pid.
#[test]
fn hot_change_restarts_with_a_new_pid() {
    let (_dir, mgr, config_path) = harness();

    write_config(
        &config_path,
        r#"
[agents.a]
command = "/bin/sleep 50"
model = "claude"
phases = ["x"]
"#,
    );
    let initial = config::load_config(&config_path).expect("initial load");
    let engine = ReloadEngine::new(config_path.clone(), initial);

    let first = mgr
        .start("a", "/bin/sleep 50", &["/bin/sleep".into(), "50".into()], &[])
        .expect("start a");

    write_config(
        &config_path,
        r#"
[agents.a]
command = "/bin/sleep 51"
model = "claude"
phases = ["x"]
"#,
    );

    let outcome = engine.reload(&mgr).expect("reload");
    assert_eq!(outcome.changed, vec!["a".to_string()]);

    assert!(!mgr.is_running(first.pid));
    let second = mgr.get_process_info("a").expect("a restarted");
    assert_ne!(second.pid, first.pid);
    assert!(mgr.is_running(second.pid));

    mgr.stop_all().ok();
}

/// A config edit that fails to parse leaves the previously-applied config
/// and the running fleet untouched.
#[test]
fn invalid_config_on_reload_is_rejected_without_side_effects() {
    let (_dir, mgr, config_path) = harness();

    write_config(
        &config_path,
        r#"
[agents.a]
command = "/bin/sleep 50"
model = "claude"
phases = ["x"]
"#,
    );
    let initial = config::load_config(&config_path).expect("initial load");
    let engine = ReloadEngine::new(config_path.clone(), initial);

    let record = mgr
        .start("a", "/bin/sleep 50", &["/bin/sleep".into(), "50".into()], &[])
        .expect("start a");

    fs::write(&config_path, "this is not valid toml [[[").unwrap();

    assert!(engine.reload(&mgr).is_err());
    assert!(mgr.is_running(record.pid));
    assert_eq!(engine.snapshot().agents.len(), 1);

    mgr.stop_all().ok();
}
