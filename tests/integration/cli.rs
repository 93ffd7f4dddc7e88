//! Black-box CLI tests against the real `fctl` binary. Only exercises
//! subcommands that terminate on their own; `up` hands off to the
//! interactive dashboard and has no place in an automated harness.
use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;

fn age_tools_available() -> bool {
    std::process::Command::new("age-keygen")
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .is_ok()
}

fn fctl(home: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("fctl").expect("fctl binary");
    cmd.env("HOME", home);
    cmd
}

fn write_valid_config(path: &std::path::Path) {
    fs::write(
        path,
        r#"
[core]
task_db_path = "/tmp/fleetctl-cli-test-tasks.json"

[services.mail]
start_command = "/bin/true"
url = "http://127.0.0.1:9"

[agents.a]
command = "/bin/sleep 50"
model = "claude"
phases = ["x"]
"#,
    )
    .unwrap();
}

/// `down` succeeds even with no prior state on disk.
#[test]
fn down_with_no_prior_state_exits_clean() {
    let home = tempfile::tempdir().unwrap();
    fctl(home.path()).arg("down").assert().success();
}

/// `check` reports a missing config file and exits non-zero.
#[test]
fn check_fails_loudly_on_missing_config() {
    let home = tempfile::tempdir().unwrap();
    let missing = home.path().join("nope.toml");
    fctl(home.path())
        .args(["--config", missing.to_str().unwrap(), "check"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("config: FAILED"));
}

/// `check` passes the config check (but still reports on secrets/tools)
/// when the file is well-formed.
#[test]
fn check_reports_config_ok_for_a_valid_file() {
    let home = tempfile::tempdir().unwrap();
    let config_path = home.path().join("fleet.toml");
    write_valid_config(&config_path);

    fctl(home.path())
        .args(["--config", config_path.to_str().unwrap(), "check"])
        .assert()
        .stdout(predicate::str::contains("config: OK"));
}

/// `services status` against a config with no mail service running.
#[test]
fn services_status_reports_not_running() {
    let home = tempfile::tempdir().unwrap();
    let config_path = home.path().join("fleet.toml");
    write_valid_config(&config_path);

    fctl(home.path())
        .args(["--config", config_path.to_str().unwrap(), "services", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("not running"));
}

/// `services status` requires a loadable config even just to report status.
#[test]
fn services_status_fails_without_a_config() {
    let home = tempfile::tempdir().unwrap();
    let missing = home.path().join("nope.toml");
    fctl(home.path())
        .args(["--config", missing.to_str().unwrap(), "services", "status"])
        .assert()
        .failure();
}

/// `cleanup` is a no-op (not an error) when no logs exist yet.
#[test]
fn cleanup_with_no_logs_reports_zero_removed() {
    let home = tempfile::tempdir().unwrap();
    fctl(home.path())
        .args(["cleanup", "--days", "7"])
        .assert()
        .success()
        .stdout(predicate::str::contains("removed 0 log file(s)"));
}

/// `secrets status` reports no identity key present before `secrets init`.
#[test]
fn secrets_status_before_init_reports_no_key() {
    let home = tempfile::tempdir().unwrap();
    fctl(home.path())
        .args(["secrets", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no usable identity key"));
}

/// `secrets init` followed by `secrets status` reports the new recipient.
#[test]
fn secrets_init_then_status_reports_a_recipient() {
    if !age_tools_available() {
        eprintln!("skipping: age/age-keygen not found on PATH");
        return;
    }
    let home = tempfile::tempdir().unwrap();
    fctl(home.path()).arg("secrets").arg("init").assert().success();
    fctl(home.path())
        .args(["secrets", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("recipient:"));
}
