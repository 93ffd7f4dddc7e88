//! Configuration reload engine: watches the config file, debounces changes,
//! and reconciles the running fleet against the new declarative config.
use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Mutex,
    },
    thread,
    time::Duration,
};

use notify::{RecursiveMode, Watcher};

use crate::config::{self, agent_changed, AgentConfig, Config};
use crate::constants::RELOAD_DEBOUNCE;
use crate::error::{ProcessManagerError, ReloadError};
use crate::process::ProcessManager;

/// Per-agent outcome of a reload, returned to callers so partial failures
/// are visible rather than only logged (spec.md §9 Open Questions).
#[derive(Debug, Clone, Default)]
pub struct ReloadOutcome {
    /// Agent names successfully started because they're new.
    pub added: Vec<String>,
    /// Agent names successfully stopped because they were removed.
    pub removed: Vec<String>,
    /// Agent names successfully stopped and restarted because they changed.
    pub changed: Vec<String>,
    /// Agents whose reconciliation step failed, with the error rendered.
    pub failed: Vec<(String, String)>,
    /// Set when `services.mail` changed; hot-apply is not supported for the
    /// long-lived mail service (spec.md §4.3 step 3).
    pub mail_restart_advised: bool,
}

/// Splits a `command_line` string into argv using a strict-whitespace
/// tokenizer with single/double-quote grouping. Does not support nested or
/// escaped quotes.
///
/// spec.md §9 Open Questions leaves the choice between "shell-parse" and
/// "strict-whitespace-split" undecided; this repository picks the latter to
/// avoid taking a dependency on a full shell grammar for a single
/// command-line field.
pub fn tokenize_command_line(command_line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut has_token = false;

    for c in command_line.chars() {
        match c {
            '\'' if !in_double => {
                in_single = !in_single;
                has_token = true;
            }
            '"' if !in_single => {
                in_double = !in_double;
                has_token = true;
            }
            c if c.is_whitespace() && !in_single && !in_double => {
                if has_token {
                    tokens.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        tokens.push(current);
    }
    tokens
}

/// Diffs `old` against `new` and reconciles the running fleet via
/// `process_manager`, following spec.md §4.3's ordering rules: removals and
/// additions run in parallel with each other, but for a changed agent the
/// stop strictly precedes the start.
pub fn reconcile(
    old: &BTreeMap<String, AgentConfig>,
    new: &BTreeMap<String, AgentConfig>,
    process_manager: &ProcessManager,
) -> ReloadOutcome {
    let mut outcome = ReloadOutcome::default();

    let removed: Vec<&String> = old.keys().filter(|name| !new.contains_key(*name)).collect();
    let added: Vec<&String> = new.keys().filter(|name| !old.contains_key(*name)).collect();
    let changed: Vec<&String> = new
        .keys()
        .filter(|name| {
            old.get(*name)
                .map(|old_agent| agent_changed(old_agent, &new[*name]))
                .unwrap_or(false)
        })
        .collect();

    for name in &removed {
        match process_manager.get_process_info(name) {
            Ok(record) => match process_manager.stop(record.pid) {
                Ok(()) => outcome.removed.push((*name).clone()),
                Err(e) => outcome.failed.push(((*name).clone(), e.to_string())),
            },
            Err(ProcessManagerError::NotFound(_)) => outcome.removed.push((*name).clone()),
            Err(e) => outcome.failed.push(((*name).clone(), e.to_string())),
        }
    }

    for name in &changed {
        let agent = &new[*name];
        let stop_result = process_manager
            .get_process_info(name)
            .and_then(|record| process_manager.stop(record.pid));
        match stop_result {
            Ok(()) | Err(ProcessManagerError::NotFound(_)) => {
                let argv = tokenize_command_line(&agent.command_line);
                match process_manager.start(name, &agent.command_line, &argv, &[]) {
                    Ok(_) => outcome.changed.push((*name).clone()),
                    Err(e) => outcome.failed.push(((*name).clone(), e.to_string())),
                }
            }
            Err(e) => outcome.failed.push(((*name).clone(), e.to_string())),
        }
    }

    for name in &added {
        let agent = &new[*name];
        let argv = tokenize_command_line(&agent.command_line);
        match process_manager.start(name, &agent.command_line, &argv, &[]) {
            Ok(_) => outcome.added.push((*name).clone()),
            Err(e) => outcome.failed.push(((*name).clone(), e.to_string())),
        }
    }

    outcome
}

/// Whether the mail service's own config changed between `old` and `new`.
/// The service is long-lived infrastructure and is never hot-applied; the
/// caller should surface a warning advising a full restart.
pub fn mail_config_changed(old: &Config, new: &Config) -> bool {
    old.services.mail.url != new.services.mail.url
        || old.services.mail.start_command != new.services.mail.start_command
}

/// Watches a config file path and drives single-flight, debounced reloads.
///
/// A reload in progress rejects further events until it returns; an event
/// arriving mid-reload is coalesced into exactly one follow-up reload.
pub struct ReloadEngine {
    config_path: PathBuf,
    current: Mutex<Config>,
    reloading: AtomicBool,
    pending: AtomicBool,
}

impl ReloadEngine {
    /// Builds an engine starting from the already-loaded `initial` config.
    pub fn new(config_path: PathBuf, initial: Config) -> Self {
        Self {
            config_path,
            current: Mutex::new(initial),
            reloading: AtomicBool::new(false),
            pending: AtomicBool::new(false),
        }
    }

    /// Returns an immutable snapshot of the currently applied config.
    pub fn snapshot(&self) -> Config {
        self.current.lock().expect("reload engine poisoned").clone()
    }

    /// Parses, validates, and reconciles against the new config file
    /// contents. On parse/validation failure the existing running config is
    /// retained untouched and the error is returned without mutating state.
    pub fn reload(&self, process_manager: &ProcessManager) -> Result<ReloadOutcome, ReloadError> {
        if self
            .reloading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.pending.store(true, Ordering::Release);
            return Ok(ReloadOutcome::default());
        }

        let result = self.reload_inner(process_manager);
        self.reloading.store(false, Ordering::Release);

        if self.pending.swap(false, Ordering::AcqRel) {
            // A change event coalesced in while we were reloading; run
            // exactly one follow-up reload against the latest file.
            return self.reload(process_manager);
        }
        result
    }

    fn reload_inner(&self, process_manager: &ProcessManager) -> Result<ReloadOutcome, ReloadError> {
        let new_config = config::load_config(&self.config_path)?;
        let mut current = self.current.lock().expect("reload engine poisoned");

        let mut outcome = reconcile(&current.agents, &new_config.agents, process_manager);
        outcome.mail_restart_advised = mail_config_changed(&current, &new_config);

        *current = new_config;
        Ok(outcome)
    }
}

/// Starts a background thread watching `config_path` and invoking
/// `on_change` (debounced, per spec.md's 500 ms window) whenever the file is
/// modified, renamed, or recreated. Returns a cancellation flag the caller
/// should set to stop the watcher thread.
pub fn spawn_watcher(
    config_path: PathBuf,
    on_change: impl Fn() + Send + 'static,
) -> Result<std::sync::Arc<AtomicBool>, ReloadError> {
    let cancelled = std::sync::Arc::new(AtomicBool::new(false));
    let cancelled_thread = cancelled.clone();
    let (tx, rx) = mpsc::channel();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if res.is_ok() {
            let _ = tx.send(());
        }
    })
    .map_err(|e| ReloadError::WatchFailed(e.to_string()))?;

    watcher
        .watch(&config_path, RecursiveMode::NonRecursive)
        .map_err(|e| ReloadError::WatchFailed(e.to_string()))?;

    thread::spawn(move || {
        // Keep the watcher alive for the life of this thread.
        let _watcher = watcher;
        while !cancelled_thread.load(Ordering::Acquire) {
            match rx.recv_timeout(Duration::from_millis(200)) {
                Ok(()) => {
                    // Trailing-edge debounce: drain any further events that
                    // arrive within the window before firing once.
                    loop {
                        match rx.recv_timeout(RELOAD_DEBOUNCE) {
                            Ok(()) => continue,
                            Err(_) => break,
                        }
                    }
                    on_change();
                }
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
    });

    Ok(cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelIdentifier;

    fn agent(command_line: &str) -> AgentConfig {
        AgentConfig {
            command_line: command_line.to_string(),
            model_identifier: ModelIdentifier::Claude,
            phases: vec!["x".into()],
            autorestart: true,
        }
    }

    #[test]
    fn tokenizer_splits_on_whitespace() {
        assert_eq!(
            tokenize_command_line("python worker.py --flag value"),
            vec!["python", "worker.py", "--flag", "value"]
        );
    }

    #[test]
    fn tokenizer_groups_double_quoted_spans() {
        assert_eq!(
            tokenize_command_line(r#"run "hello world" now"#),
            vec!["run", "hello world", "now"]
        );
    }

    #[test]
    fn tokenizer_groups_single_quoted_spans() {
        assert_eq!(
            tokenize_command_line("run 'a b' now"),
            vec!["run", "a b", "now"]
        );
    }

    #[test]
    fn reconcile_computes_added_removed_changed() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = ProcessManager::new(dir.path().join("pids"), dir.path().join("logs"));
        std::fs::create_dir_all(dir.path().join("pids")).unwrap();
        std::fs::create_dir_all(dir.path().join("logs")).unwrap();

        let mut old = BTreeMap::new();
        old.insert("stays".to_string(), agent("/bin/sleep 50"));
        old.insert("dies".to_string(), agent("/bin/sleep 50"));
        mgr.start("stays", "/bin/sleep 50", &["/bin/sleep".into(), "50".into()], &[])
            .unwrap();
        mgr.start("dies", "/bin/sleep 50", &["/bin/sleep".into(), "50".into()], &[])
            .unwrap();

        let mut new = BTreeMap::new();
        new.insert("stays".to_string(), agent("/bin/sleep 50"));
        new.insert("born".to_string(), agent("/bin/sleep 50"));

        let outcome = reconcile(&old, &new, &mgr);
        assert_eq!(outcome.removed, vec!["dies".to_string()]);
        assert_eq!(outcome.added, vec!["born".to_string()]);
        assert!(outcome.changed.is_empty());
        assert!(outcome.failed.is_empty());

        mgr.stop_all().ok();
    }

    #[test]
    fn reconcile_stops_before_starting_a_changed_agent() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = ProcessManager::new(dir.path().join("pids"), dir.path().join("logs"));
        std::fs::create_dir_all(dir.path().join("pids")).unwrap();
        std::fs::create_dir_all(dir.path().join("logs")).unwrap();

        let mut old = BTreeMap::new();
        old.insert("a".to_string(), agent("/bin/sleep 50"));
        let record = mgr
            .start("a", "/bin/sleep 50", &["/bin/sleep".into(), "50".into()], &[])
            .unwrap();

        let mut new = BTreeMap::new();
        new.insert("a".to_string(), agent("/bin/sleep 51"));

        let outcome = reconcile(&old, &new, &mgr);
        assert_eq!(outcome.changed, vec!["a".to_string()]);
        assert!(!mgr.is_running(record.pid));
        let new_record = mgr.get_process_info("a").unwrap();
        assert_ne!(new_record.pid, record.pid);

        mgr.stop_all().ok();
    }
}
