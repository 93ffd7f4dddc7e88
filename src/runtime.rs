//! Helpers for resolving the controller's per-user state directory layout.
use std::{
    env,
    path::PathBuf,
    sync::{OnceLock, RwLock},
};

#[cfg(test)]
use std::path::Path;

use crate::constants::{KEY_FILE_NAME, KEY_OLD_FILE_NAME, LOG_DIR_NAME, PID_DIR_NAME};

#[derive(Debug, Clone)]
struct RuntimeContext {
    state_dir: PathBuf,
    config_dir: PathBuf,
}

static CONTEXT: OnceLock<RwLock<RuntimeContext>> = OnceLock::new();

fn context_lock() -> &'static RwLock<RuntimeContext> {
    CONTEXT.get_or_init(|| RwLock::new(RuntimeContext::from_home(home_dir())))
}

fn home_dir() -> PathBuf {
    env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/"))
}

impl RuntimeContext {
    fn from_home(home: PathBuf) -> Self {
        Self {
            state_dir: home.join(".local/share/fleetctl"),
            config_dir: home.join(".config/fleetctl"),
        }
    }
}

/// Re-derives the runtime context from the current `HOME`. Tests call this
/// (or `init_with_test_home`) to isolate state under a scratch directory.
pub fn init() {
    let mut guard = context_lock().write().expect("runtime context poisoned");
    *guard = RuntimeContext::from_home(home_dir());
}

#[cfg(test)]
pub fn init_with_test_home(home: &Path) {
    let mut guard = context_lock().write().expect("runtime context poisoned");
    *guard = RuntimeContext::from_home(home.to_path_buf());
}

/// Root directory for all durable controller state.
pub fn state_dir() -> PathBuf {
    context_lock()
        .read()
        .expect("runtime context poisoned")
        .state_dir
        .clone()
}

/// Directory searched for the declarative config file.
pub fn config_dir() -> PathBuf {
    context_lock()
        .read()
        .expect("runtime context poisoned")
        .config_dir
        .clone()
}

/// `pids/` under the state root; exclusively written by the Process Manager.
pub fn pid_dir() -> PathBuf {
    state_dir().join(PID_DIR_NAME)
}

/// `logs/` under the state root; one append-only file per agent.
pub fn log_dir() -> PathBuf {
    state_dir().join(LOG_DIR_NAME)
}

/// Path to the active encryption identity file.
pub fn key_path() -> PathBuf {
    state_dir().join(KEY_FILE_NAME)
}

/// Path the previous identity is moved to during `Rotate`.
pub fn key_old_path() -> PathBuf {
    state_dir().join(KEY_OLD_FILE_NAME)
}

/// Ensures the state directory tree exists with the permissions the state
/// directory layout requires (`0700` for directories holding secret-bearing
/// files).
#[cfg(unix)]
pub fn ensure_state_tree() -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    for dir in [state_dir(), pid_dir(), log_dir()] {
        std::fs::create_dir_all(&dir)?;
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn ensure_state_tree() -> std::io::Result<()> {
    for dir in [state_dir(), pid_dir(), log_dir()] {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(())
}
