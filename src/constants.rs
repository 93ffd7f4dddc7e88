//! Constants and configuration defaults for the fleet controller.
//!
//! This module centralizes the magic numbers and fixed strings used
//! throughout the controller to keep them in one place.

use std::{cmp::Ordering, time::Duration};

// ============================================================================
// Lock Management and Ordering
// ============================================================================

/// Typed lock abstraction enforcing a consistent acquisition order inside the
/// Health Monitor.
///
/// Locks MUST be acquired in ascending order of discriminant:
/// 1. `ProcessRecords` - process manager's on-disk record snapshots
/// 2. `RestartCounters` - per-agent rolling restart-attempt windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DaemonLock {
    /// Lock guarding reads of process records during a health tick.
    ProcessRecords = 1,
    /// Lock guarding the per-agent restart counter map.
    RestartCounters = 2,
}

impl DaemonLock {
    /// Numeric priority; lower must be acquired before higher.
    pub const fn priority(&self) -> u8 {
        *self as u8
    }

    /// Human-readable name, used in log lines.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ProcessRecords => "process_records",
            Self::RestartCounters => "restart_counters",
        }
    }
}

impl PartialOrd for DaemonLock {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DaemonLock {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority().cmp(&other.priority())
    }
}

// ============================================================================
// File System Constants
// ============================================================================

/// Name of the per-agent process record directory under the state root.
pub const PID_DIR_NAME: &str = "pids";

/// Name of the log directory under the state root.
pub const LOG_DIR_NAME: &str = "logs";

/// Name of the active encryption identity file.
pub const KEY_FILE_NAME: &str = "key";

/// Name the previous identity is moved to during `Rotate`.
pub const KEY_OLD_FILE_NAME: &str = "key.old";

/// Extension appended to an encrypted secrets companion file.
pub const ENCRYPTED_EXTENSION: &str = "age";

// ============================================================================
// External Binaries
// ============================================================================

/// The crypto binary invoked by the secrets envelope.
pub const AGE_BINARY: &str = "age";

/// The key-generation binary invoked by the secrets envelope.
pub const AGE_KEYGEN_BINARY: &str = "age-keygen";

// ============================================================================
// Process Management Timing
// ============================================================================

/// Time to wait after a graceful termination signal before escalating to a
/// forceful kill.
pub const GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Interval between liveness re-checks while waiting out `GRACE_PERIOD`.
pub const GRACE_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// Health Monitor Timing
// ============================================================================

/// Fixed tick interval for the health monitor's classification loop.
pub const HEALTH_TICK: Duration = Duration::from_secs(30);

/// A `last_seen` older than this marks an agent `Unresponsive`.
pub const OFFLINE_THRESHOLD: Duration = Duration::from_secs(120);

/// An `in_progress_since` older than this (with an unchanged task) marks an
/// agent `Stuck`.
pub const STUCK_THRESHOLD: Duration = Duration::from_secs(600);

/// Maximum restart attempts tolerated within `RESTART_WINDOW` before an agent
/// is marked `failed_permanent`.
pub const MAX_RESTART_ATTEMPTS: u32 = 3;

/// Rolling window over which restart attempts are counted.
pub const RESTART_WINDOW: Duration = Duration::from_secs(300);

/// Base delay for the exponential restart backoff (attempt 1).
pub const BASE_RESTART_DELAY: Duration = Duration::from_secs(2);

/// Ceiling for the exponential restart backoff.
pub const MAX_RESTART_DELAY: Duration = Duration::from_secs(60);

/// Jitter fraction applied to the computed backoff delay (±20%).
pub const RESTART_JITTER_FRACTION: f64 = 0.20;

// ============================================================================
// Reload Engine Timing
// ============================================================================

/// Debounce window for coalescing config file-watch events.
pub const RELOAD_DEBOUNCE: Duration = Duration::from_millis(500);

// ============================================================================
// Dashboard Timing
// ============================================================================

/// Tick interval driving `refreshAll`.
pub const DASHBOARD_TICK: Duration = Duration::from_secs(5);

/// Maximum number of messages retained in the dashboard's in-memory ring.
pub const MAX_LOG_MESSAGES: usize = 100;

/// Bound on the push-event channel; oldest events are dropped on overflow.
pub const PUSH_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Bounded interval the dashboard waits for background workers to
/// acknowledge cancellation before forcing teardown.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

// ============================================================================
// Client Timeouts
// ============================================================================

/// Per-call timeout for the task database client.
pub const TASK_DB_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-call timeout for the mail service HTTP client.
pub const MAIL_HTTP_TIMEOUT: Duration = Duration::from_secs(2);
