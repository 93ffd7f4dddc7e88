//! Health monitor: periodic classification of each agent plus bounded-retry
//! automatic recovery.
use std::{
    collections::HashMap,
    sync::{mpsc::Sender, Mutex},
    thread,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::clients::MailClient;
use crate::config::AgentConfig;
use crate::constants::{
    BASE_RESTART_DELAY, MAX_RESTART_ATTEMPTS, MAX_RESTART_DELAY, OFFLINE_THRESHOLD,
    RESTART_JITTER_FRACTION, RESTART_WINDOW, STUCK_THRESHOLD,
};
use crate::process::ProcessManager;

/// The health monitor's derived label for an agent at a moment in time.
/// Never persisted; recomputed fresh every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Alive, responsive, not stuck.
    Running,
    /// The process is not alive.
    Crashed,
    /// Alive, but the mail service hasn't heard from it recently.
    Unresponsive,
    /// Alive, reportedly "working" the same task for too long.
    Stuck,
    /// No process record exists at all.
    Stopped,
}

/// Immutable snapshot of one agent's monitored state, handed to the
/// Dashboard on each refresh.
#[derive(Debug, Clone)]
pub struct AgentDisplayState {
    /// Agent name.
    pub name: String,
    /// Current classification.
    pub classification: Classification,
    /// Last heartbeat observed from the mail service, if any.
    pub last_seen: Option<DateTime<Utc>>,
    /// The task currently being worked, if any.
    pub current_task_id: Option<String>,
    /// Phase names the agent has progressed through, oldest first. Derived
    /// by the Dashboard from `beads`-kind messages, not by the monitor
    /// itself; left empty here and filled in by the dashboard's merge step.
    pub phase_history: Vec<String>,
    /// Restart attempts counted within the current rolling window.
    pub restart_attempts: u32,
    /// When the last restart attempt for this agent occurred.
    pub last_restart_at: Option<DateTime<Utc>>,
    /// Whether the restart budget has been exhausted for this agent.
    pub failed_permanent: bool,
}

/// An action or observation the monitor emits for the Dashboard to display.
#[derive(Debug, Clone)]
pub enum HealthEvent {
    /// An agent's classification changed (or was reaffirmed) this tick.
    Classified {
        /// Agent name.
        name: String,
        /// New classification.
        classification: Classification,
    },
    /// A restart attempt was issued.
    RestartAttempted {
        /// Agent name.
        name: String,
        /// The 1-based attempt number within the current window.
        attempt: u32,
    },
    /// The restart budget was exhausted; no further automatic restarts.
    FailedPermanent {
        /// Agent name.
        name: String,
    },
    /// A `Stuck` agent's lease was released via the mail client.
    LeaseReleased {
        /// Agent name.
        name: String,
    },
    /// A classification or recovery action failed; the previous
    /// classification is left in place.
    Error {
        /// Agent name.
        name: String,
        /// Error detail.
        detail: String,
    },
}

#[derive(Debug, Default)]
struct RestartState {
    /// Timestamps of restarts within the rolling window, oldest first.
    attempts: Vec<Instant>,
    failed_permanent: bool,
    last_restart_at: Option<DateTime<Utc>>,
}

impl RestartState {
    fn prune(&mut self, window: Duration) {
        let now = Instant::now();
        self.attempts.retain(|t| now.duration_since(*t) < window);
        if self.attempts.is_empty() {
            self.failed_permanent = false;
        }
    }

    fn record_attempt(&mut self) -> u32 {
        self.attempts.push(Instant::now());
        self.last_restart_at = Some(Utc::now());
        self.attempts.len() as u32
    }
}

/// Computes `min(baseDelay * 2^(n-1), maxDelay) ± 20% jitter` for the n-th
/// restart attempt (1-based).
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = BASE_RESTART_DELAY
        .checked_mul(1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX))
        .unwrap_or(MAX_RESTART_DELAY);
    let bounded = exp.min(MAX_RESTART_DELAY);
    let jitter_range = bounded.as_secs_f64() * RESTART_JITTER_FRACTION;
    let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
    let seconds = (bounded.as_secs_f64() + jitter).max(0.0);
    Duration::from_secs_f64(seconds)
}

/// Classifies one agent given its process liveness and the mail service's
/// reported status, per spec.md §4.2 step 3.
pub fn classify(
    has_record: bool,
    is_alive: bool,
    status: Option<&crate::clients::AgentStatus>,
) -> Classification {
    if !has_record {
        return Classification::Stopped;
    }
    if !is_alive {
        return Classification::Crashed;
    }
    let Some(status) = status else {
        return Classification::Unresponsive;
    };
    let since_seen = (Utc::now() - status.last_seen)
        .to_std()
        .unwrap_or(Duration::ZERO);
    if since_seen > OFFLINE_THRESHOLD {
        return Classification::Unresponsive;
    }
    if status.current_status == "working" {
        match status.in_progress_since {
            Some(in_progress_since) => {
                let stuck_for = (Utc::now() - in_progress_since)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                if stuck_for > STUCK_THRESHOLD {
                    return Classification::Stuck;
                }
            }
            // The mail service doesn't expose per-task progress timestamps;
            // Stuck collapses into Unresponsive rather than silently reading
            // as Running (spec.md §9 Open Questions).
            None => return Classification::Unresponsive,
        }
    }
    Classification::Running
}

/// Runs the per-agent classification + recovery tick.
pub struct HealthMonitor {
    restart_states: HashMap<String, Mutex<RestartState>>,
}

impl HealthMonitor {
    /// Builds a monitor tracking the given agent names.
    pub fn new(agent_names: impl IntoIterator<Item = String>) -> Self {
        Self {
            restart_states: agent_names
                .into_iter()
                .map(|name| (name, Mutex::new(RestartState::default())))
                .collect(),
        }
    }

    /// Clears an agent's restart counter, e.g. after a config reload or a
    /// manual start re-admits it.
    pub fn reset(&self, name: &str) {
        if let Some(state) = self.restart_states.get(name) {
            *state.lock().expect("restart state poisoned") = RestartState::default();
        }
    }

    /// Runs one tick: classifies every agent (in parallel) and applies the
    /// recovery policy. Restart actions for a single agent are serialized by
    /// that agent's own `Mutex<RestartState>`; distinct agents proceed
    /// concurrently via `thread::scope`.
    pub fn tick(
        &self,
        agents: &std::collections::BTreeMap<String, AgentConfig>,
        process_manager: &ProcessManager,
        mail_client: &dyn MailClient,
        events: &Sender<HealthEvent>,
    ) -> Vec<AgentDisplayState> {
        let names: Vec<String> = agents.keys().cloned().collect();
        let statuses = mail_client
            .get_all_agent_statuses(&names)
            .unwrap_or_default()
            .into_iter()
            .collect::<HashMap<_, _>>();

        thread::scope(|scope| {
            let handles: Vec<_> = names
                .iter()
                .map(|name| {
                    let agent_config = &agents[name];
                    let status = statuses.get(name);
                    scope.spawn(move || {
                        self.tick_one(name, agent_config, status, process_manager, mail_client, events)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().expect("health worker panicked")).collect()
        })
    }

    fn tick_one(
        &self,
        name: &str,
        agent_config: &AgentConfig,
        status: Option<&crate::clients::AgentStatus>,
        process_manager: &ProcessManager,
        mail_client: &dyn MailClient,
        events: &Sender<HealthEvent>,
    ) -> AgentDisplayState {
        let record = process_manager.get_process_info(name).ok();
        let has_record = record.is_some();
        let is_alive = record
            .as_ref()
            .map(|r| process_manager.is_running(r.pid))
            .unwrap_or(false);

        let classification = classify(has_record, is_alive, status);
        let _ = events.send(HealthEvent::Classified {
            name: name.to_string(),
            classification,
        });

        let restart_state = self
            .restart_states
            .get(name)
            .expect("health monitor tracks every configured agent");
        let mut state = restart_state.lock().expect("restart state poisoned");
        state.prune(RESTART_WINDOW);

        let should_restart = match classification {
            Classification::Stopped => agent_config.autorestart,
            Classification::Crashed | Classification::Unresponsive => true,
            Classification::Stuck => {
                if let Err(e) = mail_client.release_agent_leases(name) {
                    let _ = events.send(HealthEvent::Error {
                        name: name.to_string(),
                        detail: e.to_string(),
                    });
                } else {
                    let _ = events.send(HealthEvent::LeaseReleased { name: name.to_string() });
                }
                false
            }
            Classification::Running => false,
        };

        if should_restart && !state.failed_permanent {
            if state.attempts.len() as u32 >= MAX_RESTART_ATTEMPTS {
                state.failed_permanent = true;
                let _ = events.send(HealthEvent::FailedPermanent { name: name.to_string() });
            } else {
                let attempt = state.record_attempt();
                let delay = backoff_delay(attempt);
                thread::sleep(delay);
                let argv = crate::reload::tokenize_command_line(&agent_config.command_line);
                match process_manager.start(name, &agent_config.command_line, &argv, &[]) {
                    Ok(_) => {
                        let _ = events.send(HealthEvent::RestartAttempted {
                            name: name.to_string(),
                            attempt,
                        });
                    }
                    Err(e) => {
                        let _ = events.send(HealthEvent::Error {
                            name: name.to_string(),
                            detail: e.to_string(),
                        });
                    }
                }
            }
        }

        AgentDisplayState {
            name: name.to_string(),
            classification,
            last_seen: status.map(|s| s.last_seen),
            current_task_id: status.and_then(|s| s.current_task_id.clone()),
            phase_history: Vec::new(),
            restart_attempts: state.attempts.len() as u32,
            last_restart_at: state.last_restart_at,
            failed_permanent: state.failed_permanent,
        }
    }
}
