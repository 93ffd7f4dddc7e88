//! Background worker threads feeding the dashboard's event loop.
//!
//! Every worker holds only a `SyncSender<DashboardMsg>` and an `Arc<AtomicBool>`
//! cancellation flag; none of them touch `DashboardState` directly.
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{Sender, SyncSender},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use chrono::{DateTime, Utc};

use crate::clients::{MailClient, TaskDbClient, TaskStatus};
use crate::config::Config;
use crate::constants::DASHBOARD_TICK;
use crate::health::{HealthEvent, HealthMonitor};
use crate::process::ProcessManager;

use super::messages::{DashboardMsg, PushEvent, RefreshResult};

/// Handles to the background workers a dashboard session owns, plus their
/// shared cancellation flag.
pub struct WorkerHandles {
    cancel: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerHandles {
    /// Signals every worker to stop and joins them, waiting at most `grace`.
    pub fn shutdown(self, grace: Duration) {
        self.cancel.store(true, Ordering::Release);
        let deadline = std::time::Instant::now() + grace;
        for handle in self.handles {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            // JoinHandle has no timed join; these threads all poll `cancel`
            // on short intervals, so a best-effort join is sufficient here.
            let _ = handle.join();
        }
    }
}

/// Spawns the tick worker: emits `DashboardMsg::Tick` on `DASHBOARD_TICK`.
pub fn spawn_tick_worker(tx: SyncSender<DashboardMsg>, cancel: Arc<AtomicBool>) -> JoinHandle<()> {
    thread::spawn(move || {
        while !cancel.load(Ordering::Acquire) {
            thread::sleep(DASHBOARD_TICK);
            if cancel.load(Ordering::Acquire) {
                break;
            }
            if tx.send(DashboardMsg::Tick).is_err() {
                break;
            }
        }
    })
}

/// Spawns the refresh worker: on every `Tick` upstream request (driven here
/// by its own timer, matching the tick worker's cadence) queries tasks,
/// messages, and agent health concurrently and emits one `RefreshAll`.
pub fn spawn_refresh_worker(
    tx: SyncSender<DashboardMsg>,
    cancel: Arc<AtomicBool>,
    task_db: Arc<dyn TaskDbClient>,
    mail_client: Arc<dyn MailClient>,
    process_manager: Arc<ProcessManager>,
    health_monitor: Arc<HealthMonitor>,
    agents: Arc<BTreeMap<String, crate::config::AgentConfig>>,
    health_events: Sender<HealthEvent>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut since: Option<DateTime<Utc>> = None;
        while !cancel.load(Ordering::Acquire) {
            thread::sleep(DASHBOARD_TICK);
            if cancel.load(Ordering::Acquire) {
                break;
            }

            let tasks = task_db
                .get_tasks(Some(TaskStatus::Open))
                .and_then(|mut open| {
                    let in_progress = task_db.get_tasks(Some(TaskStatus::InProgress))?;
                    open.extend(in_progress);
                    Ok(open)
                })
                .map_err(|e| e.to_string());

            let messages = mail_client
                .get_messages(since, crate::constants::MAX_LOG_MESSAGES)
                .map_err(|e| e.to_string());
            if let Ok(ref fetched) = messages {
                if let Some(last) = fetched.last() {
                    since = Some(last.timestamp);
                }
            }

            let agent_states = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                health_monitor.tick(&agents, &process_manager, mail_client.as_ref(), &health_events)
            }))
            .map_err(|_| "health monitor tick panicked".to_string());

            let result = RefreshResult {
                tasks,
                messages,
                agents: agent_states,
            };

            if tx.send(DashboardMsg::RefreshAll(result)).is_err() {
                break;
            }
        }
    })
}

/// Spawns the push-event bridge: forwards `HealthEvent`s emitted by the
/// health monitor's tick as `DashboardMsg::WsEvent` push events. Stands in
/// for the mail service's optional streaming connection (spec.md §4.4),
/// which this repository does not implement a wire client for.
pub fn spawn_health_event_bridge(
    tx: SyncSender<DashboardMsg>,
    cancel: Arc<AtomicBool>,
    health_events: std::sync::mpsc::Receiver<HealthEvent>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        while !cancel.load(Ordering::Acquire) {
            match health_events.recv_timeout(Duration::from_millis(250)) {
                Ok(event) => {
                    let push = match event {
                        HealthEvent::Error { name, detail } => {
                            PushEvent::Error(format!("{name}: {detail}"))
                        }
                        HealthEvent::Classified { .. }
                        | HealthEvent::RestartAttempted { .. }
                        | HealthEvent::FailedPermanent { .. }
                        | HealthEvent::LeaseReleased { .. } => continue,
                    };
                    if tx.send(DashboardMsg::WsEvent(push)).is_err() {
                        break;
                    }
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
    })
}

/// Spawns the config-reload watcher bridge: forwards a `ReloadOutcome` to
/// the event loop each time the watcher thread applies a reload.
pub fn spawn_reload_bridge(
    tx: SyncSender<DashboardMsg>,
    config_path: std::path::PathBuf,
    reload_engine: Arc<crate::reload::ReloadEngine>,
    process_manager: Arc<ProcessManager>,
    health_monitor: Arc<HealthMonitor>,
) -> std::io::Result<Arc<AtomicBool>> {
    let tx_for_watch = tx.clone();
    let cancel = crate::reload::spawn_watcher(config_path, move || {
        match reload_engine.reload(&process_manager) {
            Ok(outcome) => {
                // Added/changed agents are freshly (re)admitted; an operator
                // applying a reload clears any prior restart-cap trip.
                for name in outcome.added.iter().chain(outcome.changed.iter()) {
                    health_monitor.reset(name);
                }
                let _ = tx_for_watch.send(DashboardMsg::ConfigReload(outcome));
            }
            Err(e) => {
                let _ = tx_for_watch.send(DashboardMsg::WsEvent(PushEvent::Error(e.to_string())));
            }
        }
    })
    .map_err(std::io::Error::other)?;
    Ok(cancel)
}

/// Assembles the standard worker set for a dashboard session and returns a
/// handle that can later be used to shut them all down.
pub fn spawn_all(
    tx: SyncSender<DashboardMsg>,
    task_db: Arc<dyn TaskDbClient>,
    mail_client: Arc<dyn MailClient>,
    process_manager: Arc<ProcessManager>,
    health_monitor: Arc<HealthMonitor>,
    config: &Config,
) -> WorkerHandles {
    let cancel = Arc::new(AtomicBool::new(false));
    let (health_tx, health_rx) = std::sync::mpsc::channel();
    let agents = Arc::new(config.agents.clone());

    let tick = spawn_tick_worker(tx.clone(), cancel.clone());
    let refresh = spawn_refresh_worker(
        tx.clone(),
        cancel.clone(),
        task_db,
        mail_client,
        process_manager,
        health_monitor,
        agents,
        health_tx,
    );
    let bridge = spawn_health_event_bridge(tx, cancel.clone(), health_rx);

    WorkerHandles {
        cancel,
        handles: vec![tick, refresh, bridge],
    }
}
