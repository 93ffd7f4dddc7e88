//! The interactive terminal dashboard: a single-threaded event loop fed by
//! a handful of background workers over an `mpsc` channel.
use std::{
    io,
    sync::{mpsc, Arc},
    thread,
    time::Duration,
};

use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};

use crate::clients::{MailClient, TaskDbClient};
use crate::config::Config;
use crate::constants::{PUSH_EVENT_CHANNEL_CAPACITY, SHUTDOWN_GRACE};
use crate::health::HealthMonitor;
use crate::process::ProcessManager;
use crate::reload::ReloadEngine;

pub mod messages;
pub mod state;
pub mod ui;
pub mod workers;

pub use messages::{DashboardMsg, PushEvent, RefreshResult};
pub use state::{DashboardState, Mode};

/// Everything the dashboard needs to run a session. Constructed once in
/// `main` after the config is loaded and the process manager is warmed up.
pub struct DashboardDeps {
    /// The loaded, validated configuration.
    pub config: Config,
    /// Path the config was loaded from, used to drive the reload watcher.
    pub config_path: std::path::PathBuf,
    /// Process manager shared with the health monitor and CLI.
    pub process_manager: Arc<ProcessManager>,
    /// Health monitor shared with the CLI's `services status` command.
    pub health_monitor: Arc<HealthMonitor>,
    /// Task database client.
    pub task_db: Arc<dyn TaskDbClient>,
    /// Mail service client.
    pub mail_client: Arc<dyn MailClient>,
    /// Reload engine driving hot config changes.
    pub reload_engine: Arc<ReloadEngine>,
}

/// Runs the dashboard to completion (until the operator quits or Ctrl-C).
/// Leaves the terminal in its original state on every exit path, including
/// panics unwound through this frame.
pub fn run(deps: DashboardDeps) -> io::Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_inner(&mut terminal, deps);

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    result
}

fn run_inner(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    deps: DashboardDeps,
) -> io::Result<()> {
    let (tx, rx) = mpsc::sync_channel(PUSH_EVENT_CHANNEL_CAPACITY);

    let worker_handles = workers::spawn_all(
        tx.clone(),
        deps.task_db.clone(),
        deps.mail_client.clone(),
        deps.process_manager.clone(),
        deps.health_monitor.clone(),
        &deps.config,
    );

    let reload_cancel = workers::spawn_reload_bridge(
        tx.clone(),
        deps.config_path.clone(),
        deps.reload_engine.clone(),
        deps.process_manager.clone(),
        deps.health_monitor.clone(),
    )
    .ok();

    let input_cancel = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let input_handle = spawn_input_worker(tx.clone(), input_cancel.clone());

    let mut dashboard_state = DashboardState::default();

    loop {
        match rx.recv_timeout(Duration::from_millis(250)) {
            Ok(msg) => {
                dashboard_state.apply(msg);
                if dashboard_state.should_quit {
                    break;
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        terminal.draw(|frame| ui::draw(frame, &dashboard_state))?;
    }

    input_cancel.store(true, std::sync::atomic::Ordering::Release);
    let _ = input_handle.join();
    if let Some(cancel) = reload_cancel {
        cancel.store(true, std::sync::atomic::Ordering::Release);
    }
    worker_handles.shutdown(SHUTDOWN_GRACE);

    Ok(())
}

/// Polls the terminal for key/resize events and forwards them as
/// `DashboardMsg`s. Runs on its own thread because `crossterm::event::poll`
/// blocks.
fn spawn_input_worker(
    tx: mpsc::SyncSender<DashboardMsg>,
    cancel: Arc<std::sync::atomic::AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while !cancel.load(std::sync::atomic::Ordering::Acquire) {
            match event::poll(Duration::from_millis(200)) {
                Ok(true) => match event::read() {
                    Ok(Event::Key(key)) => {
                        if tx.send(DashboardMsg::KeyPress(key)).is_err() {
                            break;
                        }
                    }
                    Ok(Event::Resize(w, h)) => {
                        if tx.send(DashboardMsg::Resize(w, h)).is_err() {
                            break;
                        }
                    }
                    _ => {}
                },
                Ok(false) => continue,
                Err(_) => break,
            }
        }
    })
}
