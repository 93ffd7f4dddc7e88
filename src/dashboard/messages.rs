//! Message kinds the dashboard event loop consumes.
use crate::clients::{MessageRecord, TaskRecord};
use crate::health::AgentDisplayState;
use crate::reload::ReloadOutcome;

/// The serialized stream of inputs the single-threaded event loop consumes.
/// Background workers only ever hold a `Sender<DashboardMsg>`; the loop
/// itself performs no blocking I/O.
#[derive(Debug)]
pub enum DashboardMsg {
    /// Emitted on the dashboard's own tick interval; triggers a refresh.
    Tick,
    /// The result of an asynchronous `refreshAll` command.
    RefreshAll(RefreshResult),
    /// A push event from the mail service's optional streaming connection.
    WsEvent(PushEvent),
    /// A key was pressed.
    KeyPress(crossterm::event::KeyEvent),
    /// The reload engine finished reconciling a config change.
    ConfigReload(ReloadOutcome),
    /// The result of a user-initiated action (kill, run self-test, …).
    ActionResult {
        /// Name of the operation that completed.
        op: String,
        /// `Ok(detail)` on success, `Err(detail)` on failure.
        outcome: Result<String, String>,
    },
    /// The terminal was resized.
    Resize(u16, u16),
    /// The user requested shutdown (`q` / Ctrl-C).
    Quit,
}

/// Result of the asynchronous refresh command. Each sub-query's failure is
/// carried independently so one slow/broken client doesn't fail the whole
/// refresh.
#[derive(Debug)]
pub struct RefreshResult {
    /// Active tasks, or the error fetching them.
    pub tasks: Result<Vec<TaskRecord>, String>,
    /// New messages since the last cursor, or the error fetching them.
    pub messages: Result<Vec<MessageRecord>, String>,
    /// Current classification of every configured agent.
    pub agents: Result<Vec<AgentDisplayState>, String>,
}

/// An event delivered over the mail service's optional push channel.
#[derive(Debug, Clone)]
pub enum PushEvent {
    /// An agent's status changed.
    AgentStatus(AgentDisplayState),
    /// A new message arrived.
    NewMessage(MessageRecord),
    /// The push connection reported an error.
    Error(String),
    /// The push connection was (re)established.
    Connected,
    /// The push connection dropped; the loop falls back to tick polling and
    /// schedules a reconnect with backoff.
    Disconnected,
}
