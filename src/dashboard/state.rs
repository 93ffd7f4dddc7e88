//! Canonical display state owned exclusively by the dashboard event loop.
use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use crossterm::event::KeyCode;

use crate::clients::{MessageRecord, TaskRecord};
use crate::constants::MAX_LOG_MESSAGES;
use crate::health::AgentDisplayState;

use super::messages::{DashboardMsg, PushEvent, RefreshResult};

/// Priority-ordered UI modes. A higher-priority mode captures all keys
/// until it exits; `CreateTaskModal > SearchMode > ConfirmModal >
/// DetailModal > Normal`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Mode {
    /// Default mode: arrow keys move selection, single-letter shortcuts
    /// active.
    Normal = 0,
    /// A detail view is open for the selected agent or task.
    DetailModal = 1,
    /// A destructive action (kill) awaits confirmation.
    ConfirmModal = 2,
    /// The operator is typing a search filter.
    SearchMode = 3,
    /// The operator is composing a new task.
    CreateTaskModal = 4,
}

/// Which pane currently has keyboard focus in Normal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusedPane {
    /// The task list.
    Tasks,
    /// The agent grid.
    Agents,
}

/// A transient success/failure toast shown after an action completes.
#[derive(Debug, Clone)]
pub struct Toast {
    /// Rendered text.
    pub text: String,
    /// Whether the action succeeded.
    pub ok: bool,
}

/// The dashboard's canonical, owned state. Rendering is a pure function of
/// this struct; it is mutated only inside the event loop's message handler.
pub struct DashboardState {
    /// Stack of active modes, highest priority last.
    pub modes: Vec<Mode>,
    /// Currently focused pane in Normal mode.
    pub focus: FocusedPane,
    /// Index of the selected task.
    pub selected_task: usize,
    /// Index of the selected agent.
    pub selected_agent: usize,
    /// Last snapshot of active tasks.
    pub tasks: Vec<TaskRecord>,
    /// Last snapshot of agent display states, in configured order.
    pub agents: Vec<AgentDisplayState>,
    /// Bounded ring of recent messages, most recent at the back.
    pub messages: VecDeque<MessageRecord>,
    /// When the last successful `refreshAll` landed.
    pub last_refresh: Option<DateTime<Utc>>,
    /// Whether the push channel is currently connected.
    pub push_connected: bool,
    /// Current search filter text, if `SearchMode` is active.
    pub search_query: String,
    /// The currently displayed toast, if any.
    pub toast: Option<Toast>,
    /// Banner shown after a config reload, if any.
    pub reload_banner: Option<String>,
    /// Terminal size as last observed.
    pub size: (u16, u16),
    /// Set once the operator requests shutdown.
    pub should_quit: bool,
}

impl Default for DashboardState {
    fn default() -> Self {
        Self {
            modes: vec![Mode::Normal],
            focus: FocusedPane::Agents,
            selected_task: 0,
            selected_agent: 0,
            tasks: Vec::new(),
            agents: Vec::new(),
            messages: VecDeque::new(),
            last_refresh: None,
            push_connected: false,
            search_query: String::new(),
            toast: None,
            reload_banner: None,
            size: (80, 24),
            should_quit: false,
        }
    }
}

impl DashboardState {
    /// The mode currently capturing keys: the highest-priority entry on the
    /// stack.
    pub fn active_mode(&self) -> &Mode {
        self.modes.iter().max().unwrap_or(&Mode::Normal)
    }

    fn push_mode(&mut self, mode: Mode) {
        if !self.modes.contains(&mode) {
            self.modes.push(mode);
        }
    }

    fn pop_active_mode(&mut self) {
        if let Some(pos) = self.modes.iter().enumerate().max_by_key(|(_, m)| **m).map(|(i, _)| i)
        {
            if self.modes[pos] != Mode::Normal {
                self.modes.remove(pos);
            }
        }
    }

    fn push_message(&mut self, message: MessageRecord) {
        self.messages.push_back(message);
        while self.messages.len() > MAX_LOG_MESSAGES {
            self.messages.pop_front();
        }
    }

    /// Applies one message to the state, per the handling table in spec.md
    /// §4.4. Returns `true` if the caller should re-render.
    pub fn apply(&mut self, msg: DashboardMsg) -> bool {
        match msg {
            DashboardMsg::Tick => false,
            DashboardMsg::RefreshAll(result) => {
                self.apply_refresh(result);
                true
            }
            DashboardMsg::WsEvent(event) => {
                self.apply_push_event(event);
                true
            }
            DashboardMsg::KeyPress(key) => {
                self.apply_key(key.code);
                true
            }
            DashboardMsg::ConfigReload(outcome) => {
                let summary = format!(
                    "reload: +{} -{} ~{} failed={}",
                    outcome.added.len(),
                    outcome.removed.len(),
                    outcome.changed.len(),
                    outcome.failed.len()
                );
                self.reload_banner = Some(summary);
                true
            }
            DashboardMsg::ActionResult { op, outcome } => {
                self.pop_active_mode();
                self.toast = Some(match outcome {
                    Ok(detail) => Toast {
                        text: format!("{op}: {detail}"),
                        ok: true,
                    },
                    Err(detail) => Toast {
                        text: format!("{op} failed: {detail}"),
                        ok: false,
                    },
                });
                true
            }
            DashboardMsg::Resize(w, h) => {
                self.size = (w, h);
                true
            }
            DashboardMsg::Quit => {
                self.should_quit = true;
                true
            }
        }
    }

    fn apply_refresh(&mut self, result: RefreshResult) {
        if let Ok(tasks) = result.tasks {
            self.tasks = tasks;
        }
        if let Ok(agents) = result.agents {
            self.agents = agents;
        }
        if let Ok(messages) = result.messages {
            for message in messages {
                self.push_message(message);
            }
        }
        self.last_refresh = Some(Utc::now());
    }

    fn apply_push_event(&mut self, event: PushEvent) {
        match event {
            PushEvent::AgentStatus(state) => {
                if let Some(existing) = self.agents.iter_mut().find(|a| a.name == state.name) {
                    *existing = state;
                } else {
                    self.agents.push(state);
                }
            }
            PushEvent::NewMessage(message) => self.push_message(message),
            PushEvent::Error(_) => {}
            PushEvent::Connected => self.push_connected = true,
            PushEvent::Disconnected => self.push_connected = false,
        }
    }

    fn apply_key(&mut self, code: KeyCode) {
        match self.active_mode() {
            Mode::CreateTaskModal => self.apply_key_create_task(code),
            Mode::SearchMode => self.apply_key_search(code),
            Mode::ConfirmModal => self.apply_key_confirm(code),
            Mode::DetailModal => self.apply_key_detail(code),
            Mode::Normal => self.apply_key_normal(code),
        }
    }

    fn apply_key_normal(&mut self, code: KeyCode) {
        match code {
            KeyCode::Up => self.move_selection(-1),
            KeyCode::Down => self.move_selection(1),
            KeyCode::Char(c) if c.is_ascii_digit() && c != '0' => {
                let idx = (c as u8 - b'1') as usize;
                if idx < self.agents.len() {
                    self.selected_agent = idx;
                    self.focus = FocusedPane::Agents;
                }
            }
            KeyCode::Char('r') => {}
            KeyCode::Char('t') => {}
            KeyCode::Char('v') => self.push_mode(Mode::DetailModal),
            KeyCode::Char('k') => self.push_mode(Mode::ConfirmModal),
            KeyCode::Char('x') => self.search_query.clear(),
            KeyCode::Char('/') => self.push_mode(Mode::SearchMode),
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Tab => {
                self.focus = match self.focus {
                    FocusedPane::Tasks => FocusedPane::Agents,
                    FocusedPane::Agents => FocusedPane::Tasks,
                };
            }
            _ => {}
        }
    }

    fn move_selection(&mut self, delta: i32) {
        match self.focus {
            FocusedPane::Tasks if !self.tasks.is_empty() => {
                self.selected_task = wrap_index(self.selected_task, delta, self.tasks.len());
            }
            FocusedPane::Agents if !self.agents.is_empty() => {
                self.selected_agent = wrap_index(self.selected_agent, delta, self.agents.len());
            }
            _ => {}
        }
    }

    fn apply_key_search(&mut self, code: KeyCode) {
        match code {
            KeyCode::Esc | KeyCode::Enter => self.pop_active_mode(),
            KeyCode::Backspace => {
                self.search_query.pop();
            }
            KeyCode::Char(c) => self.search_query.push(c),
            _ => {}
        }
    }

    fn apply_key_confirm(&mut self, code: KeyCode) {
        match code {
            KeyCode::Esc | KeyCode::Char('n') => self.pop_active_mode(),
            // `y` is handled by the caller issuing the kill command and
            // later delivering `ActionResult`, which pops the modal.
            _ => {}
        }
    }

    fn apply_key_detail(&mut self, code: KeyCode) {
        if matches!(code, KeyCode::Esc | KeyCode::Char('v')) {
            self.pop_active_mode();
        }
    }

    fn apply_key_create_task(&mut self, code: KeyCode) {
        match code {
            KeyCode::Esc => self.pop_active_mode(),
            KeyCode::Enter => self.pop_active_mode(),
            KeyCode::Backspace => {
                self.search_query.pop();
            }
            KeyCode::Char(c) => self.search_query.push(c),
            _ => {}
        }
    }

    /// Currently selected agent, if any.
    pub fn selected_agent(&self) -> Option<&AgentDisplayState> {
        self.agents.get(self.selected_agent)
    }
}

fn wrap_index(current: usize, delta: i32, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    let len = len as i32;
    let next = (current as i32 + delta).rem_euclid(len);
    next as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_priority_orders_correctly() {
        assert!(Mode::CreateTaskModal > Mode::SearchMode);
        assert!(Mode::SearchMode > Mode::ConfirmModal);
        assert!(Mode::ConfirmModal > Mode::DetailModal);
        assert!(Mode::DetailModal > Mode::Normal);
    }

    #[test]
    fn active_mode_is_highest_priority_on_stack() {
        let mut state = DashboardState::default();
        state.modes.push(Mode::DetailModal);
        state.modes.push(Mode::ConfirmModal);
        assert_eq!(*state.active_mode(), Mode::ConfirmModal);
    }

    #[test]
    fn message_ring_is_bounded() {
        let mut state = DashboardState::default();
        for i in 0..(MAX_LOG_MESSAGES + 20) {
            state.push_message(MessageRecord {
                timestamp: Utc::now(),
                kind: crate::clients::MessageKind::Message,
                source: "a".into(),
                content: format!("msg {i}"),
            });
        }
        assert_eq!(state.messages.len(), MAX_LOG_MESSAGES);
        assert_eq!(state.messages.back().unwrap().content, format!("msg {}", MAX_LOG_MESSAGES + 19));
    }

    #[test]
    fn quit_key_sets_should_quit() {
        let mut state = DashboardState::default();
        state.apply(DashboardMsg::KeyPress(crossterm::event::KeyEvent::new(
            KeyCode::Char('q'),
            crossterm::event::KeyModifiers::NONE,
        )));
        assert!(state.should_quit);
    }

    #[test]
    fn detail_modal_captures_keys_over_normal_shortcuts() {
        let mut state = DashboardState::default();
        state.push_mode(Mode::DetailModal);
        state.apply(DashboardMsg::KeyPress(crossterm::event::KeyEvent::new(
            KeyCode::Char('q'),
            crossterm::event::KeyModifiers::NONE,
        )));
        assert!(!state.should_quit);
        assert_eq!(*state.active_mode(), Mode::DetailModal);
    }
}
