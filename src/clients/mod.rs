//! Capability interfaces to the two external collaborators the core talks
//! to: the task database and the auxiliary mail service. Both are specified
//! here only at their interface (spec.md §9: "capability interfaces... no
//! inheritance, composition and interfaces only"); concrete and mock
//! implementations are swapped freely behind the trait.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Task DB client interface + JSON-file-backed default implementation.
pub mod task_db;

/// Mail service client interface + HTTP implementation.
pub mod mail;

/// A task as returned by the task database.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskRecord {
    /// Unique task id.
    pub id: String,
    /// Human-readable title.
    pub title: String,
    /// Lifecycle status.
    pub status: TaskStatus,
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created but not yet claimed.
    Open,
    /// Claimed and being worked.
    InProgress,
    /// Completed successfully.
    Done,
    /// Closed without completion.
    Closed,
}

impl TaskStatus {
    /// Whether this status counts as "active" for the dashboard's task filter.
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Open | TaskStatus::InProgress)
    }
}

/// Read/write interface to the task database.
///
/// Out of scope per spec.md §1 ("The task database (accessed through a
/// small read/write client interface)"); this repository only defines and
/// consumes the interface.
pub trait TaskDbClient: Send + Sync {
    /// Returns all tasks matching `status` when provided, else all tasks.
    fn get_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<TaskRecord>, ClientError>;
    /// Creates a new task, returning its assigned id.
    fn create_task(&self, title: &str) -> Result<TaskRecord, ClientError>;
    /// Updates an existing task's status.
    fn update_task(&self, id: &str, status: TaskStatus) -> Result<(), ClientError>;
    /// Deletes a task by id.
    fn delete_task(&self, id: &str) -> Result<(), ClientError>;
}

/// A message published by an agent or the mail service itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageRecord {
    /// When the message was emitted.
    pub timestamp: DateTime<Utc>,
    /// The kind of message.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// The agent or subsystem that emitted it.
    pub source: String,
    /// Free-form payload.
    pub content: String,
}

/// The kind of a [`MessageRecord`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// A task lease was granted or released.
    Lease,
    /// A progress "bead" marking a sub-step.
    Beads,
    /// An error report.
    Error,
    /// A free-form message.
    Message,
}

/// Status of a single agent as reported by the mail service.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentStatus {
    /// When the agent was last heard from.
    pub last_seen: DateTime<Utc>,
    /// The agent-reported status string, e.g. `"working"` or `"idle"`.
    pub current_status: String,
    /// The task currently being worked, if any.
    pub current_task_id: Option<String>,
    /// When work on `current_task_id` began, if the mail service tracks it.
    ///
    /// `None` when the mail service doesn't expose per-task progress
    /// timestamps; the health monitor's classifier collapses `Stuck` into
    /// `Unresponsive` in that case (spec.md §9 Open Questions).
    pub in_progress_since: Option<DateTime<Utc>>,
}

/// Capability interface to the auxiliary mail service.
///
/// Out of scope per spec.md §1 ("The auxiliary service's wire protocol
/// beyond a message/status query client interface").
pub trait MailClient: Send + Sync {
    /// Sends a message on behalf of `source`.
    fn send_message(&self, source: &str, content: &str) -> Result<(), ClientError>;
    /// Returns messages with timestamp strictly after `since`, capped at
    /// `limit`.
    fn get_messages(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, ClientError>;
    /// Returns the status of a single named agent.
    fn get_agent_status(&self, name: &str) -> Result<AgentStatus, ClientError>;
    /// Returns statuses for every agent name the caller lists.
    fn get_all_agent_statuses(
        &self,
        names: &[String],
    ) -> Result<Vec<(String, AgentStatus)>, ClientError>;
    /// Releases any task lease(s) held by `name`, used when the health
    /// monitor classifies an agent as `Stuck`.
    fn release_agent_leases(&self, name: &str) -> Result<(), ClientError>;
}
