//! HTTP client for the auxiliary mail service.
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::clients::{AgentStatus, MailClient, MessageRecord};
use crate::constants::MAIL_HTTP_TIMEOUT;
use crate::error::ClientError;

/// Blocking HTTP implementation of [`MailClient`], talking to
/// `services.mail.url` with the spec's 2 s per-call timeout.
pub struct HttpMailClient {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpMailClient {
    /// Builds a client against `base_url` using the default mail timeout.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeout(base_url, MAIL_HTTP_TIMEOUT)
    }

    /// Builds a client with an explicit timeout, used by tests.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::blocking::Client::builder()
                .timeout(timeout)
                .build()
                .expect("reqwest client"),
        }
    }

    fn map_send_error(&self, url: &str, err: reqwest::Error) -> ClientError {
        if err.is_timeout() {
            ClientError::Timeout(url.to_string())
        } else {
            ClientError::RequestFailed(url.to_string(), err.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct AgentStatusWire {
    last_seen: DateTime<Utc>,
    current_status: String,
    current_task_id: Option<String>,
    #[serde(default)]
    in_progress_since: Option<DateTime<Utc>>,
}

impl From<AgentStatusWire> for AgentStatus {
    fn from(wire: AgentStatusWire) -> Self {
        AgentStatus {
            last_seen: wire.last_seen,
            current_status: wire.current_status,
            current_task_id: wire.current_task_id,
            in_progress_since: wire.in_progress_since,
        }
    }
}

impl MailClient for HttpMailClient {
    fn send_message(&self, source: &str, content: &str) -> Result<(), ClientError> {
        let url = format!("{}/messages", self.base_url);
        let body = serde_json::json!({ "source": source, "content": content });
        self.client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| self.map_send_error(&url, e))?
            .error_for_status()
            .map_err(|e| self.map_send_error(&url, e))?;
        Ok(())
    }

    fn get_messages(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, ClientError> {
        let url = format!("{}/messages", self.base_url);
        let mut request = self.client.get(&url).query(&[("limit", limit.to_string())]);
        if let Some(since) = since {
            request = request.query(&[("since", since.to_rfc3339())]);
        }
        let response = request.send().map_err(|e| self.map_send_error(&url, e))?;
        response
            .json::<Vec<MessageRecord>>()
            .map_err(|e| ClientError::MalformedResponse(url.clone(), e.to_string()))
    }

    fn get_agent_status(&self, name: &str) -> Result<AgentStatus, ClientError> {
        let url = format!("{}/agents/{}", self.base_url, name);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| self.map_send_error(&url, e))?;
        response
            .json::<AgentStatusWire>()
            .map(AgentStatus::from)
            .map_err(|e| ClientError::MalformedResponse(url.clone(), e.to_string()))
    }

    fn get_all_agent_statuses(
        &self,
        names: &[String],
    ) -> Result<Vec<(String, AgentStatus)>, ClientError> {
        names
            .iter()
            .map(|name| self.get_agent_status(name).map(|status| (name.clone(), status)))
            .collect()
    }

    fn release_agent_leases(&self, name: &str) -> Result<(), ClientError> {
        let url = format!("{}/agents/{}/release", self.base_url, name);
        self.client
            .post(&url)
            .send()
            .map_err(|e| self.map_send_error(&url, e))?
            .error_for_status()
            .map_err(|e| self.map_send_error(&url, e))?;
        Ok(())
    }
}

/// In-memory mock used by component tests in place of the HTTP client.
#[cfg(test)]
pub struct MockMailClient {
    statuses: std::sync::Mutex<std::collections::HashMap<String, AgentStatus>>,
    messages: std::sync::Mutex<Vec<MessageRecord>>,
}

#[cfg(test)]
impl MockMailClient {
    /// Builds a mock pre-seeded with agent statuses.
    pub fn new(statuses: std::collections::HashMap<String, AgentStatus>) -> Self {
        Self {
            statuses: std::sync::Mutex::new(statuses),
            messages: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Replaces the status recorded for `name`, simulating a heartbeat.
    pub fn set_status(&self, name: &str, status: AgentStatus) {
        self.statuses.lock().unwrap().insert(name.to_string(), status);
    }
}

#[cfg(test)]
impl MailClient for MockMailClient {
    fn send_message(&self, source: &str, content: &str) -> Result<(), ClientError> {
        self.messages.lock().unwrap().push(MessageRecord {
            timestamp: Utc::now(),
            kind: crate::clients::MessageKind::Message,
            source: source.to_string(),
            content: content.to_string(),
        });
        Ok(())
    }

    fn get_messages(
        &self,
        _since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, ClientError> {
        let messages = self.messages.lock().unwrap();
        Ok(messages.iter().rev().take(limit).cloned().collect())
    }

    fn get_agent_status(&self, name: &str) -> Result<AgentStatus, ClientError> {
        self.statuses
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| ClientError::MalformedResponse(name.to_string(), "no status".into()))
    }

    fn get_all_agent_statuses(
        &self,
        names: &[String],
    ) -> Result<Vec<(String, AgentStatus)>, ClientError> {
        let statuses = self.statuses.lock().unwrap();
        Ok(names
            .iter()
            .filter_map(|n| statuses.get(n).cloned().map(|s| (n.clone(), s)))
            .collect())
    }

    fn release_agent_leases(&self, _name: &str) -> Result<(), ClientError> {
        Ok(())
    }
}
