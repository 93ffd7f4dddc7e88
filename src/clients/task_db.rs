//! JSON-file-backed task database client.
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use tempfile::NamedTempFile;
use uuid_like::next_id;

use crate::clients::{TaskDbClient, TaskRecord, TaskStatus};
use crate::error::ClientError;

/// A minimal dependency-free id generator; avoids pulling in a `uuid` crate
/// for a single call site.
mod uuid_like {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(1);

    pub fn next_id() -> String {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("task-{n:06x}")
    }
}

/// Default `TaskDbClient`: a single JSON file holding all tasks, rewritten
/// atomically (temp + rename) on every mutation, matching the Process
/// Manager's record-durability pattern.
pub struct JsonFileTaskDbClient {
    path: PathBuf,
    tasks: Mutex<Vec<TaskRecord>>,
}

impl JsonFileTaskDbClient {
    /// Opens (or initializes) the task store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ClientError> {
        let path = path.into();
        let tasks = if path.exists() {
            let bytes = fs::read(&path).map_err(|source| ClientError::IOFailed {
                path: path.clone(),
                source,
            })?;
            serde_json::from_slice(&bytes).map_err(|e| {
                ClientError::MalformedResponse(path.display().to_string(), e.to_string())
            })?
        } else {
            Vec::new()
        };
        Ok(Self {
            path,
            tasks: Mutex::new(tasks),
        })
    }

    fn persist(&self, tasks: &[TaskRecord]) -> Result<(), ClientError> {
        write_atomically(&self.path, tasks).map_err(|source| ClientError::IOFailed {
            path: self.path.clone(),
            source,
        })
    }
}

fn write_atomically(path: &Path, tasks: &[TaskRecord]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    let json = serde_json::to_vec_pretty(tasks)?;
    tmp.write_all(&json)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

impl TaskDbClient for JsonFileTaskDbClient {
    fn get_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<TaskRecord>, ClientError> {
        let tasks = self.tasks.lock().expect("task store poisoned");
        Ok(match status {
            Some(s) => tasks.iter().filter(|t| t.status == s).cloned().collect(),
            None => tasks.clone(),
        })
    }

    fn create_task(&self, title: &str) -> Result<TaskRecord, ClientError> {
        let record = TaskRecord {
            id: next_id(),
            title: title.to_string(),
            status: TaskStatus::Open,
        };
        let mut tasks = self.tasks.lock().expect("task store poisoned");
        tasks.push(record.clone());
        self.persist(&tasks)?;
        Ok(record)
    }

    fn update_task(&self, id: &str, status: TaskStatus) -> Result<(), ClientError> {
        let mut tasks = self.tasks.lock().expect("task store poisoned");
        let task = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| ClientError::MalformedResponse(id.to_string(), "not found".into()))?;
        task.status = status;
        self.persist(&tasks)?;
        Ok(())
    }

    fn delete_task(&self, id: &str) -> Result<(), ClientError> {
        let mut tasks = self.tasks.lock().expect("task store poisoned");
        tasks.retain(|t| t.id != id);
        self.persist(&tasks)?;
        Ok(())
    }
}

/// In-memory mock used by component tests in place of the JSON-file client.
#[cfg(test)]
pub struct MockTaskDbClient {
    tasks: Mutex<Vec<TaskRecord>>,
}

#[cfg(test)]
impl MockTaskDbClient {
    /// Builds a mock pre-seeded with `tasks`.
    pub fn new(tasks: Vec<TaskRecord>) -> Self {
        Self {
            tasks: Mutex::new(tasks),
        }
    }
}

#[cfg(test)]
impl TaskDbClient for MockTaskDbClient {
    fn get_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<TaskRecord>, ClientError> {
        let tasks = self.tasks.lock().unwrap();
        Ok(match status {
            Some(s) => tasks.iter().filter(|t| t.status == s).cloned().collect(),
            None => tasks.clone(),
        })
    }

    fn create_task(&self, title: &str) -> Result<TaskRecord, ClientError> {
        let record = TaskRecord {
            id: next_id(),
            title: title.to_string(),
            status: TaskStatus::Open,
        };
        self.tasks.lock().unwrap().push(record.clone());
        Ok(record)
    }

    fn update_task(&self, id: &str, status: TaskStatus) -> Result<(), ClientError> {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(t) = tasks.iter_mut().find(|t| t.id == id) {
            t.status = status;
        }
        Ok(())
    }

    fn delete_task(&self, id: &str) -> Result<(), ClientError> {
        self.tasks.lock().unwrap().retain(|t| t.id != id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_then_get_active_tasks_round_trips_through_disk() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("tasks.json");
        let client = JsonFileTaskDbClient::open(&path).expect("open");
        client.create_task("write docs").expect("create");

        let reopened = JsonFileTaskDbClient::open(&path).expect("reopen");
        let active = reopened.get_tasks(Some(TaskStatus::Open)).expect("get");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].title, "write docs");
    }

    #[test]
    fn update_task_persists_status() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("tasks.json");
        let client = JsonFileTaskDbClient::open(&path).expect("open");
        let task = client.create_task("ship it").expect("create");
        client
            .update_task(&task.id, TaskStatus::InProgress)
            .expect("update");

        let reopened = JsonFileTaskDbClient::open(&path).expect("reopen");
        let tasks = reopened.get_tasks(None).expect("get");
        assert_eq!(tasks[0].status, TaskStatus::InProgress);
    }
}
