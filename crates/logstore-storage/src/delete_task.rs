//! Persistent delete tasks.
//!
//! A delete task removes the rows matching a LogsQL filter within a time range
//! for a set of tenants. Pending tasks live in a JSON file which is rewritten
//! atomically on every change: the new content goes to a temporary file in
//! the same directory which then replaces the target.

use crate::error::{Result, StorageError};
use logstore_core::TenantId;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteTask {
    pub task_id: String,
    pub tenant_ids: Vec<TenantId>,
    /// LogsQL filter selecting the rows to delete.
    pub filter: String,
    pub start_time: i64,
    pub end_time: i64,
}

/// Pending delete tasks, optionally backed by a file.
#[derive(Debug, Default)]
pub struct DeleteTasks {
    path: Option<PathBuf>,
    tasks: Vec<DeleteTask>,
}

impl DeleteTasks {
    /// Loads tasks from `path`. A missing file means no tasks; `None` keeps tasks in memory only.
    pub fn open(path: Option<PathBuf>) -> Result<Self> {
        let tasks = match &path {
            Some(p) if p.exists() => {
                let data = std::fs::read(p)?;
                let tasks: Vec<DeleteTask> = serde_json::from_slice(&data).map_err(|err| {
                    StorageError::DeleteTask(format!("cannot parse delete tasks from {}: {err}", p.display()))
                })?;
                debug!(path = %p.display(), tasks = tasks.len(), "loaded delete tasks");
                tasks
            }
            _ => Vec::new(),
        };
        Ok(Self { path, tasks })
    }

    pub fn list(&self) -> &[DeleteTask] {
        &self.tasks
    }

    pub fn get(&self, task_id: &str) -> Option<&DeleteTask> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    pub fn add(&mut self, task: DeleteTask) -> Result<()> {
        if self.get(&task.task_id).is_some() {
            return Err(StorageError::DeleteTask(format!(
                "delete task with id={:?} already exists",
                task.task_id
            )));
        }
        if task.start_time > task.end_time {
            return Err(StorageError::DeleteTask(format!(
                "start_time={} cannot exceed end_time={} for delete task {:?}",
                task.start_time, task.end_time, task.task_id
            )));
        }
        info!(task_id = %task.task_id, filter = %task.filter, "registered delete task");
        self.tasks.push(task);
        self.persist()
    }

    pub fn remove(&mut self, task_id: &str) -> Result<DeleteTask> {
        let idx = self
            .tasks
            .iter()
            .position(|t| t.task_id == task_id)
            .ok_or_else(|| StorageError::DeleteTask(format!("unknown delete task id={task_id:?}")))?;
        let task = self.tasks.remove(idx);
        self.persist()?;
        info!(task_id = %task.task_id, "removed delete task");
        Ok(task)
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        write_atomic(path, &serde_json::to_vec_pretty(&self.tasks)?)
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| StorageError::Io(err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn task(id: &str) -> DeleteTask {
        DeleteTask {
            task_id: id.to_string(),
            tenant_ids: vec![TenantId::new(0, 0)],
            filter: "error".to_string(),
            start_time: 0,
            end_time: 100,
        }
    }

    #[test]
    fn test_persist_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("delete_tasks.json");

        let mut tasks = DeleteTasks::open(Some(path.clone())).unwrap();
        assert!(tasks.list().is_empty());
        tasks.add(task("t1")).unwrap();
        tasks.add(task("t2")).unwrap();

        let reloaded = DeleteTasks::open(Some(path.clone())).unwrap();
        assert_eq!(reloaded.list(), &[task("t1"), task("t2")]);

        tasks.remove("t1").unwrap();
        let reloaded = DeleteTasks::open(Some(path)).unwrap();
        assert_eq!(reloaded.list(), &[task("t2")]);
    }

    #[test]
    fn test_duplicate_and_unknown() {
        let mut tasks = DeleteTasks::open(None).unwrap();
        tasks.add(task("t1")).unwrap();
        assert!(tasks.add(task("t1")).is_err());
        let err = tasks.remove("missing").unwrap_err();
        assert!(err.to_string().contains("unknown delete task"));
    }

    #[test]
    fn test_corrupted_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        std::fs::write(&path, b"not json").unwrap();
        assert!(DeleteTasks::open(Some(path)).is_err());
    }
}
