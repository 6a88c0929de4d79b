//! In-memory task registry.
//!
//! Every mutation of a task record goes through [`TaskStore::update`] under a
//! single write lock, so counters are never observed half-written. The store
//! never calls into another shared structure while holding its lock, apart
//! from the non-blocking event publish and control flags done by callers
//! inside the closure.

use std::collections::HashMap;
use std::sync::Arc;

use docbatch_core::error::CoreError;
use docbatch_core::task::Task;
use docbatch_core::types::{Row, TaskId};
use tokio::sync::RwLock;

use crate::control::TaskControl;

/// A task record plus the run-time state kept beside it.
#[derive(Debug)]
pub struct TaskEntry {
    pub task: Task,
    /// Parsed data rows; shared read-only with execution runs.
    pub rows: Arc<Vec<Row>>,
    pub control: Arc<TaskControl>,
}

#[derive(Debug, Default)]
pub struct TaskStore {
    entries: RwLock<HashMap<TaskId, TaskEntry>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, task: Task, rows: Vec<Row>) {
        let entry = TaskEntry {
            task,
            rows: Arc::new(rows),
            control: Arc::new(TaskControl::new()),
        };
        self.entries
            .write()
            .await
            .insert(entry.task.id.clone(), entry);
    }

    /// Snapshot of one task.
    pub async fn get(&self, id: &str) -> Result<Task, CoreError> {
        self.entries
            .read()
            .await
            .get(id)
            .map(|e| e.task.clone())
            .ok_or_else(|| CoreError::TaskNotFound(id.to_string()))
    }

    /// Snapshots of every task, oldest first.
    pub async fn list(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .entries
            .read()
            .await
            .values()
            .map(|e| e.task.clone())
            .collect();
        tasks.sort_by(|a, b| {
            a.timestamps
                .created_at
                .cmp(&b.timestamps.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        tasks
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Shared run-time handles for a task.
    pub async fn handles(&self, id: &str) -> Result<(Arc<Vec<Row>>, Arc<TaskControl>), CoreError> {
        self.entries
            .read()
            .await
            .get(id)
            .map(|e| (Arc::clone(&e.rows), Arc::clone(&e.control)))
            .ok_or_else(|| CoreError::TaskNotFound(id.to_string()))
    }

    /// Run `f` against the entry under the write lock.
    ///
    /// If `f` returns an error the closure is expected to have left the entry
    /// untouched.
    pub async fn update<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut TaskEntry) -> Result<R, CoreError>,
    ) -> Result<R, CoreError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| CoreError::TaskNotFound(id.to_string()))?;
        f(entry)
    }
}
