//! Collaborator interfaces consumed by the scheduler.
//!
//! [`TemplateManager`] resolves template ids, [`DocumentGenerator`] renders one
//! template against one data row, and [`ResultStore`] keeps the generated
//! documents. All three are trait objects injected at construction time so
//! the scheduler can be driven by scripted implementations in tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::CoreError;
use crate::task::OutputFormat;
use crate::types::{DocumentId, Row, TaskId, TemplateId, Timestamp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    pub name: String,
    pub content: String,
}

#[async_trait]
pub trait TemplateManager: Send + Sync {
    /// `Ok(None)` when the id is unknown.
    async fn get_template(&self, id: &str) -> Result<Option<Arc<Template>>, CoreError>;
}

#[async_trait]
pub trait DocumentGenerator: Send + Sync {
    /// Render `template` against `row`. Failures must be returned as
    /// [`CoreError::Generation`], never swallowed.
    async fn generate(&self, template: &Template, row: &Row) -> Result<Vec<u8>, CoreError>;
}

/// One generated document as handed to the [`ResultStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub id: DocumentId,
    pub task_id: TaskId,
    pub template_id: TemplateId,
    pub row_index: u64,
    pub format: OutputFormat,
    pub size_bytes: u64,
    pub created_at: Timestamp,
    #[serde(skip)]
    pub content: Vec<u8>,
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn save(&self, record: DocumentRecord) -> Result<(), CoreError>;

    /// Records for `task_id` in the order they were saved.
    async fn list(&self, task_id: &str) -> Result<Vec<DocumentRecord>, CoreError>;
}

/// Process-local [`ResultStore`].
#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    records: RwLock<HashMap<TaskId, Vec<DocumentRecord>>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn save(&self, record: DocumentRecord) -> Result<(), CoreError> {
        self.records
            .write()
            .await
            .entry(record.task_id.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn list(&self, task_id: &str) -> Result<Vec<DocumentRecord>, CoreError> {
        Ok(self
            .records
            .read()
            .await
            .get(task_id)
            .cloned()
            .unwrap_or_default())
    }
}
