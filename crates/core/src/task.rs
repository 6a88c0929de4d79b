//! Batch task data model and lifecycle state machine.
//!
//! A [`Task`] is one batch job: every configured template rendered against
//! every data row. The scheduler owns task records exclusively and mutates
//! them only through the transitions declared here.
//!
//! ```text
//! pending --start--> processing --all units settled--> completed
//!                    processing --structural failure--> failed
//!                    processing <--pause/resume--> paused
//!        processing | paused --cancel--> cancelled
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::data_source::{DataSource, DataSourceInfo};
use crate::error::CoreError;
use crate::types::{TaskId, TemplateId, Timestamp};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal tasks accept no further control calls and their counters
    /// are frozen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-initiated lifecycle actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskAction {
    Start,
    Pause,
    Resume,
    Cancel,
}

impl TaskAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Cancel => "cancel",
        }
    }

    /// Statuses from which this action is legal.
    pub fn allowed_from(&self) -> &'static [TaskStatus] {
        match self {
            Self::Start => &[TaskStatus::Pending],
            Self::Pause => &[TaskStatus::Processing],
            Self::Resume => &[TaskStatus::Paused],
            Self::Cancel => &[TaskStatus::Processing, TaskStatus::Paused],
        }
    }
}

/// How units of one task are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    /// One unit at a time, completing in submission order.
    #[default]
    Sequential,
    /// Units are submitted to the global concurrency gate; completion order
    /// is unspecified.
    Parallel,
}

/// Ordering of waiters at the global concurrency gate.
///
/// Declaration order is significant: later variants win.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Docx,
    Pdf,
    Html,
    Txt,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Docx => "docx",
            Self::Pdf => "pdf",
            Self::Html => "html",
            Self::Txt => "txt",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStage {
    #[default]
    Initializing,
    LoadingData,
    ValidatingTemplates,
    GeneratingDocuments,
    Finalizing,
}

impl GenerationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::LoadingData => "loading_data",
            Self::ValidatingTemplates => "validating_templates",
            Self::GeneratingDocuments => "generating_documents",
            Self::Finalizing => "finalizing",
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Every per-task option the scheduler recognises.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskOptions {
    /// Retries per unit after the first attempt. `None` uses the scheduler
    /// default.
    pub max_retries: Option<u32>,
    /// In-flight cap for this task in parallel mode. Always additionally
    /// bounded by the global gate.
    pub concurrency: Option<usize>,
    /// When `false`, a unit that exhausts its retries aborts the whole task.
    pub continue_on_error: bool,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            max_retries: None,
            concurrency: None,
            continue_on_error: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfig {
    pub template_ids: Vec<TemplateId>,
    pub data_source: DataSourceInfo,
    pub mode: GenerationMode,
    pub priority: Priority,
    pub output_format: OutputFormat,
    pub options: TaskOptions,
}

// ---------------------------------------------------------------------------
// Execution info
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitCounts {
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionInfo {
    pub current_stage: GenerationStage,
    /// Number of units settled. Units are addressed row-major:
    /// unit `i` is row `i / templates`, template `i % templates`.
    pub current_index: u64,
    pub total_documents: u64,
    pub completed_documents: u64,
    pub failed_documents: u64,
    /// `0` while unknown.
    pub estimated_time_remaining_ms: u64,
    pub per_template: BTreeMap<TemplateId, UnitCounts>,
}

impl ExecutionInfo {
    pub fn settled(&self) -> u64 {
        self.completed_documents + self.failed_documents
    }

    /// Percentage of units settled, `0.0..=100.0`, rounded to two decimals.
    pub fn progress_percent(&self) -> f64 {
        if self.total_documents == 0 {
            return 0.0;
        }
        let raw = self.settled() as f64 / self.total_documents as f64 * 100.0;
        (raw * 100.0).round() / 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskTimestamps {
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub paused_at: Option<Timestamp>,
    pub resumed_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub failed_at: Option<Timestamp>,
    pub cancelled_at: Option<Timestamp>,
}

/// An entry in a task's error list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskError {
    pub code: String,
    pub message: String,
    pub occurred_at: Timestamp,
    /// Unit the error belongs to, if any.
    pub unit_index: Option<u64>,
}

impl TaskError {
    pub fn from_core(err: &CoreError, unit_index: Option<u64>) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            occurred_at: chrono::Utc::now(),
            unit_index,
        }
    }
}

/// Final counters reported with a completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub duration_ms: u64,
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub status: TaskStatus,
    pub config: TaskConfig,
    pub execution: ExecutionInfo,
    pub timestamps: TaskTimestamps,
    pub errors: Vec<TaskError>,
}

impl Task {
    /// Create a pending task with `total_documents` units.
    pub fn new(id: TaskId, config: TaskConfig, total_documents: u64) -> Self {
        let per_template = config
            .template_ids
            .iter()
            .map(|id| (id.clone(), UnitCounts::default()))
            .collect();

        Self {
            id,
            status: TaskStatus::Pending,
            config,
            execution: ExecutionInfo {
                total_documents,
                per_template,
                ..Default::default()
            },
            timestamps: TaskTimestamps {
                created_at: chrono::Utc::now(),
                started_at: None,
                paused_at: None,
                resumed_at: None,
                completed_at: None,
                failed_at: None,
                cancelled_at: None,
            },
            errors: Vec::new(),
        }
    }

    /// Fail with [`CoreError::TaskStatus`] unless `action` is legal from the
    /// current status. Never mutates.
    pub fn check(&self, action: TaskAction) -> Result<(), CoreError> {
        if action.allowed_from().contains(&self.status) {
            Ok(())
        } else {
            Err(CoreError::TaskStatus {
                task_id: self.id.clone(),
                current: self.status,
                action: action.as_str(),
            })
        }
    }

    pub fn progress_percent(&self) -> f64 {
        self.execution.progress_percent()
    }

    /// Record the outcome of one unit. Ignored once the task is terminal.
    pub fn record_unit(&mut self, template_id: &str, success: bool) {
        if self.status.is_terminal() {
            return;
        }
        let counts = self
            .execution
            .per_template
            .entry(template_id.to_string())
            .or_default();
        if success {
            counts.completed += 1;
            self.execution.completed_documents += 1;
        } else {
            counts.failed += 1;
            self.execution.failed_documents += 1;
        }
    }

    pub fn summary(&self) -> TaskSummary {
        let end = self
            .timestamps
            .completed_at
            .or(self.timestamps.failed_at)
            .or(self.timestamps.cancelled_at)
            .unwrap_or_else(chrono::Utc::now);
        let duration_ms = self
            .timestamps
            .started_at
            .map(|start| (end - start).num_milliseconds().max(0) as u64)
            .unwrap_or(0);

        TaskSummary {
            total: self.execution.total_documents,
            successful: self.execution.completed_documents,
            failed: self.execution.failed_documents,
            duration_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    #[validate(length(
        min = 1,
        max = 100,
        message = "templateIds must contain between 1 and 100 entries"
    ))]
    pub template_ids: Vec<TemplateId>,
    pub data_source: DataSource,
    #[serde(default)]
    pub mode: GenerationMode,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default)]
    pub options: TaskOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskResponse {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub estimated_duration_ms: u64,
    pub estimated_document_count: u64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
