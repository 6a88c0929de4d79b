//! Progress snapshots and field-level diffs.
//!
//! The broadcaster keeps the last [`ProgressState`] it sent for each task and
//! ships only the fields that changed since then. Applying every diff it sent,
//! in order, to [`ProgressState::default`] reproduces the task's state as of
//! the latest flush.

use serde::{Deserialize, Serialize};

use crate::task::{GenerationStage, Task, TaskStatus};
use crate::types::TaskId;

/// Last-broadcast copy of a task's execution info. Used for diffing only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressState {
    pub status: TaskStatus,
    pub current_stage: GenerationStage,
    pub current_index: u64,
    pub total_documents: u64,
    pub completed_documents: u64,
    pub failed_documents: u64,
    pub progress: f64,
    pub estimated_time_remaining_ms: u64,
}

impl Default for ProgressState {
    fn default() -> Self {
        Self {
            status: TaskStatus::Pending,
            current_stage: GenerationStage::Initializing,
            current_index: 0,
            total_documents: 0,
            completed_documents: 0,
            failed_documents: 0,
            progress: 0.0,
            estimated_time_remaining_ms: 0,
        }
    }
}

impl ProgressState {
    pub fn from_task(task: &Task) -> Self {
        let exec = &task.execution;
        Self {
            status: task.status,
            current_stage: exec.current_stage,
            current_index: exec.current_index,
            total_documents: exec.total_documents,
            completed_documents: exec.completed_documents,
            failed_documents: exec.failed_documents,
            progress: exec.progress_percent(),
            estimated_time_remaining_ms: exec.estimated_time_remaining_ms,
        }
    }

    /// Overwrite every field present in `diff`.
    pub fn apply(&mut self, diff: &ProgressDiff) {
        if let Some(v) = diff.status {
            self.status = v;
        }
        if let Some(v) = diff.current_stage {
            self.current_stage = v;
        }
        if let Some(v) = diff.current_index {
            self.current_index = v;
        }
        if let Some(v) = diff.total_documents {
            self.total_documents = v;
        }
        if let Some(v) = diff.completed_documents {
            self.completed_documents = v;
        }
        if let Some(v) = diff.failed_documents {
            self.failed_documents = v;
        }
        if let Some(v) = diff.progress {
            self.progress = v;
        }
        if let Some(v) = diff.estimated_time_remaining_ms {
            self.estimated_time_remaining_ms = v;
        }
    }
}

/// Changed fields only; absent fields are omitted from the wire payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressDiff {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<GenerationStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_index: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_documents: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_documents: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_documents: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time_remaining_ms: Option<u64>,
}

impl ProgressDiff {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// `task_progress` payload: the task id plus the changed fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub task_id: TaskId,
    #[serde(flatten)]
    pub diff: ProgressDiff,
}

fn changed<T: PartialEq + Copy>(prev: Option<T>, next: T) -> Option<T> {
    match prev {
        Some(p) if p == next => None,
        _ => Some(next),
    }
}

/// Fields of `next` that differ from `prev`. With no previous state every
/// field is reported.
pub fn diff(prev: Option<&ProgressState>, next: &ProgressState) -> ProgressDiff {
    ProgressDiff {
        status: changed(prev.map(|p| p.status), next.status),
        current_stage: changed(prev.map(|p| p.current_stage), next.current_stage),
        current_index: changed(prev.map(|p| p.current_index), next.current_index),
        total_documents: changed(prev.map(|p| p.total_documents), next.total_documents),
        completed_documents: changed(
            prev.map(|p| p.completed_documents),
            next.completed_documents,
        ),
        failed_documents: changed(prev.map(|p| p.failed_documents), next.failed_documents),
        progress: changed(prev.map(|p| p.progress), next.progress),
        estimated_time_remaining_ms: changed(
            prev.map(|p| p.estimated_time_remaining_ms),
            next.estimated_time_remaining_ms,
        ),
    }
}

/// Whether `next` is worth broadcasting relative to `prev`.
///
/// A status or stage change always is; otherwise the progress percentage must
/// move by at least `threshold` points, or reach completion of all units.
pub fn is_significant(prev: Option<&ProgressState>, next: &ProgressState, threshold: f64) -> bool {
    let Some(prev) = prev else {
        return true;
    };
    if prev.status != next.status || prev.current_stage != next.current_stage {
        return true;
    }
    if next.total_documents > 0
        && next.completed_documents + next.failed_documents == next.total_documents
        && prev.current_index != next.current_index
    {
        return true;
    }
    (next.progress - prev.progress).abs() >= threshold
}
