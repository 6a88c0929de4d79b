//! Execution of a single template x row unit, with retry.
//!
//! A unit is one attempt to render and store a document. Failed attempts are
//! retried with exponential backoff up to the task's retry budget. A cancel
//! request is observed at each retry boundary: the worker gives up and the
//! unit counts as failed with its last error. Pause requests are not observed
//! here; a paused task finishes its in-flight units first.

use std::sync::Arc;
use std::time::Duration;

use docbatch_core::error::CoreError;
use docbatch_core::generation::{DocumentGenerator, DocumentRecord, ResultStore, Template};
use docbatch_core::task::OutputFormat;
use docbatch_core::types::{new_document_id, Row, TaskId};

use crate::control::TaskControl;

/// Retry budget and backoff for one unit.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): `base * 2^(retry - 1)`,
    /// clamped to `max_delay`.
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// One template x row pair of a task.
#[derive(Debug, Clone)]
pub struct Unit {
    pub task_id: TaskId,
    /// Position in the task's row-major unit order.
    pub index: u64,
    pub row_index: u64,
    pub template: Arc<Template>,
    pub rows: Arc<Vec<Row>>,
    pub format: OutputFormat,
}

impl Unit {
    pub fn row(&self) -> Option<&Row> {
        self.rows.get(self.row_index as usize)
    }
}

#[derive(Debug)]
pub enum UnitOutcome {
    Completed { attempts: u32 },
    Failed { attempts: u32, error: CoreError },
}

#[derive(Clone)]
pub struct GenerationWorker {
    generator: Arc<dyn DocumentGenerator>,
    results: Arc<dyn ResultStore>,
}

impl GenerationWorker {
    pub fn new(generator: Arc<dyn DocumentGenerator>, results: Arc<dyn ResultStore>) -> Self {
        Self { generator, results }
    }

    /// Run `unit` to a settled outcome.
    pub async fn execute(
        &self,
        unit: &Unit,
        policy: &RetryPolicy,
        control: &TaskControl,
    ) -> UnitOutcome {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let error = match self.attempt(unit).await {
                Ok(()) => return UnitOutcome::Completed { attempts },
                Err(e) => e,
            };

            let retry = attempts;
            if retry > policy.max_retries {
                return UnitOutcome::Failed { attempts, error };
            }
            if control.is_cancelled() {
                tracing::debug!(task_id = %unit.task_id, unit = unit.index, "Retry abandoned, task cancelled");
                return UnitOutcome::Failed { attempts, error };
            }

            let delay = policy.delay(retry);
            tracing::warn!(
                task_id = %unit.task_id,
                unit = unit.index,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Unit failed, retrying",
            );

            tokio::select! {
                _ = control.cancelled() => {
                    tracing::debug!(task_id = %unit.task_id, unit = unit.index, "Retry abandoned, task cancelled");
                    return UnitOutcome::Failed { attempts, error };
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn attempt(&self, unit: &Unit) -> Result<(), CoreError> {
        let row = unit.row().ok_or_else(|| {
            CoreError::Internal(format!("row {} out of range", unit.row_index))
        })?;
        let content = self.generator.generate(&unit.template, row).await?;

        let record = DocumentRecord {
            id: new_document_id(),
            task_id: unit.task_id.clone(),
            template_id: unit.template.id.clone(),
            row_index: unit.row_index,
            format: unit.format,
            size_bytes: content.len() as u64,
            created_at: chrono::Utc::now(),
            content,
        };
        self.results.save(record).await
    }
}
