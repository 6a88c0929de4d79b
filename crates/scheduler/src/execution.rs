//! The per-task execution loop.
//!
//! One run covers the units from `current_index` up to the total, or until a
//! pause or cancel request is observed, or until a structural failure aborts
//! the task. Each run re-resolves the task's templates first. Units settle
//! through a single store update each, which also emits throttled progress.
//! The unit that completes the task, or that aborts it, moves the task to its
//! terminal status in that same update. Units still in flight after an abort
//! are not counted. The `stopped` flag is released by `finalize` once the run
//! has drained.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use docbatch_core::error::CoreError;
use docbatch_core::estimation::{effective_concurrency, remaining_ms};
use docbatch_core::generation::Template;
use docbatch_core::task::{
    GenerationMode, GenerationStage, OutputFormat, Priority, Task, TaskError, TaskStatus,
};
use docbatch_core::types::{Row, TaskId, TemplateId};
use docbatch_events::{TaskEvent, TaskEventKind};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::control::{Signal, TaskControl};
use crate::scheduler::SchedulerInner;
use crate::worker::{RetryPolicy, Unit, UnitOutcome};

/// Unit failures kept in a task's error list; later ones are only counted.
const MAX_RECORDED_UNIT_ERRORS: usize = 100;

#[derive(Debug)]
enum RunEnd {
    Finished,
    Paused,
    Cancelled,
    Aborted(CoreError),
}

impl From<Signal> for RunEnd {
    fn from(signal: Signal) -> Self {
        match signal {
            Signal::Pause => Self::Paused,
            // `Run` never escapes `TaskControl::interrupted`.
            Signal::Cancel | Signal::Run => Self::Cancelled,
        }
    }
}

/// Decides when a progress event is due: every `every` units or once
/// `interval` has elapsed since the last one, whichever comes first.
///
/// Both triggers are evaluated when a unit settles; a run with no settled
/// units has no new counts to report.
struct ProgressEmitter {
    every: u64,
    interval: Duration,
    since_emit: u64,
    last_emit: Instant,
    run_started: Instant,
    settled_in_run: u64,
}

impl ProgressEmitter {
    fn new(every: u64, interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            every: every.max(1),
            interval,
            since_emit: 0,
            last_emit: now,
            run_started: now,
            settled_in_run: 0,
        }
    }

    fn settle(&mut self) -> bool {
        self.settled_in_run += 1;
        self.since_emit += 1;
        if self.since_emit >= self.every || self.last_emit.elapsed() >= self.interval {
            self.since_emit = 0;
            self.last_emit = Instant::now();
            true
        } else {
            false
        }
    }

    fn eta_ms(&self, remaining_units: u64) -> u64 {
        let elapsed = self.run_started.elapsed().as_millis() as u64;
        remaining_ms(self.settled_in_run, elapsed, remaining_units).unwrap_or(0)
    }
}

struct TaskRun {
    inner: Arc<SchedulerInner>,
    task_id: TaskId,
    control: Arc<TaskControl>,
    rows: Arc<Vec<Row>>,
    templates: Vec<Arc<Template>>,
    mode: GenerationMode,
    priority: Priority,
    format: OutputFormat,
    policy: RetryPolicy,
    continue_on_error: bool,
    concurrency: usize,
    total: u64,
    /// Units settled, equal to the task's `current_index`.
    settled: u64,
    /// Set once a unit failure has failed the task.
    aborted: bool,
    progress: ProgressEmitter,
}

/// Entry point spawned by the scheduler for every start or resume.
pub(crate) async fn run(inner: Arc<SchedulerInner>, task_id: TaskId) {
    match TaskRun::prepare(Arc::clone(&inner), &task_id).await {
        Ok(mut run) => {
            let end = match run.mode {
                GenerationMode::Sequential => run.run_sequential().await,
                GenerationMode::Parallel => run.run_parallel().await,
            };
            finalize(&inner, &task_id, end, Some(run.settled)).await;
        }
        Err(e) => finalize(&inner, &task_id, RunEnd::Aborted(e), None).await,
    }
}

impl TaskRun {
    async fn prepare(inner: Arc<SchedulerInner>, task_id: &str) -> Result<Self, CoreError> {
        let task = inner.store.get(task_id).await?;
        let (rows, control) = inner.store.handles(task_id).await?;

        set_stage(&inner, task_id, GenerationStage::LoadingData).await;
        let expected = task.config.template_ids.len() as u64 * rows.len() as u64;
        if rows.is_empty() || expected != task.execution.total_documents {
            return Err(CoreError::Structural(format!(
                "data source yields {} rows, task expects {} documents",
                rows.len(),
                task.execution.total_documents
            )));
        }

        set_stage(&inner, task_id, GenerationStage::ValidatingTemplates).await;
        let mut templates = Vec::with_capacity(task.config.template_ids.len());
        for id in &task.config.template_ids {
            match inner.templates.get_template(id).await {
                Ok(Some(t)) => templates.push(t),
                Ok(None) => {
                    return Err(CoreError::Structural(format!("Template not found: {id}")))
                }
                Err(e) => {
                    return Err(CoreError::Structural(format!(
                        "Template {id} could not be loaded: {e}"
                    )))
                }
            }
        }

        set_stage(&inner, task_id, GenerationStage::GeneratingDocuments).await;

        let config = &inner.config;
        let options = &task.config.options;
        let policy = RetryPolicy {
            max_retries: options.max_retries.unwrap_or(config.default_max_retries),
            base_delay: config.retry_base_delay,
            max_delay: config.retry_max_delay,
        };
        let concurrency = effective_concurrency(
            task.config.mode,
            options.concurrency,
            inner.gate.capacity(),
        );
        let progress = ProgressEmitter::new(config.progress_every_units, config.progress_interval);

        Ok(Self {
            task_id: task_id.to_string(),
            control,
            rows,
            templates,
            mode: task.config.mode,
            priority: task.config.priority,
            format: task.config.output_format,
            policy,
            continue_on_error: options.continue_on_error,
            concurrency,
            total: task.execution.total_documents,
            settled: task.execution.current_index,
            aborted: false,
            progress,
            inner,
        })
    }

    /// Unit `index` is row `index / |templates|`, template `index % |templates|`.
    fn unit(&self, index: u64) -> Unit {
        let width = self.templates.len() as u64;
        Unit {
            task_id: self.task_id.clone(),
            index,
            row_index: index / width,
            template: Arc::clone(&self.templates[(index % width) as usize]),
            rows: Arc::clone(&self.rows),
            format: self.format,
        }
    }

    async fn run_sequential(&mut self) -> RunEnd {
        while self.settled < self.total {
            match self.control.signal() {
                Signal::Run => {}
                signal => return signal.into(),
            }

            let permit = tokio::select! {
                biased;
                signal = self.control.interrupted() => return signal.into(),
                permit = self.inner.gate.acquire(self.priority) => match permit {
                    Ok(p) => p,
                    Err(e) => return RunEnd::Aborted(e),
                },
            };

            let unit = self.unit(self.settled);
            let outcome = self
                .inner
                .worker
                .execute(&unit, &self.policy, &self.control)
                .await;
            drop(permit);

            if let Err(e) = self.settle(&unit, outcome).await {
                return RunEnd::Aborted(e);
            }
        }
        RunEnd::Finished
    }

    async fn run_parallel(&mut self) -> RunEnd {
        let mut in_flight: JoinSet<(Unit, UnitOutcome)> = JoinSet::new();
        let mut next = self.settled;
        let mut end: Option<RunEnd> = None;

        loop {
            if end.is_none() {
                match self.control.signal() {
                    Signal::Run => {}
                    signal => end = Some(signal.into()),
                }
            }

            if end.is_none() && next < self.total && in_flight.len() < self.concurrency {
                tokio::select! {
                    biased;
                    signal = self.control.interrupted() => {
                        end = Some(signal.into());
                    }
                    Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                        if let Some(abort) = self.settle_joined(joined).await {
                            end = Some(abort);
                        }
                    }
                    permit = self.inner.gate.acquire(self.priority) => match permit {
                        Ok(permit) => {
                            let unit = self.unit(next);
                            next += 1;
                            let worker = self.inner.worker.clone();
                            let policy = self.policy.clone();
                            let control = Arc::clone(&self.control);
                            in_flight.spawn(async move {
                                let outcome = worker.execute(&unit, &policy, &control).await;
                                drop(permit);
                                (unit, outcome)
                            });
                        }
                        Err(e) => end = Some(RunEnd::Aborted(e)),
                    },
                }
                continue;
            }

            match in_flight.join_next().await {
                Some(joined) => {
                    if let Some(abort) = self.settle_joined(joined).await {
                        if end.is_none() || matches!(end, Some(RunEnd::Paused)) {
                            end = Some(abort);
                        }
                    }
                }
                None => break,
            }
        }

        match end {
            // Every unit settled while draining: nothing left to pause or cancel.
            Some(RunEnd::Paused | RunEnd::Cancelled) | None
                if self.settled >= self.total && !self.aborted =>
            {
                RunEnd::Finished
            }
            Some(end) => end,
            None => RunEnd::Finished,
        }
    }

    async fn settle_joined(
        &mut self,
        joined: Result<(Unit, UnitOutcome), tokio::task::JoinError>,
    ) -> Option<RunEnd> {
        match joined {
            Ok((unit, outcome)) => self.settle(&unit, outcome).await.err().map(RunEnd::Aborted),
            Err(e) => {
                tracing::error!(task_id = %self.task_id, error = %e, "Unit task panicked");
                Some(RunEnd::Aborted(CoreError::Internal(format!(
                    "unit execution panicked: {e}"
                ))))
            }
        }
    }

    /// Record one unit outcome. Returns an error when the failure aborts the
    /// task; the task is already `failed` in the store by then.
    async fn settle(&mut self, unit: &Unit, outcome: UnitOutcome) -> Result<(), CoreError> {
        if self.aborted {
            tracing::debug!(
                task_id = %self.task_id,
                unit = unit.index,
                "Discarding unit that settled after the task failed",
            );
            return Ok(());
        }

        self.settled += 1;
        let emit = self.progress.settle();
        let eta = self.progress.eta_ms(self.total.saturating_sub(self.settled));
        let settled = self.settled;
        let template_id: TemplateId = unit.template.id.clone();
        let events = self.inner.events.clone();

        let failure = match &outcome {
            UnitOutcome::Completed { .. } => None,
            UnitOutcome::Failed { attempts, error } => {
                tracing::warn!(
                    task_id = %self.task_id,
                    unit = unit.index,
                    attempts,
                    error = %error,
                    "Unit failed",
                );
                Some(error.clone())
            }
        };

        let abort = match &failure {
            Some(error) if !self.continue_on_error => Some(CoreError::Structural(format!(
                "unit {} failed and continueOnError is off: {error}",
                unit.index
            ))),
            _ => None,
        };
        self.aborted = abort.is_some();

        let end = abort.clone().map(RunEnd::Aborted);
        let recorded = failure;
        let unit_index = unit.index;
        let total = self.total;
        let _ = self
            .inner
            .store
            .update(&self.task_id, move |entry| {
                if entry.task.status.is_terminal() {
                    return Ok(());
                }
                let task = &mut entry.task;
                task.record_unit(&template_id, recorded.is_none());
                task.execution.current_index = settled;
                if let Some(error) = &recorded {
                    if task.errors.len() < MAX_RECORDED_UNIT_ERRORS {
                        task.errors.push(TaskError::from_core(error, Some(unit_index)));
                    }
                }

                // Terminal transitions share this update, so a full count is
                // never observed on a non-terminal task.
                if let Some(end) = &end {
                    let kind = apply_end(task, end);
                    events.publish(TaskEvent::new(kind, task));
                } else if settled >= total {
                    let kind = apply_end(task, &RunEnd::Finished);
                    events.publish(TaskEvent::new(kind, task));
                    entry.control.mark_stopped();
                } else if emit {
                    task.execution.estimated_time_remaining_ms = eta;
                    events.publish(TaskEvent::new(TaskEventKind::Progress, task));
                }
                Ok(())
            })
            .await;

        match abort {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

async fn set_stage(inner: &SchedulerInner, task_id: &str, stage: GenerationStage) {
    let _ = inner
        .store
        .update(task_id, |entry| {
            entry.task.execution.current_stage = stage;
            Ok(())
        })
        .await;
}

/// Move the task into the state matching `end`. Returns the event to publish.
fn apply_end(task: &mut Task, end: &RunEnd) -> TaskEventKind {
    let now = Utc::now();
    match end {
        RunEnd::Finished => {
            task.status = TaskStatus::Completed;
            task.execution.current_stage = GenerationStage::Finalizing;
            task.execution.estimated_time_remaining_ms = 0;
            task.timestamps.completed_at = Some(now);
            TaskEventKind::Completed
        }
        RunEnd::Paused => {
            task.status = TaskStatus::Paused;
            task.timestamps.paused_at = Some(now);
            TaskEventKind::Paused
        }
        RunEnd::Cancelled => {
            task.status = TaskStatus::Cancelled;
            task.execution.estimated_time_remaining_ms = 0;
            task.timestamps.cancelled_at = Some(now);
            TaskEventKind::Cancelled
        }
        RunEnd::Aborted(error) => {
            task.status = TaskStatus::Failed;
            task.execution.estimated_time_remaining_ms = 0;
            task.timestamps.failed_at = Some(now);
            task.errors.push(TaskError::from_core(error, None));
            TaskEventKind::Failed
        }
    }
}

/// Write the run's final state, publish the matching event and release
/// `wait_idle` callers, all under one store update.
async fn finalize(inner: &SchedulerInner, task_id: &str, mut end: RunEnd, settled: Option<u64>) {
    let events = inner.events.clone();
    let result = inner
        .store
        .update(task_id, |entry| {
            // Completed or failed by a unit's own update.
            if entry.task.status.is_terminal() {
                entry.control.mark_stopped();
                return Ok(None);
            }
            // A cancel that raced the pause yield still wins.
            if matches!(end, RunEnd::Paused) && entry.control.is_cancelled() {
                end = RunEnd::Cancelled;
            }
            if let Some(settled) = settled {
                entry.task.execution.current_index = settled;
            }

            let kind = apply_end(&mut entry.task, &end);
            events.publish(TaskEvent::new(kind, &entry.task));
            entry.control.mark_stopped();
            Ok(Some(kind))
        })
        .await;

    match (result, end) {
        (Ok(_), RunEnd::Aborted(error)) => {
            tracing::error!(task_id = %task_id, error = %error, "Task failed");
        }
        (Ok(Some(kind)), _) => {
            tracing::info!(task_id = %task_id, outcome = ?kind, "Task run ended");
        }
        (Ok(None), _) => {
            tracing::info!(task_id = %task_id, "Task settled by its final unit");
        }
        (Err(e), _) => {
            tracing::error!(task_id = %task_id, error = %e, "Task vanished before finalize");
        }
    }
}
