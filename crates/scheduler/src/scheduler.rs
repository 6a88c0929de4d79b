//! Task lifecycle facade.
//!
//! [`Scheduler`] is constructed once with its collaborators and handed to the
//! REST controller by value (it is a cheap clone over shared state). Every
//! control call validates the transition against the current status under the
//! store lock; an illegal call fails with [`CoreError::TaskStatus`] and leaves
//! the record untouched.

use std::sync::Arc;

use chrono::Utc;
use docbatch_core::error::CoreError;
use docbatch_core::estimation::{effective_concurrency, estimate_duration_ms};
use docbatch_core::generation::{
    DocumentGenerator, DocumentRecord, ResultStore, TemplateManager,
};
use docbatch_core::task::{
    CreateTaskRequest, CreateTaskResponse, GenerationStage, Task, TaskAction, TaskConfig,
    TaskStatus,
};
use docbatch_core::types::new_task_id;
use docbatch_events::{EventBus, TaskEvent, TaskEventKind};
use validator::Validate;

use crate::config::SchedulerConfig;
use crate::execution;
use crate::gate::ConcurrencyGate;
use crate::store::TaskStore;
use crate::worker::GenerationWorker;

pub(crate) struct SchedulerInner {
    pub(crate) config: SchedulerConfig,
    pub(crate) store: TaskStore,
    pub(crate) gate: ConcurrencyGate,
    pub(crate) worker: GenerationWorker,
    pub(crate) templates: Arc<dyn TemplateManager>,
    pub(crate) results: Arc<dyn ResultStore>,
    pub(crate) events: EventBus,
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        templates: Arc<dyn TemplateManager>,
        generator: Arc<dyn DocumentGenerator>,
        results: Arc<dyn ResultStore>,
        events: EventBus,
    ) -> Self {
        let gate = ConcurrencyGate::new(config.max_concurrency);
        let worker = GenerationWorker::new(generator, Arc::clone(&results));
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                store: TaskStore::new(),
                gate,
                worker,
                templates,
                results,
                events,
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.inner.gate
    }

    /// Validate and register a new pending task.
    pub async fn create_task(
        &self,
        request: CreateTaskRequest,
    ) -> Result<CreateTaskResponse, CoreError> {
        request
            .validate()
            .map_err(|e| CoreError::Validation(e.to_string()))?;
        if request.options.concurrency == Some(0) {
            return Err(CoreError::Validation(
                "options.concurrency must be at least 1".into(),
            ));
        }

        for id in &request.template_ids {
            if self.inner.templates.get_template(id).await?.is_none() {
                return Err(CoreError::Validation(format!("Template not found: {id}")));
            }
        }

        let rows = request.data_source.load()?;
        if rows.is_empty() {
            return Err(CoreError::Validation("Data source has no rows".into()));
        }

        let total = request.template_ids.len() as u64 * rows.len() as u64;
        let concurrency = effective_concurrency(
            request.mode,
            request.options.concurrency,
            self.inner.gate.capacity(),
        );
        let estimated_duration_ms =
            estimate_duration_ms(total, concurrency, self.inner.config.estimated_unit_ms);

        let config = TaskConfig {
            template_ids: request.template_ids,
            data_source: docbatch_core::data_source::DataSourceInfo {
                kind: request.data_source.kind(),
                row_count: rows.len() as u64,
            },
            mode: request.mode,
            priority: request.priority,
            output_format: request.output_format,
            options: request.options,
        };
        let mut task = Task::new(new_task_id(), config, total);
        task.execution.estimated_time_remaining_ms = estimated_duration_ms;
        let task_id = task.id.clone();

        self.inner.store.insert(task, rows).await;
        tracing::info!(task_id = %task_id, total_documents = total, "Task created");

        Ok(CreateTaskResponse {
            task_id,
            status: TaskStatus::Pending,
            estimated_duration_ms,
            estimated_document_count: total,
        })
    }

    /// `pending -> processing`, then launch the execution loop.
    pub async fn start_task(&self, id: &str) -> Result<Task, CoreError> {
        let events = self.inner.events.clone();
        let task = self
            .inner
            .store
            .update(id, |entry| {
                entry.task.check(TaskAction::Start)?;
                entry.task.status = TaskStatus::Processing;
                entry.task.execution.current_stage = GenerationStage::Initializing;
                entry.task.timestamps.started_at = Some(Utc::now());
                entry.control.clear();
                entry.control.mark_running();
                events.publish(TaskEvent::new(TaskEventKind::Started, &entry.task));
                Ok(entry.task.clone())
            })
            .await?;

        tracing::info!(task_id = %id, "Task started");
        self.spawn_run(id);
        Ok(task)
    }

    /// Request a pause. The loop yields after its in-flight units settle;
    /// the returned snapshot is taken at request time.
    pub async fn pause_task(&self, id: &str) -> Result<Task, CoreError> {
        let task = self
            .inner
            .store
            .update(id, |entry| {
                entry.task.check(TaskAction::Pause)?;
                entry.control.request_pause();
                Ok(entry.task.clone())
            })
            .await?;

        tracing::info!(task_id = %id, "Task pause requested");
        Ok(task)
    }

    /// `paused -> processing`, re-entering the loop at `current_index`.
    pub async fn resume_task(&self, id: &str) -> Result<Task, CoreError> {
        let events = self.inner.events.clone();
        let task = self
            .inner
            .store
            .update(id, |entry| {
                entry.task.check(TaskAction::Resume)?;
                entry.task.status = TaskStatus::Processing;
                entry.task.timestamps.resumed_at = Some(Utc::now());
                entry.control.clear();
                entry.control.mark_running();
                events.publish(TaskEvent::new(TaskEventKind::Resumed, &entry.task));
                Ok(entry.task.clone())
            })
            .await?;

        tracing::info!(
            task_id = %id,
            current_index = task.execution.current_index,
            "Task resumed",
        );
        self.spawn_run(id);
        Ok(task)
    }

    /// Cancel a processing or paused task.
    ///
    /// A paused task is cancelled on the spot. A processing task is asked to
    /// stop and reaches `cancelled` once its in-flight units settle.
    pub async fn cancel_task(&self, id: &str) -> Result<Task, CoreError> {
        let events = self.inner.events.clone();
        let task = self
            .inner
            .store
            .update(id, |entry| {
                entry.task.check(TaskAction::Cancel)?;
                entry.control.request_cancel();
                if entry.task.status == TaskStatus::Paused {
                    entry.task.status = TaskStatus::Cancelled;
                    entry.task.timestamps.cancelled_at = Some(Utc::now());
                    entry.task.execution.estimated_time_remaining_ms = 0;
                    events.publish(TaskEvent::new(TaskEventKind::Cancelled, &entry.task));
                }
                Ok(entry.task.clone())
            })
            .await?;

        tracing::info!(task_id = %id, status = %task.status, "Task cancel requested");
        Ok(task)
    }

    /// Read-only snapshot of one task.
    pub async fn get_task_progress(&self, id: &str) -> Result<Task, CoreError> {
        self.inner.store.get(id).await
    }

    pub async fn list_tasks(&self) -> Vec<Task> {
        self.inner.store.list().await
    }

    /// Documents generated for a task so far, in any status.
    pub async fn task_results(&self, id: &str) -> Result<Vec<DocumentRecord>, CoreError> {
        self.inner.store.get(id).await?;
        self.inner.results.list(id).await
    }

    /// Wait until the task has no active execution loop, then return its
    /// settled snapshot.
    pub async fn wait_idle(&self, id: &str) -> Result<Task, CoreError> {
        let (_, control) = self.inner.store.handles(id).await?;
        control.wait_stopped().await;
        self.inner.store.get(id).await
    }

    fn spawn_run(&self, id: &str) {
        let inner = Arc::clone(&self.inner);
        let task_id = id.to_string();
        tokio::spawn(async move {
            execution::run(inner, task_id).await;
        });
    }
}
