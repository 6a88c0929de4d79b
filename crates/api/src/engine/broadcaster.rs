//! Scheduler event to WebSocket room fan-out.
//!
//! [`ProgressBroadcaster`] consumes the scheduler's [`EventStream`] and keeps
//! the last state it sent for each task. Progress events are diffed against
//! that state and suppressed when nothing moved by at least the configured
//! threshold; the rest are queued and flushed on a timer, at most
//! `batch_size` tasks per tick. Paused, cancelled, completed and failed
//! events skip the queue: the task's final diff and its lifecycle message are
//! sent immediately.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use docbatch_core::messages::{
    task_room, MSG_TYPE_GENERATION_STATUS, MSG_TYPE_TASK_CANCELLED, MSG_TYPE_TASK_COMPLETED,
    MSG_TYPE_TASK_FAILED, MSG_TYPE_TASK_PAUSED, MSG_TYPE_TASK_PROGRESS, MSG_TYPE_TASK_STARTED,
};
use docbatch_core::progress::{diff, is_significant, ProgressState, ProgressUpdate};
use docbatch_core::task::{Task, UnitCounts};
use docbatch_core::types::{TaskId, TemplateId};
use docbatch_events::{EventStream, TaskEvent, TaskEventKind};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::json;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::BroadcastConfig;
use crate::ws::protocol::WsEnvelope;
use crate::ws::RoomRouter;

/// What has already been sent for one task.
#[derive(Debug, Default)]
struct Sent {
    state: Option<ProgressState>,
    templates: BTreeMap<TemplateId, UnitCounts>,
}

impl Sent {
    /// Messages bringing a client from `self` up to `task`, updating `self`.
    fn advance(&mut self, task: &Task) -> Vec<WsEnvelope> {
        let mut out = Vec::with_capacity(2);

        let next = ProgressState::from_task(task);
        let changes = diff(self.state.as_ref(), &next);
        if !changes.is_empty() {
            out.push(WsEnvelope::new(
                MSG_TYPE_TASK_PROGRESS,
                ProgressUpdate {
                    task_id: task.id.clone(),
                    diff: changes,
                },
            ));
        }
        self.state = Some(next);

        let templates: Vec<TemplateStatus> = task
            .execution
            .per_template
            .iter()
            .filter(|(id, counts)| self.templates.get(*id) != Some(counts))
            .map(|(id, counts)| TemplateStatus {
                template_id: id.clone(),
                completed: counts.completed,
                failed: counts.failed,
            })
            .collect();
        if !templates.is_empty() {
            out.push(WsEnvelope::new(
                MSG_TYPE_GENERATION_STATUS,
                json!({ "taskId": task.id, "templates": templates }),
            ));
        }
        self.templates = task.execution.per_template.clone();

        out
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct TemplateStatus {
    template_id: TemplateId,
    completed: u64,
    failed: u64,
}

#[derive(Debug, Default)]
struct BroadcastState {
    sent: HashMap<TaskId, Sent>,
    /// Latest unsent snapshot per task, in first-queued order.
    pending: IndexMap<TaskId, Task>,
}

#[derive(Debug, Default)]
struct Counters {
    events_received: AtomicU64,
    progress_queued: AtomicU64,
    progress_suppressed: AtomicU64,
    flushes: AtomicU64,
    messages_sent: AtomicU64,
    deliveries: AtomicU64,
}

/// Point-in-time broadcaster counters for `GET /ws/stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcasterStats {
    pub events_received: u64,
    pub progress_queued: u64,
    pub progress_suppressed: u64,
    pub flushes: u64,
    /// Messages sent to rooms.
    pub messages_sent: u64,
    /// Messages queued on individual connections.
    pub deliveries: u64,
    pub pending_tasks: usize,
    pub tracked_tasks: usize,
}

pub struct ProgressBroadcaster {
    rooms: Arc<RoomRouter>,
    config: BroadcastConfig,
    state: Mutex<BroadcastState>,
    counters: Counters,
}

impl ProgressBroadcaster {
    pub fn new(rooms: Arc<RoomRouter>, config: BroadcastConfig) -> Self {
        Self {
            rooms,
            config,
            state: Mutex::new(BroadcastState::default()),
            counters: Counters::default(),
        }
    }

    /// Consume scheduler events until the stream closes or `cancel` fires.
    pub async fn run(&self, mut events: EventStream, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Progress broadcaster stopping");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        tracing::info!("Event stream closed, progress broadcaster shutting down");
                        while self.flush().await > 0 {}
                        break;
                    }
                },
                _ = ticker.tick() => {
                    self.flush().await;
                }
            }
        }
    }

    pub async fn handle_event(&self, event: TaskEvent) {
        self.counters.events_received.fetch_add(1, Ordering::Relaxed);
        let TaskEvent { task_id, kind, task, .. } = event;

        match kind {
            TaskEventKind::Started => {
                self.enqueue(task.clone());
                let payload = json!({
                    "taskId": task_id,
                    "totalDocuments": task.execution.total_documents,
                    "mode": task.config.mode,
                    "priority": task.config.priority,
                    "startedAt": task.timestamps.started_at,
                });
                self.send(&task_id, vec![WsEnvelope::new(MSG_TYPE_TASK_STARTED, payload)])
                    .await;
            }
            TaskEventKind::Progress | TaskEventKind::Resumed => {
                let queued = {
                    let mut state = self.lock();
                    let next = ProgressState::from_task(&task);
                    let prev = state.sent.get(&task_id).and_then(|s| s.state.as_ref());
                    if state.pending.contains_key(&task_id)
                        || is_significant(prev, &next, self.config.min_change_threshold)
                    {
                        state.pending.insert(task_id.clone(), task);
                        true
                    } else {
                        false
                    }
                };
                if queued {
                    self.counters.progress_queued.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.counters
                        .progress_suppressed
                        .fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(task_id = %task_id, "Progress change below threshold, suppressed");
                }
            }
            TaskEventKind::Paused
            | TaskEventKind::Cancelled
            | TaskEventKind::Completed
            | TaskEventKind::Failed => {
                let mut messages = {
                    let mut state = self.lock();
                    state.pending.shift_remove(&task_id);
                    let messages = state.sent.entry(task_id.clone()).or_default().advance(&task);
                    if kind.is_terminal() {
                        state.sent.remove(&task_id);
                    }
                    messages
                };
                messages.push(lifecycle_message(kind, &task));
                self.send(&task_id, messages).await;
            }
        }
    }

    /// Send up to `batch_size` queued task diffs. Returns how many tasks
    /// were flushed.
    pub async fn flush(&self) -> usize {
        let batch: Vec<(TaskId, Vec<WsEnvelope>)> = {
            let mut state = self.lock();
            let n = self.config.batch_size.min(state.pending.len());
            let tasks: Vec<(TaskId, Task)> = state.pending.drain(..n).collect();
            tasks
                .into_iter()
                .map(|(id, task)| {
                    let messages = state.sent.entry(id.clone()).or_default().advance(&task);
                    (id, messages)
                })
                .collect()
        };
        if batch.is_empty() {
            return 0;
        }

        self.counters.flushes.fetch_add(1, Ordering::Relaxed);
        let flushed = batch.len();
        for (task_id, messages) in batch {
            self.send(&task_id, messages).await;
        }
        flushed
    }

    pub fn stats(&self) -> BroadcasterStats {
        let (pending_tasks, tracked_tasks) = {
            let state = self.lock();
            (state.pending.len(), state.sent.len())
        };
        let c = &self.counters;
        BroadcasterStats {
            events_received: c.events_received.load(Ordering::Relaxed),
            progress_queued: c.progress_queued.load(Ordering::Relaxed),
            progress_suppressed: c.progress_suppressed.load(Ordering::Relaxed),
            flushes: c.flushes.load(Ordering::Relaxed),
            messages_sent: c.messages_sent.load(Ordering::Relaxed),
            deliveries: c.deliveries.load(Ordering::Relaxed),
            pending_tasks,
            tracked_tasks,
        }
    }

    fn enqueue(&self, task: Task) {
        self.lock().pending.insert(task.id.clone(), task);
        self.counters.progress_queued.fetch_add(1, Ordering::Relaxed);
    }

    async fn send(&self, task_id: &str, messages: Vec<WsEnvelope>) {
        let room = task_room(task_id);
        for message in messages {
            let delivered = self.rooms.send_to_room(&room, message.into_message()).await;
            self.counters.messages_sent.fetch_add(1, Ordering::Relaxed);
            self.counters
                .deliveries
                .fetch_add(delivered as u64, Ordering::Relaxed);
        }
    }

    fn lock(&self) -> MutexGuard<'_, BroadcastState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Full current state of a task as `task_progress` plus `generation_status`,
/// for a client that has seen nothing yet.
pub fn snapshot_messages(task: &Task) -> Vec<WsEnvelope> {
    Sent::default().advance(task)
}

fn lifecycle_message(kind: TaskEventKind, task: &Task) -> WsEnvelope {
    let exec = &task.execution;
    let ts = &task.timestamps;
    match kind {
        TaskEventKind::Paused => WsEnvelope::new(
            MSG_TYPE_TASK_PAUSED,
            json!({
                "taskId": task.id,
                "currentIndex": exec.current_index,
                "completedDocuments": exec.completed_documents,
                "failedDocuments": exec.failed_documents,
                "pausedAt": ts.paused_at,
            }),
        ),
        TaskEventKind::Cancelled => WsEnvelope::new(
            MSG_TYPE_TASK_CANCELLED,
            json!({
                "taskId": task.id,
                "completedDocuments": exec.completed_documents,
                "failedDocuments": exec.failed_documents,
                "cancelledAt": ts.cancelled_at,
            }),
        ),
        TaskEventKind::Failed => WsEnvelope::new(
            MSG_TYPE_TASK_FAILED,
            json!({
                "taskId": task.id,
                "error": task.errors.last(),
                "completedDocuments": exec.completed_documents,
                "failedDocuments": exec.failed_documents,
                "failedAt": ts.failed_at,
            }),
        ),
        _ => WsEnvelope::new(
            MSG_TYPE_TASK_COMPLETED,
            json!({
                "taskId": task.id,
                "summary": task.summary(),
                "completedAt": ts.completed_at,
            }),
        ),
    }
}
