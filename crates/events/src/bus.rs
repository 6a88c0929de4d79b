//! Scheduler-to-broadcaster event channel backed by `tokio::sync::mpsc`.
//!
//! One logical producer (the scheduler, through any number of cloned
//! [`EventBus`] handles) and exactly one consumer ([`EventStream`]). The channel
//! is unbounded so publishing never blocks a scheduler loop and no lifecycle
//! event is ever lost to lag; the consumer coalesces progress on its side.

use chrono::{DateTime, Utc};
use docbatch_core::task::Task;
use docbatch_core::types::TaskId;
use serde::Serialize;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// TaskEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventKind {
    Started,
    Progress,
    Paused,
    Resumed,
    Cancelled,
    Completed,
    Failed,
}

impl TaskEventKind {
    /// Completed, failed and cancelled end the task's event sequence.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// A lifecycle event carrying the full task snapshot at the time it occurred.
#[derive(Debug, Clone, Serialize)]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub kind: TaskEventKind,
    pub task: Task,
    pub timestamp: DateTime<Utc>,
}

impl TaskEvent {
    pub fn new(kind: TaskEventKind, task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            kind,
            task: task.clone(),
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Producer handle. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: mpsc::UnboundedSender<TaskEvent>,
}

/// The single consuming end of an [`EventBus`].
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<TaskEvent>,
}

impl EventBus {
    /// Create a connected bus and stream.
    pub fn new() -> (Self, EventStream) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, EventStream { receiver })
    }

    /// Publish an event to the consumer.
    ///
    /// If the consumer has gone away the event is dropped.
    pub fn publish(&self, event: TaskEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("Task event dropped, no consumer");
        }
    }
}

impl EventStream {
    /// Next event, or `None` once every [`EventBus`] handle is dropped.
    pub async fn recv(&mut self) -> Option<TaskEvent> {
        self.receiver.recv().await
    }

    /// Next event if one is immediately available.
    pub fn try_recv(&mut self) -> Option<TaskEvent> {
        self.receiver.try_recv().ok()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use docbatch_core::data_source::{DataSourceInfo, DataSourceKind};
    use docbatch_core::task::{
        GenerationMode, OutputFormat, Priority, TaskConfig, TaskOptions, TaskStatus,
    };

    use super::*;

    fn task(id: &str) -> Task {
        Task::new(
            id.into(),
            TaskConfig {
                template_ids: vec!["t1".into()],
                data_source: DataSourceInfo {
                    kind: DataSourceKind::Inline,
                    row_count: 1,
                },
                mode: GenerationMode::Sequential,
                priority: Priority::Normal,
                output_format: OutputFormat::Txt,
                options: TaskOptions::default(),
            },
            1,
        )
    }

    #[tokio::test]
    async fn publish_and_receive_in_order() {
        let (bus, mut stream) = EventBus::new();

        bus.publish(TaskEvent::new(TaskEventKind::Started, &task("task_1")));
        bus.clone()
            .publish(TaskEvent::new(TaskEventKind::Progress, &task("task_1")));

        let first = stream.recv().await.expect("should receive started");
        assert_eq!(first.kind, TaskEventKind::Started);
        assert_eq!(first.task_id, "task_1");
        assert_eq!(first.task.status, TaskStatus::Pending);

        let second = stream.recv().await.expect("should receive progress");
        assert_eq!(second.kind, TaskEventKind::Progress);
    }

    #[tokio::test]
    async fn stream_ends_when_all_producers_drop() {
        let (bus, mut stream) = EventBus::new();
        let other = bus.clone();
        drop(bus);
        other.publish(TaskEvent::new(TaskEventKind::Completed, &task("task_2")));
        drop(other);

        assert!(stream.recv().await.is_some());
        assert!(stream.recv().await.is_none());
    }

    #[test]
    fn publish_without_consumer_does_not_panic() {
        let (bus, stream) = EventBus::new();
        drop(stream);
        bus.publish(TaskEvent::new(TaskEventKind::Failed, &task("task_3")));
    }

    #[test]
    fn terminal_kinds() {
        assert!(TaskEventKind::Completed.is_terminal());
        assert!(TaskEventKind::Cancelled.is_terminal());
        assert!(!TaskEventKind::Paused.is_terminal());
        assert!(!TaskEventKind::Progress.is_terminal());
    }
}
