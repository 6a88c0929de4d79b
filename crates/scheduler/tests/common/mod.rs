#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use docbatch_core::error::CoreError;
use docbatch_core::generation::{DocumentGenerator, InMemoryResultStore, Template};
use docbatch_core::task::CreateTaskRequest;
use docbatch_core::templates::InMemoryTemplateManager;
use docbatch_core::types::Row;
use docbatch_events::{EventBus, EventStream, TaskEvent};
use docbatch_scheduler::{Scheduler, SchedulerConfig};
use serde_json::{json, Value};
use tokio::sync::Notify;

/// A point where the generator parks until the test releases it.
#[derive(Default)]
pub struct Checkpoint {
    pub reached: Notify,
    pub release: Notify,
}

/// Generator driven by the test.
///
/// Rows may carry `failTimes`: the first `failTimes` attempts for that
/// (template, row) pair fail. Calls are numbered from 1 across the whole
/// generator lifetime; a checkpoint registered for call `n` blocks that call.
#[derive(Default)]
pub struct ScriptedGenerator {
    calls: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    attempts: Mutex<HashMap<String, u64>>,
    checkpoints: Mutex<HashMap<u64, Arc<Checkpoint>>>,
    delay: Mutex<Duration>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        let generator = Self::default();
        *generator.delay.lock().unwrap() = delay;
        generator
    }

    pub fn block_at(&self, call: u64) -> Arc<Checkpoint> {
        let checkpoint = Arc::new(Checkpoint::default());
        self.checkpoints
            .lock()
            .unwrap()
            .insert(call, Arc::clone(&checkpoint));
        checkpoint
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentGenerator for ScriptedGenerator {
    async fn generate(&self, template: &Template, row: &Row) -> Result<Vec<u8>, CoreError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let checkpoint = self.checkpoints.lock().unwrap().get(&call).cloned();
        if let Some(checkpoint) = checkpoint {
            checkpoint.reached.notify_one();
            checkpoint.release.notified().await;
        }
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let key = format!("{}:{}", template.id, row.get("id").cloned().unwrap_or(Value::Null));
        let fail_times = row.get("failTimes").and_then(Value::as_u64).unwrap_or(0);
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry(key.clone()).or_insert(0);
            *n += 1;
            *n
        };

        if attempt <= fail_times {
            Err(CoreError::Generation(format!("{key} attempt {attempt} failed")))
        } else {
            Ok(key.into_bytes())
        }
    }
}

pub struct Harness {
    pub scheduler: Scheduler,
    pub generator: Arc<ScriptedGenerator>,
    pub templates: Arc<InMemoryTemplateManager>,
    pub results: Arc<InMemoryResultStore>,
    pub events: EventStream,
}

impl Harness {
    /// Drain every event published so far.
    pub fn drain_events(&mut self) -> Vec<TaskEvent> {
        let mut out = Vec::new();
        while let Some(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

pub fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        max_concurrency: 3,
        default_max_retries: 3,
        retry_base_delay: Duration::from_millis(1),
        retry_max_delay: Duration::from_millis(2),
        progress_every_units: 1,
        progress_interval: Duration::from_secs(60),
        estimated_unit_ms: 2000,
    }
}

pub async fn harness(config: SchedulerConfig, generator: ScriptedGenerator) -> Harness {
    let templates = Arc::new(InMemoryTemplateManager::new());
    for id in ["t1", "t2"] {
        templates
            .insert(Template {
                id: id.into(),
                name: id.into(),
                content: format!("{id} {{{{id}}}}"),
            })
            .await;
    }
    let generator = Arc::new(generator);
    let results = Arc::new(InMemoryResultStore::new());
    let (bus, events) = EventBus::new();
    let scheduler = Scheduler::new(
        config,
        templates.clone(),
        generator.clone(),
        results.clone(),
        bus,
    );
    Harness {
        scheduler,
        generator,
        templates,
        results,
        events,
    }
}

pub fn rows(n: usize) -> Vec<Value> {
    (0..n).map(|i| json!({ "id": i })).collect()
}

pub fn request(templates: &[&str], rows: Vec<Value>, extra: Value) -> CreateTaskRequest {
    let mut body = json!({
        "templateIds": templates,
        "dataSource": { "type": "inline", "rows": rows },
    });
    if let (Some(body), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            body.insert(k.clone(), v.clone());
        }
    }
    serde_json::from_value(body).unwrap()
}
