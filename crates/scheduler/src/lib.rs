//! Batch task scheduler.
//!
//! - [`Scheduler`]: task lifecycle facade called by the REST controller.
//! - [`TaskStore`]: in-memory task registry, one lock.
//! - [`ConcurrencyGate`]: process-wide cap on in-flight generation units.
//! - [`GenerationWorker`]: executes one template x row unit with retry.
//!
//! Lifecycle changes and throttled progress are published on the
//! [`docbatch_events::EventBus`] handed to [`Scheduler::new`].

pub mod config;
pub mod control;
mod execution;
pub mod gate;
pub mod scheduler;
pub mod store;
pub mod worker;

pub use config::SchedulerConfig;
pub use control::{Signal, TaskControl};
pub use gate::{ConcurrencyGate, GatePermit};
pub use scheduler::Scheduler;
pub use store::{TaskEntry, TaskStore};
pub use worker::{GenerationWorker, RetryPolicy, Unit, UnitOutcome};
