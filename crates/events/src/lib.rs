//! Typed task lifecycle events.
//!
//! The scheduler publishes a [`TaskEvent`] for every lifecycle change and for
//! throttled progress; the progress broadcaster is the single consumer. This
//! channel is the only coupling between scheduling and delivery.
//!
//! - [`EventBus`]: cloneable producer handle.
//! - [`EventStream`]: the consuming end.

pub mod bus;

pub use bus::{EventBus, EventStream, TaskEvent, TaskEventKind};
