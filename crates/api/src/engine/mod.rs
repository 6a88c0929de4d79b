//! Real-time delivery of scheduler progress.
//!
//! Contains the broadcaster that turns scheduler lifecycle events into
//! throttled, diff-only room messages.

pub mod broadcaster;

pub use broadcaster::{snapshot_messages, BroadcasterStats, ProgressBroadcaster};
