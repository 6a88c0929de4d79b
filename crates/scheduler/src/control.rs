//! Cooperative pause/cancel signalling between control calls and a task's
//! execution loop.
//!
//! A [`TaskControl`] is the checked token handed into every unit execution.
//! The loop inspects it at its yield points only: before acquiring a gate
//! slot, between units, and at retry boundaries. A unit already in flight is
//! never interrupted.

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Run,
    Pause,
    Cancel,
}

#[derive(Debug)]
pub struct TaskControl {
    signal: watch::Sender<Signal>,
    running: watch::Sender<bool>,
}

impl Default for TaskControl {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskControl {
    pub fn new() -> Self {
        let (signal, _) = watch::channel(Signal::Run);
        let (running, _) = watch::channel(false);
        Self { signal, running }
    }

    pub fn signal(&self) -> Signal {
        *self.signal.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal() == Signal::Cancel
    }

    /// Ask the loop to yield after its current unit. A pending cancel wins.
    pub fn request_pause(&self) {
        self.signal.send_if_modified(|s| {
            if *s == Signal::Run {
                *s = Signal::Pause;
                true
            } else {
                false
            }
        });
    }

    pub fn request_cancel(&self) {
        self.signal.send_replace(Signal::Cancel);
    }

    /// Reset to [`Signal::Run`] before a run starts.
    pub fn clear(&self) {
        self.signal.send_replace(Signal::Run);
    }

    /// Resolve once a pause or cancel is requested.
    pub async fn interrupted(&self) -> Signal {
        let mut rx = self.signal.subscribe();
        let signal = match rx.wait_for(|s| *s != Signal::Run).await {
            Ok(s) => *s,
            // The sender lives in `self`, so this is unreachable in practice.
            Err(_) => Signal::Cancel,
        };
        signal
    }

    /// Resolve once a cancel is requested.
    pub async fn cancelled(&self) {
        let mut rx = self.signal.subscribe();
        let _ = rx.wait_for(|s| *s == Signal::Cancel).await;
    }

    /// Called under the task store lock when a run is launched.
    pub fn mark_running(&self) {
        self.running.send_replace(true);
    }

    /// Called under the task store lock when a run has written its final state.
    pub fn mark_stopped(&self) {
        self.running.send_replace(false);
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Resolve once no run is active.
    pub async fn wait_stopped(&self) {
        let mut rx = self.running.subscribe();
        let _ = rx.wait_for(|running| !*running).await;
    }
}
