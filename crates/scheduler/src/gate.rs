//! Process-wide concurrency gate for generation work.
//!
//! A fixed number of slots shared by every task. Waiters are served highest
//! [`Priority`] first and FIFO within a priority. A [`GatePermit`] returns its
//! slot on drop, handing it straight to the next waiter if there is one.
//!
//! Dropping an `acquire` future while it waits is safe: a slot handed to an
//! abandoned waiter is passed on to the next one.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex, MutexGuard};

use docbatch_core::error::CoreError;
use docbatch_core::task::Priority;
use tokio::sync::oneshot;

#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    inner: Arc<GateInner>,
}

#[derive(Debug)]
struct GateInner {
    capacity: usize,
    state: Mutex<GateState>,
}

#[derive(Debug)]
struct GateState {
    available: usize,
    next_seq: u64,
    waiters: BinaryHeap<Waiter>,
}

#[derive(Debug)]
struct Waiter {
    priority: Priority,
    seq: u64,
    tx: oneshot::Sender<GatePermit>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    // Max-heap: higher priority first, then lower sequence number.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// One occupied gate slot.
#[derive(Debug)]
pub struct GatePermit {
    gate: Option<Arc<GateInner>>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        if let Some(gate) = self.gate.take() {
            GateInner::release(&gate);
        }
    }
}

impl GateInner {
    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn release(this: &Arc<Self>) {
        let mut state = this.lock();
        while let Some(waiter) = state.waiters.pop() {
            let permit = GatePermit {
                gate: Some(Arc::clone(this)),
            };
            match waiter.tx.send(permit) {
                Ok(()) => return,
                // Waiter gave up. Disarm so the drop does not re-enter.
                Err(mut orphan) => orphan.gate = None,
            }
        }
        state.available += 1;
    }
}

impl ConcurrencyGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(GateInner {
                capacity,
                state: Mutex::new(GateState {
                    available: capacity,
                    next_seq: 0,
                    waiters: BinaryHeap::new(),
                }),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Slots currently held.
    pub fn in_flight(&self) -> usize {
        self.inner.capacity - self.inner.lock().available
    }

    pub fn waiting(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    /// Wait for a slot.
    pub async fn acquire(&self, priority: Priority) -> Result<GatePermit, CoreError> {
        let rx = {
            let mut state = self.inner.lock();
            if state.available > 0 && state.waiters.is_empty() {
                state.available -= 1;
                return Ok(GatePermit {
                    gate: Some(Arc::clone(&self.inner)),
                });
            }
            let (tx, rx) = oneshot::channel();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.waiters.push(Waiter { priority, seq, tx });
            rx
        };

        rx.await
            .map_err(|_| CoreError::Internal("concurrency gate closed".into()))
    }
}
