//! Memory budget for in-flight chunk buffers
//!
//! Every large allocation in the upload and download pipelines is debited
//! against a single global budget before the buffer is created, and credited
//! back when the last piece of the chunk completes. Waiters are released in
//! FIFO order so a large request cannot be starved by a stream of small ones.

use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::oneshot;

/// Global semaphore-like budget with FIFO admission
pub struct MemoryManager {
    base: u64,
    state: Mutex<State>,
}

struct State {
    available: u64,
    waiters: VecDeque<Waiter>,
}

struct Waiter {
    amount: u64,
    tx: oneshot::Sender<()>,
}

impl MemoryManager {
    /// Create a manager with `base` bytes of budget
    pub fn new(base: u64) -> Self {
        Self {
            base,
            state: Mutex::new(State {
                available: base,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Total budget
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Currently undebited budget
    pub fn available(&self) -> u64 {
        self.state.lock().unwrap().available
    }

    /// Debit `amount` bytes, suspending until the budget allows it.
    ///
    /// Requests larger than the whole budget are a programming error: they
    /// are logged and clamped to `base` so the caller can still proceed.
    pub async fn acquire(&self, amount: u64) {
        let amount = if amount > self.base {
            tracing::error!(
                amount,
                base = self.base,
                "memory request exceeds base memory, clamping"
            );
            self.base
        } else {
            amount
        };

        let rx = {
            let mut state = self.state.lock().unwrap();
            // Joining behind existing waiters keeps admission FIFO even when
            // this request would fit right now.
            if state.waiters.is_empty() && state.available >= amount {
                state.available -= amount;
                return;
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(Waiter { amount, tx });
            rx
        };

        // The sender only drops if the manager itself is torn down.
        let _ = rx.await;
    }

    /// Credit `amount` bytes back and wake waiters that now fit.
    ///
    /// Crediting past `base` is a programming error: logged and clamped.
    pub fn release(&self, amount: u64) {
        let mut state = self.state.lock().unwrap();

        state.available = match state.available.checked_add(amount) {
            Some(v) if v <= self.base => v,
            _ => {
                tracing::error!(
                    amount,
                    available = state.available,
                    base = self.base,
                    "memory release overflows base memory, clamping"
                );
                self.base
            }
        };

        // Wake in FIFO order; a waiter whose future was dropped is skipped
        // and its debit returned.
        while let Some(front) = state.waiters.front() {
            if front.amount > state.available {
                break;
            }
            let waiter = state.waiters.pop_front().unwrap();
            state.available -= waiter.amount;
            if waiter.tx.send(()).is_err() {
                state.available += waiter.amount;
            }
        }
    }
}
