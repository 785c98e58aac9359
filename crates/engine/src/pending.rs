//! Completion handles for work run on the background scheduler
//!
//! A `Pending<T>` is the receiving half of a one-shot slot. The worker side
//! (`Completer<T>`) fills it exactly once; if the task panics the completer is
//! dropped unfilled and the handle resolves to a scheduler error instead of
//! blocking forever.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tessera_core::{Error, Result};

enum Slot<T> {
    Waiting,
    Done(Result<T>),
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

impl<T> Shared<T> {
    fn fill(&self, value: Result<T>) {
        let mut slot = self.slot.lock();
        if matches!(*slot, Slot::Waiting) {
            *slot = Slot::Done(value);
            self.ready.notify_all();
        }
    }
}

/// Result of a task that may still be running
///
/// Dropping the handle does not cancel the task.
#[must_use = "a Pending does nothing unless waited on"]
pub struct Pending<T> {
    shared: Arc<Shared<T>>,
}

/// Worker-side half of a `Pending`
pub(crate) struct Completer<T> {
    shared: Arc<Shared<T>>,
}

/// Create a connected handle and completer
pub(crate) fn pending<T>() -> (Pending<T>, Completer<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(Slot::Waiting),
        ready: Condvar::new(),
    });
    (
        Pending {
            shared: Arc::clone(&shared),
        },
        Completer { shared },
    )
}

impl<T> Completer<T> {
    /// Deliver the task's value
    pub(crate) fn complete(self, value: T) {
        self.shared.fill(Ok(value));
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        // No-op after complete(); otherwise the task died before finishing.
        self.shared
            .fill(Err(Error::Scheduler("background task did not complete".to_string())));
    }
}

impl<T> Pending<T> {
    /// Handle that is already resolved
    pub fn ready(value: T) -> Self {
        let (pending, completer) = pending();
        completer.complete(value);
        pending
    }

    /// Handle that already failed
    pub fn failed(err: Error) -> Self {
        let (pending, completer) = pending::<T>();
        completer.shared.fill(Err(err));
        pending
    }

    /// Whether the result is available without blocking
    pub fn is_ready(&self) -> bool {
        matches!(*self.shared.slot.lock(), Slot::Done(_))
    }

    /// Block until the task finishes
    ///
    /// # Errors
    ///
    /// Returns `Error::Scheduler` if the task was rejected or panicked.
    pub fn wait(self) -> Result<T> {
        let mut slot = self.shared.slot.lock();
        while matches!(*slot, Slot::Waiting) {
            self.shared.ready.wait(&mut slot);
        }
        match std::mem::replace(&mut *slot, Slot::Waiting) {
            Slot::Done(result) => result,
            Slot::Waiting => Err(Error::Scheduler("result already taken".to_string())),
        }
    }

    /// Block for at most `timeout`
    ///
    /// Returns None on timeout or task failure. The task keeps running either
    /// way; its result is discarded.
    pub fn wait_timeout(self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.slot.lock();
        while matches!(*slot, Slot::Waiting) {
            if self.shared.ready.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        match std::mem::replace(&mut *slot, Slot::Waiting) {
            Slot::Done(Ok(value)) => Some(value),
            _ => None,
        }
    }
}

impl<T> std::fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pending")
            .field("ready", &self.is_ready())
            .finish()
    }
}
