//! One-shot completion latch
//!
//! The worker signals a latch once an in-flight job has returned and its
//! handle has been dropped. Callers that must not destroy a job's source
//! while the job runs wait on it.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Latch {
    done: Mutex<bool>,
    cond: Condvar,
}

/// A cloneable handle to a one-shot latch
#[derive(Debug, Clone, Default)]
pub struct Completion {
    latch: Arc<Latch>,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark as complete and wake every waiter
    pub fn complete(&self) {
        let mut done = self.latch.done.lock();
        *done = true;
        drop(done);
        self.latch.cond.notify_all();
    }

    pub fn is_complete(&self) -> bool {
        *self.latch.done.lock()
    }

    /// Block until complete
    pub fn wait(&self) {
        let mut done = self.latch.done.lock();
        while !*done {
            self.latch.cond.wait(&mut done);
        }
    }

    /// Block until complete or until `timeout` elapses
    ///
    /// Returns `true` if the latch completed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.latch.done.lock();
        while !*done {
            if self.latch.cond.wait_until(&mut done, deadline).timed_out() {
                return *done;
            }
        }
        true
    }
}
