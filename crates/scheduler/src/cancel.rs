//! Cooperative cancellation and render pausing
//!
//! Jobs receive both primitives through their [`JobContext`](crate::JobContext)
//! and check them at their own safe points. Neither one is enforced by the
//! scheduler.

use parking_lot::{Condvar, Mutex};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

/// Cancellation token for cooperative job cancellation
///
/// The scheduler cancels a job's token when it removes the job from its
/// queue. Clones share the same state.
///
/// # Example
///
/// ```
/// use notecanvas_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token in the non-cancelled state
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancel this token and every clone of it. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check if this token has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct PauseState {
    until: Option<Instant>,
    closed: bool,
}

#[derive(Debug, Default)]
struct PauseInner {
    state: Mutex<PauseState>,
    changed: Condvar,
}

/// Shared "paused until" deadline for render suppression
///
/// While a zoom or scroll gesture is in progress the interactive thread
/// pauses rendering for a short while. Render jobs that find the gate
/// paused hand themselves back to the scheduler with
/// [`JobContext::defer_until_resumed`](crate::JobContext::defer_until_resumed)
/// so the worker stays free for other work. Jobs that must not be reordered
/// can block in [`PauseGate::wait`] instead, which returns once the deadline
/// passes or the scheduler shuts down.
#[derive(Debug, Clone, Default)]
pub struct PauseGate {
    inner: Arc<PauseInner>,
}

impl PauseGate {
    /// Create an open (not paused) gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Pause for `duration` from now
    ///
    /// A later call replaces the previous deadline, shorter or longer.
    /// Waiters re-check against the new deadline.
    pub fn pause_for(&self, duration: Duration) {
        let mut state = self.inner.state.lock();
        state.until = Some(Instant::now() + duration);
        drop(state);
        self.inner.changed.notify_all();
    }

    /// Clear the deadline and release every waiting job
    pub fn resume(&self) {
        let mut state = self.inner.state.lock();
        state.until = None;
        drop(state);
        self.inner.changed.notify_all();
    }

    /// Whether the deadline lies in the future
    pub fn is_paused(&self) -> bool {
        let state = self.inner.state.lock();
        matches!(state.until, Some(until) if until > Instant::now())
    }

    /// The current deadline, if one is set and not yet reached
    pub fn paused_until(&self) -> Option<Instant> {
        let state = self.inner.state.lock();
        state.until.filter(|until| *until > Instant::now())
    }

    /// Block until the gate is open
    ///
    /// Returns `false` if the gate was closed for shutdown, in which case the
    /// caller should give up instead of rendering.
    pub fn wait(&self) -> bool {
        let mut state = self.inner.state.lock();
        loop {
            if state.closed {
                return false;
            }
            match state.until {
                Some(until) if until > Instant::now() => {
                    self.inner.changed.wait_until(&mut state, until);
                }
                _ => return true,
            }
        }
    }

    /// Release all waiters permanently (until [`PauseGate::reopen`])
    pub(crate) fn close(&self) {
        let mut state = self.inner.state.lock();
        state.closed = true;
        drop(state);
        self.inner.changed.notify_all();
    }

    pub(crate) fn reopen(&self) {
        self.inner.state.lock().closed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_cancellation_token_basic() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());

        token.cancel();
        assert!(token.is_cancelled());

        // Idempotent
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancellation_token_clone() {
        let token1 = CancellationToken::default();
        let token2 = token1.clone();

        token1.cancel();
        assert!(token2.is_cancelled());
    }

    #[test]
    fn test_pause_gate_open_by_default() {
        let gate = PauseGate::new();
        assert!(!gate.is_paused());
        assert!(gate.paused_until().is_none());
        assert!(gate.wait());
    }

    #[test]
    fn test_pause_expires() {
        let gate = PauseGate::new();
        gate.pause_for(Duration::from_millis(30));
        assert!(gate.is_paused());

        let started = Instant::now();
        assert!(gate.wait());
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert!(!gate.is_paused());
    }

    #[test]
    fn test_resume_releases_waiter_early() {
        let gate = PauseGate::new();
        gate.pause_for(Duration::from_secs(30));

        let waiter_gate = gate.clone();
        let waiter = thread::spawn(move || {
            let started = Instant::now();
            let proceed = waiter_gate.wait();
            (proceed, started.elapsed())
        });

        thread::sleep(Duration::from_millis(20));
        gate.resume();

        let (proceed, waited) = waiter.join().unwrap();
        assert!(proceed);
        assert!(waited < Duration::from_secs(5));
    }

    #[test]
    fn test_shortened_pause_releases_waiter() {
        let gate = PauseGate::new();
        gate.pause_for(Duration::from_secs(30));

        let waiter_gate = gate.clone();
        let waiter = thread::spawn(move || {
            let started = Instant::now();
            let proceed = waiter_gate.wait();
            (proceed, started.elapsed())
        });

        thread::sleep(Duration::from_millis(20));
        gate.pause_for(Duration::from_millis(10));

        let (proceed, waited) = waiter.join().unwrap();
        assert!(proceed);
        assert!(waited < Duration::from_secs(5));
        assert!(!gate.is_paused());
    }

    #[test]
    fn test_close_aborts_wait() {
        let gate = PauseGate::new();
        gate.pause_for(Duration::from_secs(30));

        let waiter_gate = gate.clone();
        let waiter = thread::spawn(move || waiter_gate.wait());

        thread::sleep(Duration::from_millis(20));
        gate.close();
        assert!(!waiter.join().unwrap());

        gate.reopen();
        gate.resume();
        assert!(gate.wait());
    }
}
