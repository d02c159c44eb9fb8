//! Marshalling closures back onto the interactive thread
//!
//! Background jobs never touch UI-thread state directly. They hand closures
//! to a [`UiDispatcher`], and the event loop runs them on its own thread.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::trace;
use std::time::Duration;

/// A closure to run on the interactive thread
pub type UiTask = Box<dyn FnOnce() + Send + 'static>;

/// "Run this on the UI thread" capability
pub trait UiDispatcher: Send + Sync {
    fn dispatch(&self, task: UiTask);
}

/// Channel-backed dispatcher
///
/// The sending half is shared with jobs; the event loop owns the matching
/// [`UiQueue`] and drains it from its idle handler.
///
/// # Example
///
/// ```
/// use notecanvas_scheduler::{ChannelDispatcher, UiDispatcher};
///
/// let (dispatcher, queue) = ChannelDispatcher::new();
/// dispatcher.dispatch(Box::new(|| println!("repaint")));
/// assert_eq!(queue.run_pending(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    sender: Sender<UiTask>,
}

impl ChannelDispatcher {
    pub fn new() -> (Self, UiQueue) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self { sender }, UiQueue { receiver })
    }
}

impl UiDispatcher for ChannelDispatcher {
    fn dispatch(&self, task: UiTask) {
        if self.sender.send(task).is_err() {
            trace!("UI queue closed, dropping task");
        }
    }
}

/// Receiving end drained by the interactive thread
#[derive(Debug)]
pub struct UiQueue {
    receiver: Receiver<UiTask>,
}

impl UiQueue {
    /// Run every task queued so far, returning how many ran
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.receiver.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Wait up to `timeout` for one task and run it
    ///
    /// Returns `false` on timeout or when every dispatcher is gone.
    pub fn run_one_timeout(&self, timeout: Duration) -> bool {
        match self.receiver.recv_timeout(timeout) {
            Ok(task) => {
                task();
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}
