//! Jobs that keep user input suspended while they run
//!
//! A blocking job travels through the normal queues. Input is blocked when
//! the job is created (on the interactive thread) and unblocked from the
//! interactive thread once the job has run or was cancelled.

use crate::dispatch::UiDispatcher;
use crate::job::{Job, JobContext, JobRef, JobType, SourceId};
use log::trace;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Interactive-side switch for suspending user input
///
/// Both methods are called on the interactive thread.
pub trait InputBlocker: Send + Sync {
    fn block(&self, reason: &str);
    fn unblock(&self);
}

type BlockingBody = Box<dyn FnOnce(&JobContext) + Send>;

/// A one-shot job bracketed by input block/unblock
pub struct BlockingJob {
    name: String,
    source: Option<SourceId>,
    body: Mutex<Option<BlockingBody>>,
    blocker: Arc<dyn InputBlocker>,
    dispatcher: Arc<dyn UiDispatcher>,
    released: AtomicBool,
}

impl BlockingJob {
    /// Create the job and block input immediately
    ///
    /// Must be called on the interactive thread.
    pub fn new<F>(
        name: impl Into<String>,
        blocker: Arc<dyn InputBlocker>,
        dispatcher: Arc<dyn UiDispatcher>,
        body: F,
    ) -> Self
    where
        F: FnOnce(&JobContext) + Send + 'static,
    {
        let name = name.into();
        blocker.block(&name);
        Self {
            name,
            source: None,
            body: Mutex::new(Some(Box::new(body))),
            blocker,
            dispatcher,
            released: AtomicBool::new(false),
        }
    }

    pub fn with_source(mut self, source: SourceId) -> Self {
        self.source = Some(source);
        self
    }

    pub fn into_ref(self) -> JobRef {
        Arc::new(self)
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        trace!("unblocking input after '{}'", self.name);
        let blocker = self.blocker.clone();
        self.dispatcher.dispatch(Box::new(move || blocker.unblock()));
    }
}

/// Releases input when dropped, including while unwinding from a panic
struct ReleaseGuard<'a>(&'a BlockingJob);

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

impl Job for BlockingJob {
    fn job_type(&self) -> JobType {
        JobType::Blocking
    }

    fn source(&self) -> Option<SourceId> {
        self.source
    }

    fn run(&self, ctx: &JobContext) {
        let _release = ReleaseGuard(self);
        let body = self.body.lock().take();
        if let Some(body) = body {
            body(ctx);
        }
    }

    fn on_delete(&self) {
        self.release();
    }

    fn name(&self) -> &str {
        &self.name
    }
}
