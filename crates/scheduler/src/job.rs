//! Job abstraction
//!
//! A job is a shared-ownership unit of background work. The submitter, the
//! queue and the executing worker each hold one `Arc` clone; the job is
//! destroyed when the last one is dropped.

use crate::cancel::{CancellationToken, PauseGate};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Kind of a job, used together with its source for dedup and cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobType {
    /// Work that keeps user input suspended while it runs
    Blocking,

    /// Whole-page thumbnail render
    Preview,

    /// Page repaint or re-tiling
    Render,
}

/// Opaque identity of the object a job works on
///
/// Only ever compared for equality; the scheduler never turns it back into
/// a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(usize);

impl SourceId {
    /// Identity of the allocation behind an `Arc`
    pub fn of<T: ?Sized>(value: &Arc<T>) -> Self {
        Self(Arc::as_ptr(value) as *const () as usize)
    }

    /// Identity from an arbitrary caller-chosen number
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> usize {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Per-execution context handed to [`Job::run`]
#[derive(Debug, Clone)]
pub struct JobContext {
    token: CancellationToken,
    pause: PauseGate,
    deferred: Arc<AtomicBool>,
}

impl JobContext {
    pub fn new(token: CancellationToken, pause: PauseGate) -> Self {
        Self {
            token,
            pause,
            deferred: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether rendering is currently paused
    pub fn is_paused(&self) -> bool {
        self.pause.is_paused()
    }

    /// Wait while rendering is paused
    ///
    /// Returns `false` when the job should give up (scheduler shutting down
    /// or job cancelled).
    pub fn wait_while_paused(&self) -> bool {
        self.pause.wait() && !self.token.is_cancelled()
    }

    /// Ask the worker to queue this job again once the pause ends
    ///
    /// The job should return right after calling this. The worker keeps the
    /// job aside, runs other work in the meantime, and puts it back at its
    /// original priority when rendering is resumed or the pause expires.
    /// Has no effect if the job is cancelled before it returns.
    pub fn defer_until_resumed(&self) {
        self.deferred.store(true, Ordering::Release);
    }

    /// Whether the job asked to be deferred during this run
    pub fn is_deferred(&self) -> bool {
        self.deferred.load(Ordering::Acquire)
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn pause_gate(&self) -> &PauseGate {
        &self.pause
    }
}

/// A unit of background work
pub trait Job: Send + Sync {
    fn job_type(&self) -> JobType;

    /// Identity used for dedup and cancellation
    fn source(&self) -> Option<SourceId> {
        None
    }

    /// Execute the job on the worker thread
    fn run(&self, ctx: &JobContext);

    /// Called when the job is removed from its queue without running
    fn on_delete(&self) {}

    /// Short name for logs
    fn name(&self) -> &str {
        "job"
    }
}

/// Shared handle to a job
pub type JobRef = Arc<dyn Job>;

type JobBody = Box<dyn Fn(&JobContext) + Send + Sync>;

/// A job backed by a closure
///
/// # Example
///
/// ```
/// use notecanvas_scheduler::{FnJob, Job, JobType, SourceId};
///
/// let job = FnJob::new(JobType::Render, |_ctx| {
///     // ... render ...
/// })
/// .with_source(SourceId::from_raw(7))
/// .into_ref();
/// assert_eq!(job.source(), Some(SourceId::from_raw(7)));
/// ```
pub struct FnJob {
    job_type: JobType,
    source: Option<SourceId>,
    name: String,
    body: JobBody,
    on_delete: Option<Box<dyn Fn() + Send + Sync>>,
}

impl FnJob {
    pub fn new<F>(job_type: JobType, body: F) -> Self
    where
        F: Fn(&JobContext) + Send + Sync + 'static,
    {
        Self {
            job_type,
            source: None,
            name: "fn-job".to_string(),
            body: Box::new(body),
            on_delete: None,
        }
    }

    pub fn with_source(mut self, source: SourceId) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Hook run when the job is cancelled while queued
    pub fn with_on_delete<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_delete = Some(Box::new(hook));
        self
    }

    pub fn into_ref(self) -> JobRef {
        Arc::new(self)
    }
}

impl Job for FnJob {
    fn job_type(&self) -> JobType {
        self.job_type
    }

    fn source(&self) -> Option<SourceId> {
        self.source
    }

    fn run(&self, ctx: &JobContext) {
        (self.body)(ctx)
    }

    fn on_delete(&self) {
        if let Some(hook) = &self.on_delete {
            hook();
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
