//! Job scheduler implementation
//!
//! Owns the priority queue set and the single worker thread. Submission never
//! blocks; cancellation is synchronous and can wait for the in-flight job.
//! Jobs that find rendering paused are parked on a side list and queued
//! again when the pause ends.

use crate::cancel::{CancellationToken, PauseGate};
use crate::completion::Completion;
use crate::error::SchedulerResult;
use crate::job::{JobRef, JobType, SourceId};
use crate::priority::{JobPriority, PriorityQueueSet};
use crate::worker;
use log::{debug, trace, warn};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

/// Default name of the worker thread
pub const DEFAULT_WORKER_NAME: &str = "notecanvas-render";

/// Job scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Total jobs accepted into a queue
    pub jobs_submitted: u64,

    /// Jobs that ran to completion
    pub jobs_completed: u64,

    /// Jobs removed from a queue before running
    pub jobs_cancelled: u64,

    /// Submissions dropped because an equivalent job was already queued
    pub jobs_deduplicated: u64,

    /// Jobs whose body panicked
    pub jobs_panicked: u64,

    /// Runs handed back to the scheduler because rendering was paused
    pub jobs_deferred: u64,

    /// Current queue size across all priorities
    pub queue_size: usize,
}

impl SchedulerStats {
    /// Jobs accepted but not yet finished or cancelled
    pub fn pending_jobs(&self) -> u64 {
        self.jobs_submitted - self.jobs_completed - self.jobs_panicked - self.jobs_cancelled
    }
}

pub(crate) struct QueuedJob {
    pub(crate) job: JobRef,
    pub(crate) token: CancellationToken,
}

impl QueuedJob {
    fn matches(&self, source: SourceId, job_type: JobType) -> bool {
        self.job.job_type() == job_type && self.job.source() == Some(source)
    }
}

pub(crate) struct InFlight {
    pub(crate) job_type: JobType,
    pub(crate) source: Option<SourceId>,
    pub(crate) token: CancellationToken,
    pub(crate) completion: Completion,
}

pub(crate) struct QueueState {
    pub(crate) queues: PriorityQueueSet<QueuedJob>,

    /// Jobs that deferred themselves during a pause, with their priority
    pub(crate) deferred: Vec<(JobPriority, QueuedJob)>,
    pub(crate) stopping: bool,
    pub(crate) in_flight: Option<InFlight>,
    pub(crate) stats: SchedulerStats,
}

impl QueueState {
    /// Queued or deferred jobs across all priorities
    fn waiting_len(&self) -> usize {
        self.queues.len() + self.deferred.len()
    }

    fn is_waiting(&self, source: SourceId, job_type: JobType, priority: JobPriority) -> bool {
        self.queues
            .any_in(priority, |queued| queued.matches(source, job_type))
            || self
                .deferred
                .iter()
                .any(|(at, queued)| *at == priority && queued.matches(source, job_type))
    }

    /// Move deferred jobs back to the tail of their queues
    pub(crate) fn requeue_deferred(&mut self) -> usize {
        let deferred = std::mem::take(&mut self.deferred);
        let count = deferred.len();
        for (priority, queued) in deferred {
            self.queues.push(priority, queued);
        }
        count
    }

    /// Take the deferred jobs at `priorities` matching the predicate
    fn take_deferred<F>(&mut self, priorities: &[JobPriority], predicate: F) -> Vec<QueuedJob>
    where
        F: Fn(&QueuedJob) -> bool,
    {
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.deferred)
            .into_iter()
            .partition(|(priority, queued)| priorities.contains(priority) && predicate(queued));
        self.deferred = kept;
        taken.into_iter().map(|(_, queued)| queued).collect()
    }
}

pub(crate) struct Shared {
    pub(crate) state: Mutex<QueueState>,
    pub(crate) work_available: Condvar,
    pub(crate) pause: PauseGate,
}

struct WorkerHandle {
    thread: JoinHandle<()>,
    id: ThreadId,
}

/// Background job scheduler with one worker thread
///
/// # Example
///
/// ```
/// use notecanvas_scheduler::{FnJob, JobPriority, JobType, Scheduler, SourceId};
///
/// let scheduler = Scheduler::new();
/// scheduler.start().unwrap();
///
/// let page = SourceId::from_raw(1);
/// scheduler.submit(
///     FnJob::new(JobType::Render, |_ctx| { /* paint */ })
///         .with_source(page)
///         .into_ref(),
///     JobPriority::Urgent,
/// );
///
/// // Before destroying the page, make sure nothing still works on it
/// scheduler.remove_all_of_source_and_type_any_priority(page, JobType::Render, true);
/// scheduler.stop();
/// ```
pub struct Scheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<WorkerHandle>>,
    thread_name: String,
}

impl Scheduler {
    /// Create a stopped scheduler
    pub fn new() -> Self {
        Self::with_thread_name(DEFAULT_WORKER_NAME)
    }

    /// Create a stopped scheduler whose worker thread gets `name`
    pub fn with_thread_name(name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    queues: PriorityQueueSet::new(),
                    deferred: Vec::new(),
                    stopping: false,
                    in_flight: None,
                    stats: SchedulerStats::default(),
                }),
                work_available: Condvar::new(),
                pause: PauseGate::new(),
            }),
            worker: Mutex::new(None),
            thread_name: name.into(),
        }
    }

    /// Spawn the worker thread. Idempotent.
    pub fn start(&self) -> SchedulerResult<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }

        self.shared.state.lock().stopping = false;
        self.shared.pause.reopen();

        let thread = worker::spawn(&self.thread_name, self.shared.clone())?;
        let id = thread.thread().id();
        *worker = Some(WorkerHandle { thread, id });
        debug!("scheduler '{}' started", self.thread_name);
        Ok(())
    }

    /// Stop the worker after its current job and join it. Idempotent.
    ///
    /// Jobs still queued or deferred stay so and run after the next `start`.
    pub fn stop(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };

        self.shared.state.lock().stopping = true;
        self.shared.work_available.notify_all();
        self.shared.pause.close();

        if handle.id == thread::current().id() {
            warn!("scheduler stopped from its own worker; not joining");
            return;
        }
        if handle.thread.join().is_err() {
            warn!("worker thread '{}' terminated abnormally", self.thread_name);
        }
        debug!("scheduler '{}' stopped", self.thread_name);
    }

    /// Whether the worker thread is running
    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Append a job to the tail of the queue for `priority`
    pub fn submit(&self, job: JobRef, priority: JobPriority) {
        let mut state = self.shared.state.lock();
        self.push_locked(&mut state, job, priority);
        drop(state);
        self.shared.work_available.notify_one();
    }

    /// Submit a job unless one of the same type and source is already queued
    /// (or deferred) at `priority`
    ///
    /// The check and the push happen under one lock. `make` is only called
    /// when the job is actually needed. Returns `true` if a job was queued.
    pub fn submit_unique<F>(
        &self,
        source: SourceId,
        job_type: JobType,
        priority: JobPriority,
        make: F,
    ) -> bool
    where
        F: FnOnce() -> JobRef,
    {
        let mut state = self.shared.state.lock();
        if state.is_waiting(source, job_type, priority) {
            state.stats.jobs_deduplicated += 1;
            trace!("{:?} job for {} already queued", job_type, source);
            return false;
        }

        self.push_locked(&mut state, make(), priority);
        drop(state);
        self.shared.work_available.notify_one();
        true
    }

    fn push_locked(&self, state: &mut QueueState, job: JobRef, priority: JobPriority) {
        trace!("queue {} at {:?}", job.name(), priority);
        state.queues.push(
            priority,
            QueuedJob {
                job,
                token: CancellationToken::new(),
            },
        );
        state.stats.jobs_submitted += 1;
    }

    /// Whether a job of this type and source is queued (or deferred) at
    /// `priority`
    pub fn is_queued(&self, source: SourceId, job_type: JobType, priority: JobPriority) -> bool {
        self.shared
            .state
            .lock()
            .is_waiting(source, job_type, priority)
    }

    /// Let cooperating jobs hold off expensive work for `duration`
    ///
    /// Jobs that defer themselves meanwhile are queued again when the
    /// deadline passes. A later call replaces the deadline.
    pub fn pause_rendering(&self, duration: Duration) {
        self.shared.pause.pause_for(duration);
        self.wake_worker();
    }

    /// End a pause early and queue deferred jobs again
    pub fn resume_paused_rendering(&self) {
        self.shared.pause.resume();
        self.wake_worker();
    }

    /// Make the worker re-read the pause deadline
    fn wake_worker(&self) {
        let _state = self.shared.state.lock();
        self.shared.work_available.notify_all();
    }

    pub fn is_rendering_paused(&self) -> bool {
        self.shared.pause.is_paused()
    }

    /// Remove every `(job_type, source)` job queued at `priority`
    ///
    /// Each removed job has its token cancelled and its `on_delete` hook
    /// called before the queued handle is dropped. With `wait_for_in_flight`
    /// an executing job of the same type and source has its token cancelled
    /// too, and the call blocks until it has finished. An executing job of
    /// another source is left alone. Returns the number of removed jobs.
    pub fn remove_all_of_source_and_type(
        &self,
        source: SourceId,
        job_type: JobType,
        priority: JobPriority,
        wait_for_in_flight: bool,
    ) -> usize {
        self.remove_matching(&[priority], wait_for_in_flight, |kind, from| {
            kind == job_type && from == Some(source)
        })
    }

    /// Like [`Scheduler::remove_all_of_source_and_type`], scanning all four
    /// queues so jobs submitted at an unexpected priority are found too
    pub fn remove_all_of_source_and_type_any_priority(
        &self,
        source: SourceId,
        job_type: JobType,
        wait_for_in_flight: bool,
    ) -> usize {
        self.remove_matching(&JobPriority::ALL, wait_for_in_flight, |kind, from| {
            kind == job_type && from == Some(source)
        })
    }

    /// Remove every queued job whose type is in `job_types`, at any priority
    ///
    /// The executing job is neither cancelled nor waited for.
    pub fn remove_all_of_types(&self, job_types: &[JobType]) -> usize {
        self.remove_matching(&JobPriority::ALL, false, |kind, _| job_types.contains(&kind))
    }

    fn remove_matching<F>(
        &self,
        priorities: &[JobPriority],
        wait_for_in_flight: bool,
        predicate: F,
    ) -> usize
    where
        F: Fn(JobType, Option<SourceId>) -> bool,
    {
        let matches = |queued: &QueuedJob| predicate(queued.job.job_type(), queued.job.source());

        let (removed, in_flight) = {
            let mut state = self.shared.state.lock();
            let mut removed: Vec<QueuedJob> = priorities
                .iter()
                .flat_map(|&priority| state.queues.remove_if(priority, &matches))
                .collect();
            removed.extend(state.take_deferred(priorities, &matches));
            state.stats.jobs_cancelled += removed.len() as u64;

            // Cancelled under the lock, so the worker cannot defer it afterwards
            let in_flight = match &state.in_flight {
                Some(running)
                    if wait_for_in_flight && predicate(running.job_type, running.source) =>
                {
                    running.token.cancel();
                    Some((running.job_type, running.source, running.completion.clone()))
                }
                _ => None,
            };
            (removed, in_flight)
        };

        let count = removed.len();
        for queued in removed {
            queued.token.cancel();
            queued.job.on_delete();
        }

        if let Some((job_type, source, completion)) = in_flight {
            if self.is_worker_thread() {
                warn!("waiting for the in-flight job from the worker itself; skipped");
            } else {
                trace!("waiting for in-flight {:?} job (source {:?})", job_type, source);
                completion.wait();
            }
        }

        count
    }

    /// Block until the job executing right now (if any) has finished
    pub fn wait_for_in_flight(&self) {
        let completion = self
            .shared
            .state
            .lock()
            .in_flight
            .as_ref()
            .map(|running| running.completion.clone());

        if let Some(completion) = completion {
            if self.is_worker_thread() {
                warn!("wait_for_in_flight called from the worker thread; skipped");
                return;
            }
            completion.wait();
        }
    }

    fn is_worker_thread(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|handle| handle.id == thread::current().id())
    }

    /// Number of queued or deferred jobs across all priorities
    pub fn pending_jobs(&self) -> usize {
        self.shared.state.lock().waiting_len()
    }

    /// Number of jobs queued or deferred at one priority
    pub fn pending_at(&self, priority: JobPriority) -> usize {
        let state = self.shared.state.lock();
        let deferred = state.deferred.iter().filter(|(at, _)| *at == priority).count();
        state.queues.len_of(priority) + deferred
    }

    /// Whether a job is executing right now
    pub fn has_in_flight(&self) -> bool {
        self.shared.state.lock().in_flight.is_some()
    }

    /// Get scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        let state = self.shared.state.lock();
        let mut stats = state.stats.clone();
        stats.queue_size = state.waiting_len();
        stats
    }

    /// Cancel and drop every queued or deferred job
    pub fn clear(&self) -> usize {
        let removed = {
            let mut state = self.shared.state.lock();
            let mut removed = state.queues.drain_all();
            removed.extend(state.deferred.drain(..).map(|(_, queued)| queued));
            state.stats.jobs_cancelled += removed.len() as u64;
            removed
        };

        let count = removed.len();
        for queued in removed {
            queued.token.cancel();
            queued.job.on_delete();
        }
        count
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
        let dropped = self.clear();
        if dropped > 0 {
            debug!("dropped {} queued jobs on shutdown", dropped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::FnJob;
    use crossbeam_channel::{bounded, Receiver};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// A job that blocks the worker until the returned sender is used or dropped
    fn gate_job() -> (JobRef, crossbeam_channel::Sender<()>, Receiver<()>) {
        let (release_tx, release_rx) = bounded::<()>(0);
        let (started_tx, started_rx) = bounded::<()>(1);
        let job = FnJob::new(JobType::Blocking, move |_ctx| {
            let _ = started_tx.send(());
            let _ = release_rx.recv();
        })
        .with_name("gate")
        .into_ref();
        (job, release_tx, started_rx)
    }

    fn recording_job(
        job_type: JobType,
        source: SourceId,
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    ) -> JobRef {
        FnJob::new(job_type, move |_ctx| log.lock().push(label))
            .with_source(source)
            .into_ref()
    }

    /// A job that defers itself while paused and counts its real runs
    fn deferring_job(source: SourceId, runs: Arc<AtomicUsize>) -> JobRef {
        FnJob::new(JobType::Render, move |ctx| {
            if ctx.is_paused() {
                ctx.defer_until_resumed();
                return;
            }
            runs.fetch_add(1, Ordering::SeqCst);
        })
        .with_source(source)
        .with_name("deferring")
        .into_ref()
    }

    fn wait_until<F: Fn() -> bool>(condition: F) {
        let deadline = Instant::now() + TIMEOUT;
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_start_stop_idempotent() {
        let scheduler = Scheduler::new();
        assert!(!scheduler.is_running());

        scheduler.start().unwrap();
        scheduler.start().unwrap();
        assert!(scheduler.is_running());

        scheduler.stop();
        scheduler.stop();
        assert!(!scheduler.is_running());
    }

    #[test]
    fn test_submit_runs_job() {
        let scheduler = Scheduler::new();
        scheduler.start().unwrap();

        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();
        scheduler.submit(
            FnJob::new(JobType::Render, move |_ctx| {
                runs_clone.fetch_add(1, Ordering::SeqCst);
            })
            .into_ref(),
            JobPriority::Low,
        );

        wait_until(|| runs.load(Ordering::SeqCst) == 1);
        wait_until(|| scheduler.stats().jobs_completed == 1);

        let stats = scheduler.stats();
        assert_eq!(stats.jobs_submitted, 1);
        assert_eq!(stats.pending_jobs(), 0);
    }

    #[test]
    fn test_priority_preferred_when_worker_selects() {
        let scheduler = Scheduler::new();
        scheduler.start().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        let (gate, release, started) = gate_job();
        scheduler.submit(gate, JobPriority::Urgent);
        started.recv_timeout(TIMEOUT).unwrap();

        let source = SourceId::from_raw(1);
        for (label, priority) in [
            ("none", JobPriority::None),
            ("low-1", JobPriority::Low),
            ("high", JobPriority::High),
            ("low-2", JobPriority::Low),
            ("urgent", JobPriority::Urgent),
        ] {
            let job = recording_job(JobType::Render, source, label, log.clone());
            scheduler.submit(job, priority);
        }

        drop(release);
        wait_until(|| log.lock().len() == 5);

        assert_eq!(*log.lock(), vec!["urgent", "high", "low-1", "low-2", "none"]);
    }

    #[test]
    fn test_submit_unique_dedups_per_priority() {
        let scheduler = Scheduler::new();
        let source = SourceId::from_raw(9);
        let made = AtomicUsize::new(0);
        let make = || {
            made.fetch_add(1, Ordering::SeqCst);
            FnJob::new(JobType::Render, |_ctx| {}).with_source(source).into_ref()
        };

        assert!(scheduler.submit_unique(source, JobType::Render, JobPriority::Urgent, make));
        assert!(!scheduler.submit_unique(source, JobType::Render, JobPriority::Urgent, || {
            made.fetch_add(1, Ordering::SeqCst);
            FnJob::new(JobType::Render, |_ctx| {}).with_source(source).into_ref()
        }));
        assert_eq!(made.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending_jobs(), 1);
        assert!(scheduler.is_queued(source, JobType::Render, JobPriority::Urgent));

        // Different type, same source: not a duplicate
        assert!(scheduler.submit_unique(source, JobType::Preview, JobPriority::Urgent, || {
            FnJob::new(JobType::Preview, |_ctx| {}).with_source(source).into_ref()
        }));

        let stats = scheduler.stats();
        assert_eq!(stats.jobs_submitted, 2);
        assert_eq!(stats.jobs_deduplicated, 1);
    }

    #[test]
    fn test_remove_all_of_source_and_type_calls_on_delete() {
        let scheduler = Scheduler::new();
        let page = SourceId::from_raw(1);
        let other = SourceId::from_raw(2);
        let deleted = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let deleted = deleted.clone();
            scheduler.submit(
                FnJob::new(JobType::Render, |_ctx| {})
                    .with_source(page)
                    .with_on_delete(move || {
                        deleted.fetch_add(1, Ordering::SeqCst);
                    })
                    .into_ref(),
                JobPriority::Urgent,
            );
        }
        scheduler.submit(
            FnJob::new(JobType::Render, |_ctx| {}).with_source(other).into_ref(),
            JobPriority::Urgent,
        );
        scheduler.submit(
            FnJob::new(JobType::Preview, |_ctx| {}).with_source(page).into_ref(),
            JobPriority::High,
        );

        let removed = scheduler.remove_all_of_source_and_type(
            page,
            JobType::Render,
            JobPriority::Urgent,
            false,
        );
        assert_eq!(removed, 3);
        assert_eq!(deleted.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.pending_jobs(), 2);
        assert_eq!(scheduler.stats().jobs_cancelled, 3);
    }

    #[test]
    fn test_priority_scoped_removal_misses_other_queues() {
        let scheduler = Scheduler::new();
        let page = SourceId::from_raw(3);
        scheduler.submit(
            FnJob::new(JobType::Render, |_ctx| {}).with_source(page).into_ref(),
            JobPriority::Low,
        );

        let urgent_only = scheduler.remove_all_of_source_and_type(
            page,
            JobType::Render,
            JobPriority::Urgent,
            false,
        );
        assert_eq!(urgent_only, 0);
        assert_eq!(
            scheduler.remove_all_of_source_and_type_any_priority(page, JobType::Render, false),
            1
        );
        assert_eq!(scheduler.pending_jobs(), 0);
    }

    #[test]
    fn test_removed_job_token_is_cancelled() {
        let scheduler = Scheduler::new();
        let page = SourceId::from_raw(4);
        scheduler.submit(
            FnJob::new(JobType::Render, |_ctx| {}).with_source(page).into_ref(),
            JobPriority::Urgent,
        );

        let token = {
            let state = scheduler.shared.state.lock();
            let token = state.queues.iter().next().unwrap().1.token.clone();
            token
        };
        assert!(!token.is_cancelled());

        scheduler.remove_all_of_source_and_type_any_priority(page, JobType::Render, false);
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_remove_waits_for_in_flight_job() {
        let scheduler = Arc::new(Scheduler::new());
        scheduler.start().unwrap();

        let page = Arc::new(vec![0u8; 16]);
        let source = SourceId::of(&page);
        let finished = Arc::new(AtomicUsize::new(0));
        let (started_tx, started_rx) = bounded::<()>(1);

        let page_for_job = page.clone();
        let finished_clone = finished.clone();
        scheduler.submit(
            FnJob::new(JobType::Render, move |_ctx| {
                let _ = started_tx.send(());
                thread::sleep(Duration::from_millis(50));
                assert_eq!(page_for_job.len(), 16);
                finished_clone.fetch_add(1, Ordering::SeqCst);
            })
            .with_source(source)
            .into_ref(),
            JobPriority::Urgent,
        );
        started_rx.recv_timeout(TIMEOUT).unwrap();

        scheduler.remove_all_of_source_and_type_any_priority(source, JobType::Render, true);

        assert_eq!(finished.load(Ordering::SeqCst), 1);
        // The job's captured clone is gone; the caller holds the last reference
        assert_eq!(Arc::strong_count(&page), 1);
    }

    #[test]
    fn test_removal_does_not_wait_for_other_source() {
        let scheduler = Arc::new(Scheduler::new());
        scheduler.start().unwrap();

        let (gate, release, started) = gate_job();
        scheduler.submit(gate, JobPriority::Urgent);
        started.recv_timeout(TIMEOUT).unwrap();

        let page = SourceId::from_raw(11);
        scheduler.submit(
            FnJob::new(JobType::Render, |_ctx| {}).with_source(page).into_ref(),
            JobPriority::Urgent,
        );

        let (done_tx, done_rx) = bounded::<usize>(1);
        let remover = {
            let scheduler = scheduler.clone();
            thread::spawn(move || {
                let removed = scheduler.remove_all_of_source_and_type_any_priority(
                    page,
                    JobType::Render,
                    true,
                );
                let _ = done_tx.send(removed);
            })
        };

        // Returns while the unrelated gate job still runs
        assert_eq!(done_rx.recv_timeout(TIMEOUT).unwrap(), 1);
        assert!(scheduler.has_in_flight());

        drop(release);
        remover.join().unwrap();
    }

    #[test]
    fn test_waiting_removal_cancels_in_flight_job() {
        let scheduler = Scheduler::new();
        scheduler.start().unwrap();

        let page = SourceId::from_raw(12);
        let saw_cancel = Arc::new(AtomicUsize::new(0));
        let (started_tx, started_rx) = bounded::<()>(1);
        let saw_cancel_clone = saw_cancel.clone();
        scheduler.submit(
            FnJob::new(JobType::Render, move |ctx| {
                let _ = started_tx.send(());
                let deadline = Instant::now() + TIMEOUT;
                while !ctx.is_cancelled() && Instant::now() < deadline {
                    thread::sleep(Duration::from_millis(1));
                }
                if ctx.is_cancelled() {
                    saw_cancel_clone.fetch_add(1, Ordering::SeqCst);
                }
            })
            .with_source(page)
            .into_ref(),
            JobPriority::Urgent,
        );
        started_rx.recv_timeout(TIMEOUT).unwrap();

        let started = Instant::now();
        assert_eq!(
            scheduler.remove_all_of_source_and_type_any_priority(page, JobType::Render, true),
            0
        );
        assert!(started.elapsed() < TIMEOUT);
        assert_eq!(saw_cancel.load(Ordering::SeqCst), 1);
        assert!(!scheduler.has_in_flight());
    }

    #[test]
    fn test_non_waiting_removal_leaves_in_flight_token() {
        let scheduler = Scheduler::new();
        scheduler.start().unwrap();

        let page = SourceId::from_raw(13);
        let (started_tx, started_rx) = bounded::<()>(1);
        let (release_tx, release_rx) = bounded::<()>(0);
        let cancelled = Arc::new(AtomicUsize::new(0));
        let cancelled_clone = cancelled.clone();
        scheduler.submit(
            FnJob::new(JobType::Render, move |ctx| {
                let _ = started_tx.send(());
                let _ = release_rx.recv();
                if ctx.is_cancelled() {
                    cancelled_clone.fetch_add(1, Ordering::SeqCst);
                }
            })
            .with_source(page)
            .into_ref(),
            JobPriority::Urgent,
        );
        started_rx.recv_timeout(TIMEOUT).unwrap();

        scheduler.remove_all_of_source_and_type_any_priority(page, JobType::Render, false);
        drop(release_tx);
        wait_until(|| scheduler.stats().jobs_completed == 1);
        assert_eq!(cancelled.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_safe_destruction_under_concurrent_removal() {
        let scheduler = Arc::new(Scheduler::new());
        scheduler.start().unwrap();

        for _ in 0..20 {
            let page = Arc::new(Mutex::new(0u64));
            let source = SourceId::of(&page);

            for _ in 0..8 {
                let page = page.clone();
                scheduler.submit(
                    FnJob::new(JobType::Render, move |_ctx| {
                        *page.lock() += 1;
                        thread::sleep(Duration::from_micros(200));
                    })
                    .with_source(source)
                    .into_ref(),
                    JobPriority::Urgent,
                );
            }

            let remover = {
                let scheduler = scheduler.clone();
                thread::spawn(move || {
                    scheduler.remove_all_of_source_and_type_any_priority(
                        source,
                        JobType::Render,
                        true,
                    )
                })
            };
            remover.join().unwrap();

            assert!(!scheduler.is_queued(source, JobType::Render, JobPriority::Urgent));
            assert_eq!(Arc::strong_count(&page), 1);
        }
    }

    #[test]
    fn test_worker_survives_panicking_job() {
        let scheduler = Scheduler::new();
        scheduler.start().unwrap();

        scheduler.submit(
            FnJob::new(JobType::Render, |_ctx| panic!("render exploded")).into_ref(),
            JobPriority::Urgent,
        );

        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();
        scheduler.submit(
            FnJob::new(JobType::Render, move |_ctx| {
                runs_clone.fetch_add(1, Ordering::SeqCst);
            })
            .into_ref(),
            JobPriority::Low,
        );

        wait_until(|| runs.load(Ordering::SeqCst) == 1);
        wait_until(|| scheduler.stats().jobs_completed == 1);
        let stats = scheduler.stats();
        assert_eq!(stats.jobs_panicked, 1);
        assert!(scheduler.is_running());
    }

    #[test]
    fn test_pause_does_not_filter_jobs() {
        let scheduler = Scheduler::new();
        scheduler.pause_rendering(Duration::from_secs(30));
        assert!(scheduler.is_rendering_paused());
        scheduler.start().unwrap();

        let saw_pause = Arc::new(AtomicUsize::new(0));
        let saw_pause_clone = saw_pause.clone();
        scheduler.submit(
            FnJob::new(JobType::Render, move |ctx| {
                if ctx.is_paused() {
                    saw_pause_clone.fetch_add(1, Ordering::SeqCst);
                }
            })
            .into_ref(),
            JobPriority::Urgent,
        );

        wait_until(|| saw_pause.load(Ordering::SeqCst) == 1);

        scheduler.resume_paused_rendering();
        assert!(!scheduler.is_rendering_paused());
    }

    #[test]
    fn test_deferred_job_leaves_worker_free() {
        let scheduler = Scheduler::new();
        scheduler.pause_rendering(Duration::from_secs(60));
        scheduler.start().unwrap();

        let page = SourceId::from_raw(21);
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler.submit(deferring_job(page, runs.clone()), JobPriority::Urgent);
        wait_until(|| scheduler.stats().jobs_deferred == 1);

        // Another urgent job runs right away instead of waiting out the pause
        let (done_tx, done_rx) = bounded::<()>(1);
        let submitted = Instant::now();
        scheduler.submit(
            FnJob::new(JobType::Blocking, move |_ctx| {
                let _ = done_tx.send(());
            })
            .into_ref(),
            JobPriority::Urgent,
        );
        done_rx.recv_timeout(TIMEOUT).unwrap();
        assert!(submitted.elapsed() < Duration::from_secs(2));

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending_jobs(), 1);
        assert!(scheduler.is_queued(page, JobType::Render, JobPriority::Urgent));

        scheduler.resume_paused_rendering();
        wait_until(|| runs.load(Ordering::SeqCst) == 1);
        wait_until(|| scheduler.stats().jobs_completed == 2);

        let stats = scheduler.stats();
        assert_eq!(stats.pending_jobs(), 0);
        assert_eq!(stats.queue_size, 0);
    }

    #[test]
    fn test_deferred_job_runs_when_pause_expires() {
        let scheduler = Scheduler::new();
        scheduler.pause_rendering(Duration::from_secs(60));
        scheduler.start().unwrap();

        let runs = Arc::new(AtomicUsize::new(0));
        scheduler.submit(
            deferring_job(SourceId::from_raw(22), runs.clone()),
            JobPriority::High,
        );
        wait_until(|| scheduler.stats().jobs_deferred == 1);

        // Shortening the pause wakes the worker for the new deadline
        scheduler.pause_rendering(Duration::from_millis(20));
        wait_until(|| runs.load(Ordering::SeqCst) == 1);
        assert!(!scheduler.is_rendering_paused());
    }

    #[test]
    fn test_deferred_job_deduplicated_and_removable() {
        let scheduler = Scheduler::new();
        scheduler.pause_rendering(Duration::from_secs(60));
        scheduler.start().unwrap();

        let page = SourceId::from_raw(23);
        let runs = Arc::new(AtomicUsize::new(0));
        let deleted = Arc::new(AtomicUsize::new(0));
        let job = {
            let runs = runs.clone();
            let deleted = deleted.clone();
            FnJob::new(JobType::Render, move |ctx| {
                if ctx.is_paused() {
                    ctx.defer_until_resumed();
                    return;
                }
                runs.fetch_add(1, Ordering::SeqCst);
            })
            .with_source(page)
            .with_on_delete(move || {
                deleted.fetch_add(1, Ordering::SeqCst);
            })
            .into_ref()
        };
        scheduler.submit(job, JobPriority::Urgent);
        wait_until(|| scheduler.stats().jobs_deferred == 1);

        assert!(!scheduler.submit_unique(page, JobType::Render, JobPriority::Urgent, || {
            deferring_job(page, runs.clone())
        }));

        let removed = scheduler.remove_all_of_source_and_type(
            page,
            JobType::Render,
            JobPriority::Urgent,
            true,
        );
        assert_eq!(removed, 1);
        assert_eq!(deleted.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending_jobs(), 0);

        scheduler.resume_paused_rendering();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stop_releases_paused_job() {
        let scheduler = Scheduler::new();
        scheduler.pause_rendering(Duration::from_secs(60));
        scheduler.start().unwrap();

        let (started_tx, started_rx) = bounded::<()>(1);
        let proceeded = Arc::new(AtomicUsize::new(0));
        let proceeded_clone = proceeded.clone();
        scheduler.submit(
            FnJob::new(JobType::Render, move |ctx| {
                let _ = started_tx.send(());
                if ctx.wait_while_paused() {
                    proceeded_clone.fetch_add(1, Ordering::SeqCst);
                }
            })
            .into_ref(),
            JobPriority::Urgent,
        );
        started_rx.recv_timeout(TIMEOUT).unwrap();

        let started = Instant::now();
        scheduler.stop();
        assert!(started.elapsed() < TIMEOUT);
        assert_eq!(proceeded.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_queued_jobs_survive_restart() {
        let scheduler = Scheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();
        scheduler.submit(
            FnJob::new(JobType::Preview, move |_ctx| {
                runs_clone.fetch_add(1, Ordering::SeqCst);
            })
            .into_ref(),
            JobPriority::High,
        );
        assert_eq!(scheduler.pending_at(JobPriority::High), 1);

        scheduler.start().unwrap();
        wait_until(|| runs.load(Ordering::SeqCst) == 1);
        scheduler.stop();

        scheduler.start().unwrap();
        assert!(scheduler.is_running());
    }

    #[test]
    fn test_clear_and_drop_call_on_delete() {
        let deleted = Arc::new(AtomicUsize::new(0));
        {
            let scheduler = Scheduler::new();
            for _ in 0..2 {
                let deleted = deleted.clone();
                scheduler.submit(
                    FnJob::new(JobType::Render, |_ctx| {})
                        .with_on_delete(move || {
                            deleted.fetch_add(1, Ordering::SeqCst);
                        })
                        .into_ref(),
                    JobPriority::Low,
                );
            }
            assert_eq!(scheduler.pending_jobs(), 2);
        }
        assert_eq!(deleted.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_remove_all_of_types_leaves_blocking_jobs() {
        let scheduler = Scheduler::new();
        let source = SourceId::from_raw(5);
        scheduler.submit(
            FnJob::new(JobType::Render, |_ctx| {}).with_source(source).into_ref(),
            JobPriority::Urgent,
        );
        scheduler.submit(
            FnJob::new(JobType::Preview, |_ctx| {}).with_source(source).into_ref(),
            JobPriority::High,
        );
        scheduler.submit(FnJob::new(JobType::Blocking, |_ctx| {}).into_ref(), JobPriority::Urgent);

        let removed = scheduler.remove_all_of_types(&[JobType::Render, JobType::Preview]);
        assert_eq!(removed, 2);
        assert_eq!(scheduler.pending_jobs(), 1);
        assert_eq!(scheduler.pending_at(JobPriority::Urgent), 1);
    }

    #[test]
    fn test_default() {
        let scheduler = Scheduler::default();
        assert_eq!(scheduler.pending_jobs(), 0);
        assert!(!scheduler.has_in_flight());
        assert_eq!(scheduler.stats(), SchedulerStats::default());
    }
}
