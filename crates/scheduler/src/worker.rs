//! The single background worker thread
//!
//! The worker waits until a queue is non-empty or a stop is requested, pops
//! the front of the highest-priority queue and runs the job outside every
//! scheduler lock. A panicking job is caught and logged; the loop carries on.
//! A job that defers itself during a pause is parked and queued again once
//! the pause is over.

use crate::cancel::CancellationToken;
use crate::completion::Completion;
use crate::job::{JobContext, JobRef};
use crate::priority::JobPriority;
use crate::scheduler::{InFlight, QueuedJob, Shared};
use log::{debug, error, trace};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::{SchedulerError, SchedulerResult};

/// Spawn the named worker thread
pub(crate) fn spawn(name: &str, shared: Arc<Shared>) -> SchedulerResult<JoinHandle<()>> {
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || run(shared))
        .map_err(|source| SchedulerError::Spawn {
            name: name.to_string(),
            source,
        })
}

struct NextJob {
    job: JobRef,
    token: CancellationToken,
    priority: JobPriority,
    completion: Completion,
}

/// Main worker loop
fn run(shared: Arc<Shared>) {
    debug!("render worker started");

    while let Some(next) = next_job(&shared) {
        let NextJob {
            job,
            token,
            priority,
            completion,
        } = next;

        trace!("running {} ({:?}, {:?})", job.name(), job.job_type(), priority);

        let ctx = JobContext::new(token.clone(), shared.pause.clone());
        let panicked = execute(&job, &ctx);

        // Decided under the lock a canceller takes to cancel the token
        let finished = {
            let mut state = shared.state.lock();
            if panicked {
                state.stats.jobs_panicked += 1;
                Some(job)
            } else if ctx.is_deferred() && !token.is_cancelled() {
                trace!("{} deferred until rendering resumes", job.name());
                state.stats.jobs_deferred += 1;
                state.deferred.push((priority, QueuedJob { job, token }));
                None
            } else {
                state.stats.jobs_completed += 1;
                Some(job)
            }
        };
        // The worker's handle is gone before a waiting canceller is released
        drop(finished);

        shared.state.lock().in_flight = None;
        completion.complete();
    }

    debug!("render worker stopped");
}

/// Block until there is a job to run, or return `None` on stop
///
/// Deferred jobs go back to their queues as soon as the pause is over. While
/// only deferred jobs remain, the wait is bounded by the pause deadline.
fn next_job(shared: &Shared) -> Option<NextJob> {
    let mut state = shared.state.lock();
    loop {
        if state.stopping {
            return None;
        }
        if !state.deferred.is_empty() && !shared.pause.is_paused() {
            let count = state.requeue_deferred();
            trace!("pause over; {} deferred jobs queued again", count);
        }
        if let Some((priority, queued)) = state.queues.pop() {
            let completion = Completion::new();
            state.in_flight = Some(InFlight {
                job_type: queued.job.job_type(),
                source: queued.job.source(),
                token: queued.token.clone(),
                completion: completion.clone(),
            });
            return Some(NextJob {
                job: queued.job,
                token: queued.token,
                priority,
                completion,
            });
        }

        if state.deferred.is_empty() {
            shared.work_available.wait(&mut state);
        } else if let Some(until) = shared.pause.paused_until() {
            shared.work_available.wait_until(&mut state, until);
        }
    }
}

/// Run a job under `catch_unwind`
///
/// Returns `true` if the job panicked.
fn execute(job: &JobRef, ctx: &JobContext) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| job.run(ctx))) {
        Ok(()) => false,
        Err(payload) => {
            error!(
                "job '{}' panicked: {}; worker continues",
                job.name(),
                panic_message(payload.as_ref())
            );
            true
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}
