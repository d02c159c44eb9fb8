//! Scheduler errors

use std::io;

/// Errors raised by the scheduler itself
///
/// Job failures never surface here; they stay inside the job.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The worker thread could not be spawned
    #[error("failed to spawn worker thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
