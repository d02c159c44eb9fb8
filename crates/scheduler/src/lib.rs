//! Notecanvas Scheduler Library
//!
//! Background job scheduler with four strict-priority FIFO queues and a
//! single worker thread.
//!
//! Jobs are shared handles (`Arc<dyn Job>`) tagged with a [`JobType`] and an
//! optional [`SourceId`]. The interactive thread submits them; the worker
//! runs them one at a time, Urgent before High before Low before None.
//! Cancellation by source is synchronous and can wait for the job in flight,
//! so the caller may destroy the source as soon as it returns.
//!
//! # Example
//!
//! ```
//! use notecanvas_scheduler::{FnJob, JobPriority, JobType, Scheduler, SourceId};
//!
//! let scheduler = Scheduler::new();
//! scheduler.start().unwrap();
//!
//! let page = SourceId::from_raw(42);
//! let queued = scheduler.submit_unique(page, JobType::Render, JobPriority::Urgent, || {
//!     FnJob::new(JobType::Render, |ctx| {
//!         if ctx.is_paused() {
//!             // Queued again when the pause ends
//!             ctx.defer_until_resumed();
//!             return;
//!         }
//!         // ... repaint the page ...
//!     })
//!     .with_source(page)
//!     .into_ref()
//! });
//! assert!(queued);
//!
//! scheduler.remove_all_of_source_and_type_any_priority(page, JobType::Render, true);
//! scheduler.stop();
//! ```

mod blocking;
mod cancel;
mod completion;
mod dispatch;
mod error;
mod job;
mod priority;
mod scheduler;
mod worker;

// Re-export public API
pub use blocking::{BlockingJob, InputBlocker};
pub use cancel::{CancellationToken, PauseGate};
pub use completion::Completion;
pub use dispatch::{ChannelDispatcher, UiDispatcher, UiQueue, UiTask};
pub use error::{SchedulerError, SchedulerResult};
pub use job::{FnJob, Job, JobContext, JobRef, JobType, SourceId};
pub use priority::{JobPriority, PriorityQueueSet};
pub use scheduler::{Scheduler, SchedulerStats, DEFAULT_WORKER_NAME};
