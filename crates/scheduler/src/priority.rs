//! Priority levels and the four-queue set consulted by the worker
//!
//! Jobs are kept in one FIFO queue per priority level. The worker always
//! serves the highest-priority non-empty queue; within one level jobs run
//! in submission order.

use std::collections::VecDeque;

/// Job priority levels
///
/// Lower variants are served first: `Urgent` before `High` before `Low`
/// before `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobPriority {
    /// Page renders the user is waiting for
    Urgent = 0,

    /// Thumbnails and other visible-but-secondary work
    High = 1,

    /// Prefetch and housekeeping
    Low = 2,

    /// Runs only when nothing else is queued
    None = 3,
}

impl JobPriority {
    /// All priorities in service order.
    pub const ALL: [JobPriority; 4] = [
        JobPriority::Urgent,
        JobPriority::High,
        JobPriority::Low,
        JobPriority::None,
    ];

    fn slot(self) -> usize {
        self as usize
    }
}

/// Four FIFO queues consulted in strict priority order
///
/// Not synchronised on its own; the scheduler keeps it behind its queue lock.
#[derive(Debug)]
pub struct PriorityQueueSet<T> {
    queues: [VecDeque<T>; 4],
}

impl<T> PriorityQueueSet<T> {
    /// Create an empty queue set
    pub fn new() -> Self {
        Self {
            queues: Default::default(),
        }
    }

    /// Append an item to the tail of the queue for `priority`
    pub fn push(&mut self, priority: JobPriority, item: T) {
        self.queues[priority.slot()].push_back(item);
    }

    /// Pop the front of the highest-priority non-empty queue
    pub fn pop(&mut self) -> Option<(JobPriority, T)> {
        JobPriority::ALL.iter().find_map(|&priority| {
            self.queues[priority.slot()]
                .pop_front()
                .map(|item| (priority, item))
        })
    }

    /// Priority of the item `pop` would return next
    pub fn peek_priority(&self) -> Option<JobPriority> {
        JobPriority::ALL
            .iter()
            .copied()
            .find(|priority| !self.queues[priority.slot()].is_empty())
    }

    /// Total number of queued items
    pub fn len(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    /// Number of items queued at one priority
    pub fn len_of(&self, priority: JobPriority) -> usize {
        self.queues[priority.slot()].len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.iter().all(VecDeque::is_empty)
    }

    /// Whether any item queued at `priority` matches the predicate
    pub fn any_in<F>(&self, priority: JobPriority, predicate: F) -> bool
    where
        F: Fn(&T) -> bool,
    {
        self.queues[priority.slot()].iter().any(predicate)
    }

    /// Remove every item at `priority` matching the predicate
    ///
    /// The relative order of the remaining items is preserved. Removed items
    /// are returned in their queue order.
    pub fn remove_if<F>(&mut self, priority: JobPriority, predicate: F) -> Vec<T>
    where
        F: Fn(&T) -> bool,
    {
        let queue = &mut self.queues[priority.slot()];
        let mut removed = Vec::new();
        let mut kept = VecDeque::with_capacity(queue.len());

        for item in queue.drain(..) {
            if predicate(&item) {
                removed.push(item);
            } else {
                kept.push_back(item);
            }
        }

        *queue = kept;
        removed
    }

    /// Remove every item in every queue
    pub fn drain_all(&mut self) -> Vec<T> {
        self.queues
            .iter_mut()
            .flat_map(|queue| queue.drain(..))
            .collect()
    }

    /// Iterate over queued items in service order
    pub fn iter(&self) -> impl Iterator<Item = (JobPriority, &T)> {
        JobPriority::ALL.iter().flat_map(move |&priority| {
            self.queues[priority.slot()]
                .iter()
                .map(move |item| (priority, item))
        })
    }
}

impl<T> Default for PriorityQueueSet<T> {
    fn default() -> Self {
        Self::new()
    }
}
