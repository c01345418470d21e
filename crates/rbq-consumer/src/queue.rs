//! Bounded FIFO buffer between the broker reader and the workers.
//!
//! Capacity is enforced with a pair of semaphores: `slots` counts free
//! places and `available` counts queued jobs, so the length can never
//! exceed the capacity. Every dequeued job hands out a [`QueuedJob`] lease
//! whose drop marks the job done, which is what [`JobQueue::join`] waits on.

use parking_lot::Mutex;
use rbq_core::Job;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::time::timeout;
use tracing::warn;

pub const DEFAULT_CAPACITY: usize = 500;

pub struct JobQueue {
    items: Mutex<VecDeque<Job>>,
    capacity: usize,
    slots: Semaphore,
    available: Semaphore,
    /// Jobs enqueued but not yet marked done
    unfinished: watch::Sender<usize>,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        let (unfinished, _) = watch::channel(0);
        JobQueue {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            slots: Semaphore::new(capacity),
            available: Semaphore::new(0),
            unfinished,
        }
    }

    /// Append a job, waiting up to `wait` for a free slot.
    ///
    /// On timeout the job is handed back so the caller can retry it.
    pub async fn enqueue(&self, job: Job, wait: Duration) -> Result<(), Job> {
        match timeout(wait, self.slots.acquire()).await {
            Ok(Ok(permit)) => permit.forget(),
            _ => return Err(job),
        }

        self.unfinished.send_modify(|n| *n += 1);
        self.items.lock().push_back(job);
        self.available.add_permits(1);
        Ok(())
    }

    /// Take the oldest job, waiting up to `wait` for one to arrive.
    pub async fn dequeue(&self, wait: Duration) -> Option<QueuedJob<'_>> {
        let permit = timeout(wait, self.available.acquire()).await.ok()?.ok()?;
        permit.forget();

        let job = self.items.lock().pop_front()?;
        self.slots.add_permits(1);

        Some(QueuedJob { queue: self, job })
    }

    /// Record that one dequeued job has been fully handled.
    ///
    /// Normally called by dropping the [`QueuedJob`] lease.
    pub fn mark_done(&self) {
        self.unfinished.send_modify(|n| {
            if *n == 0 {
                warn!("mark_done called more times than jobs were enqueued");
            } else {
                *n -= 1;
            }
        });
    }

    /// Resolve once every enqueued job has been marked done.
    pub async fn join(&self) {
        let mut rx = self.unfinished.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn unfinished(&self) -> usize {
        *self.unfinished.borrow()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// A job taken off the queue. Dropping it marks the slot done, whether
/// processing succeeded, failed or panicked.
pub struct QueuedJob<'a> {
    queue: &'a JobQueue,
    job: Job,
}

impl QueuedJob<'_> {
    pub fn job(&self) -> &Job {
        &self.job
    }
}

impl Drop for QueuedJob<'_> {
    fn drop(&mut self) {
        self.queue.mark_done();
    }
}
