//! Bounded FIFO of pending generation jobs

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::job::Job;

/// Default number of jobs that may wait in the queue
pub const DEFAULT_CAPACITY: usize = 10;

/// Bounded job queue.
///
/// Producers never block: `enqueue` either admits the job or rejects it at
/// once. The single consumer blocks in `dequeue` until a job arrives. A
/// separate lock guards the list backing `contents()`, so status queries
/// never contend with the channel.
pub struct JobQueue {
    sender: mpsc::Sender<Job>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<Job>>,
    contents: Mutex<VecDeque<Job>>,
    capacity: usize,
    closed: AtomicBool,
    closed_notify: Notify,
    enqueued_count: AtomicU64,
    rejected_count: AtomicU64,
    dequeued_count: AtomicU64,
}

impl JobQueue {
    /// Create a queue with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a queue holding at most `capacity` jobs
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);

        Self {
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
            contents: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            closed: AtomicBool::new(false),
            closed_notify: Notify::new(),
            enqueued_count: AtomicU64::new(0),
            rejected_count: AtomicU64::new(0),
            dequeued_count: AtomicU64::new(0),
        }
    }

    /// Admit a job without waiting. Returns `false` when the queue is full.
    pub fn enqueue(&self, job: Job) -> bool {
        info!(prompt = %job.prompt(), seed = ?job.seed(), "Enqueueing job");

        // The snapshot lock is held across the send so a consumer can never
        // observe a job that is missing from the snapshot.
        let mut contents = self.contents.lock();
        if self.is_closed() {
            warn!("Queue is closed, rejecting job");
            self.rejected_count.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        match self.sender.try_send(job.clone()) {
            Ok(()) => {
                contents.push_back(job);
                self.enqueued_count.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!("Queue is full, rejecting job");
                self.rejected_count.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Queue is closed, rejecting job");
                self.rejected_count.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Wait for the next job in submission order.
    ///
    /// Returns `None` once the queue has been closed and drained. The
    /// channel slot is released before the job leaves the snapshot, so for a
    /// moment `contents()` may still list a job that `size()` no longer
    /// counts.
    pub async fn dequeue(&self) -> Option<Job> {
        let mut receiver = self.receiver.lock().await;

        let job = loop {
            let closed = self.closed_notify.notified();
            if self.is_closed() {
                match receiver.try_recv() {
                    Ok(job) => break job,
                    Err(_) => return None,
                }
            }

            tokio::select! {
                biased;
                job = receiver.recv() => break job?,
                _ = closed => continue,
            }
        };
        drop(receiver);

        let mut contents = self.contents.lock();
        if let Some(pos) = contents.iter().position(|queued| queued.id() == job.id()) {
            contents.remove(pos);
        }
        drop(contents);

        self.dequeued_count.fetch_add(1, Ordering::Relaxed);
        debug!(job_id = %job.id(), "Dequeued job");
        Some(job)
    }

    /// Stop admitting new jobs and wake a waiting consumer; already queued
    /// jobs can still be dequeued
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.closed_notify.notify_waiters();
        info!("Job queue closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of jobs waiting
    pub fn size(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Point-in-time copy of the waiting jobs, oldest first.
    ///
    /// Can briefly hold one more entry than `size()` while a job is being
    /// handed to the consumer.
    pub fn contents(&self) -> Vec<Job> {
        self.contents.lock().iter().cloned().collect()
    }

    /// Get queue statistics
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            size: self.size(),
            capacity: self.capacity,
            enqueued: self.enqueued_count.load(Ordering::Relaxed),
            rejected: self.rejected_count.load(Ordering::Relaxed),
            dequeued: self.dequeued_count.load(Ordering::Relaxed),
        }
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Queue statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct QueueStats {
    pub size: usize,
    pub capacity: usize,
    pub enqueued: u64,
    pub rejected: u64,
    pub dequeued: u64,
}
