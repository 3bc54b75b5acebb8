//! The single consumer of the job queue

use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::generator::{Generator, Operation};
use crate::job::{Job, Outcome};
use crate::messages;
use crate::queue::JobQueue;

/// Background task that takes jobs off the queue one at a time, runs them
/// through the generator and replies to whoever asked.
///
/// Being the only caller of the generator is what keeps the backend
/// exclusive.
pub struct Worker {
    queue: Arc<JobQueue>,
    generator: Arc<Generator>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    processed: Arc<AtomicU64>,
}

impl Worker {
    pub fn new(queue: Arc<JobQueue>, generator: Arc<Generator>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            queue,
            generator,
            shutdown_tx,
            task: Mutex::new(None),
            processed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start the processing loop. Does nothing if it is already running.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        self.shutdown_tx.send_replace(false);
        let shutdown_rx = self.shutdown_tx.subscribe();
        let queue = self.queue.clone();
        let generator = self.generator.clone();
        let processed = self.processed.clone();

        *task = Some(tokio::spawn(async move {
            work_loop(queue, generator, shutdown_rx, processed).await;
        }));
        info!("Started illustration worker");
    }

    /// Ask the loop to finish and wait for it.
    ///
    /// A job that is already being generated runs to completion and gets its
    /// reply before this returns; no further job is picked up.
    pub async fn stop(&self) {
        self.shutdown_tx.send_replace(true);

        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task ended abnormally");
            }
            info!("Stopped illustration worker");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Number of jobs that have received their reply
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }
}

async fn work_loop(
    queue: Arc<JobQueue>,
    generator: Arc<Generator>,
    mut shutdown_rx: watch::Receiver<bool>,
    processed: Arc<AtomicU64>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let job = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            job = queue.dequeue() => job,
        };

        let Some(job) = job else {
            warn!("Job queue closed, worker exiting");
            break;
        };

        info!(job_id = %job.id(), prompt = %job.prompt(), "Processing job from queue");
        process_job(&generator, job).await;
        processed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Generate for one job and deliver exactly one outcome
async fn process_job(generator: &Generator, job: Job) {
    let operation = Operation::for_job(&job);
    let context = job.reply_context().clone();

    let outcome = match AssertUnwindSafe(generator.run(&operation)).catch_unwind().await {
        Ok(Ok(url)) => Outcome::image(url, job.org_prompt(), job.prompt(), context),
        Ok(Err(e)) => {
            let message = messages::generation_failed(&e);
            error!(job_id = %job.id(), error = %e, "{}", message);
            Outcome::failure(message, context)
        }
        Err(panic) => {
            generator.release().await;
            let message = messages::generation_failed(panic_message(panic.as_ref()));
            error!(job_id = %job.id(), "Job processing panicked: {}", message);
            Outcome::failure(message, context)
        }
    };

    let delivery = AssertUnwindSafe(job.reply_sink().deliver(outcome)).catch_unwind().await;
    if delivery.is_err() {
        error!(job_id = %job.id(), "Reply sink panicked while delivering");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unexpected panic".to_string()
    }
}
