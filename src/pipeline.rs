//! Wiring of queue, backend, generator, worker and command handler

use std::sync::Arc;
use tracing::info;

use crate::backend::{GenerationBackend, ProcessGroup, StableDiffusionService};
use crate::clock::{Clock, TokioClock};
use crate::command::{ChatCompletionTranslator, CommandHandler, PassthroughTranslator, Translator};
use crate::config::Settings;
use crate::error::Result;
use crate::generator::{Generator, RetryPolicy};
use crate::queue::JobQueue;
use crate::response::{upload::ImageHost, ImagePublisher};
use crate::worker::Worker;

/// The illustration pipeline: one queue, one worker, one backend
pub struct Pipeline {
    queue: Arc<JobQueue>,
    backend: Arc<dyn GenerationBackend>,
    worker: Worker,
    commands: CommandHandler,
}

impl Pipeline {
    /// Assemble the pipeline from its parts
    pub fn new(
        capacity: usize,
        backend: Arc<dyn GenerationBackend>,
        translator: Arc<dyn Translator>,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let queue = Arc::new(JobQueue::with_capacity(capacity));
        let generator = Arc::new(Generator::new(backend.clone(), policy, clock));
        let worker = Worker::new(queue.clone(), generator);
        let commands = CommandHandler::new(queue.clone(), translator);

        Self {
            queue,
            backend,
            worker,
            commands,
        }
    }

    /// Build the production pipeline described by `settings`
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock);

        let publisher = ImagePublisher::new(
            settings.backend.scratch_dir.clone(),
            ImageHost::new(&settings.image_host)?,
        );
        let backend = StableDiffusionService::new(
            &settings.backend,
            settings.generation.clone(),
            Box::new(ProcessGroup::from_config(&settings.backend)),
            publisher,
            clock.clone(),
        )?;

        let translator: Arc<dyn Translator> = if settings.translator.enabled {
            Arc::new(ChatCompletionTranslator::new(&settings.translator)?)
        } else {
            info!("No translator configured, prompts are passed through untranslated");
            Arc::new(PassthroughTranslator)
        };

        Ok(Self::new(
            settings.queue.capacity,
            Arc::new(backend),
            translator,
            RetryPolicy::from(&settings.retry),
            clock,
        ))
    }

    pub fn start(&self) {
        self.worker.start();
    }

    /// Finish the in-flight job, then make sure the backend is down
    pub async fn shutdown(&self) {
        self.worker.stop().await;
        self.backend.stop().await;
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    pub fn commands(&self) -> &CommandHandler {
        &self.commands
    }

    pub fn backend(&self) -> &Arc<dyn GenerationBackend> {
        &self.backend
    }
}
