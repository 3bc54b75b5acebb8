//! Retry policy around the generation backend

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::backend::GenerationBackend;
use crate::clock::Clock;
use crate::config::RetryConfig;
use crate::error::Result;
use crate::job::{Job, JobKind};

/// Retries after the first failed attempt
pub const MAX_RETRIES: u32 = 3;

/// Wait between attempts
pub const RETRY_DELAY: Duration = Duration::from_secs(10);

/// How often and how patiently to retry a failed generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            delay: RETRY_DELAY,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            delay: Duration::from_secs(config.delay_secs),
        }
    }
}

/// A generation call bound to its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    TextToImage { prompt: String, seed: Option<i64> },
    ImageToImage { source_url: String, prompt: String },
}

impl Operation {
    pub fn for_job(job: &Job) -> Self {
        match job.kind() {
            JobKind::TextToImage { seed } => Self::TextToImage {
                prompt: job.prompt().to_string(),
                seed,
            },
            JobKind::ImageToImage { source_url } => Self::ImageToImage {
                source_url,
                prompt: job.prompt().to_string(),
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::TextToImage { .. } => "text2img generation",
            Self::ImageToImage { .. } => "img2img generation",
        }
    }
}

/// Runs operations against a backend that is restarted for every attempt
pub struct Generator {
    backend: Arc<dyn GenerationBackend>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl Generator {
    pub fn new(backend: Arc<dyn GenerationBackend>, policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run `operation`, retrying on failure.
    ///
    /// The backend is stopped after every failed attempt and once more after
    /// the last one, whatever the outcome.
    pub async fn run(&self, operation: &Operation) -> Result<String> {
        let result = self.run_with_retry(operation).await;
        self.release().await;
        result
    }

    /// Stop the backend
    pub async fn release(&self) {
        self.backend.stop().await;
    }

    async fn run_with_retry(&self, operation: &Operation) -> Result<String> {
        let mut retry_count = 0;

        loop {
            match self.attempt(operation).await {
                Ok(url) => return Ok(url),
                Err(e) => {
                    error!(operation = operation.name(), error = %e, "Generation attempt failed");
                    self.backend.stop().await;

                    if retry_count >= self.policy.max_retries {
                        return Err(e);
                    }

                    retry_count += 1;
                    info!(
                        operation = operation.name(),
                        retry = retry_count,
                        max_retries = self.policy.max_retries,
                        "Retrying generation"
                    );
                    self.clock.sleep(self.policy.delay).await;
                }
            }
        }
    }

    async fn attempt(&self, operation: &Operation) -> Result<String> {
        self.backend.start().await?;

        match operation {
            Operation::TextToImage { prompt, seed } => self.backend.text_to_image(prompt, *seed).await,
            Operation::ImageToImage { source_url, prompt } => {
                self.backend.image_to_image(source_url, prompt).await
            }
        }
    }
}
