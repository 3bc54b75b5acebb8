//! Turns illustration commands into queued jobs

use std::future::Future;
use std::sync::Arc;
use tracing::{error, info};

use crate::command::translator::Translator;
use crate::error::{AppError, Result};
use crate::job::{Job, Outcome, ReplyContext, ReplySink, DEFAULT_SEED};
use crate::messages;
use crate::queue::JobQueue;
use crate::response::url::seed_from_url;

/// Message a command was issued under, usually one carrying an earlier image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentMessage {
    /// Image URL found in the parent message
    pub url: String,
    /// Thread the parent message belongs to
    pub thread: Option<String>,
}

/// Everything the chat layer knows about where a command came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandContext {
    pub reply_context: ReplyContext,
    pub parent: Option<ParentMessage>,
}

impl CommandContext {
    pub fn new(reply_context: ReplyContext) -> Self {
        Self {
            reply_context,
            parent: None,
        }
    }

    pub fn with_parent(mut self, parent: Option<ParentMessage>) -> Self {
        self.parent = parent;
        self
    }

    /// Seed and thread to reuse from the parent image, if there is one
    fn parent_info(&self) -> (i64, Option<String>) {
        match &self.parent {
            Some(parent) => (
                seed_from_url(&parent.url).unwrap_or(DEFAULT_SEED),
                parent.thread.clone(),
            ),
            None => (DEFAULT_SEED, None),
        }
    }

    /// Reply routing for a job; image replies go to the parent's thread
    fn job_context(&self, thread: Option<String>) -> ReplyContext {
        ReplyContext {
            conversation: self.reply_context.conversation.clone(),
            thread,
            origin: self.reply_context.origin.clone(),
        }
    }
}

/// Pull the first http(s) URL out of free text, as chat messages carry them
pub fn extract_url_from_text(text: &str) -> Option<String> {
    let (start, _) = text
        .match_indices("http")
        .find(|(i, _)| text[*i..].starts_with("http://") || text[*i..].starts_with("https://"))?;
    let url: String = text[start..]
        .chars()
        .take_while(|c| !c.is_whitespace() && *c != '<' && *c != '>' && *c != '|')
        .collect();
    Some(url)
}

/// Command entry points of the illustration plugin
pub struct CommandHandler {
    queue: Arc<JobQueue>,
    translator: Arc<dyn Translator>,
}

impl CommandHandler {
    pub fn new(queue: Arc<JobQueue>, translator: Arc<dyn Translator>) -> Self {
        Self { queue, translator }
    }

    /// Japanese prompt: translated, then queued
    pub async fn handle_japanese_illust(
        &self,
        ctx: &CommandContext,
        sink: Arc<dyn ReplySink>,
        prompt: &str,
    ) -> bool {
        info!(prompt = %prompt, "Received japanese illustration request");

        self.guard("handle_japanese_illust", ctx, &sink, async {
            let (seed, thread) = ctx.parent_info();
            let translated = self.translator.translate_to_english(prompt).await?;
            let job = Job::text_to_image(translated, prompt, Some(seed), ctx.job_context(thread), sink.clone());
            Ok(self.enqueue_job(job).await)
        })
        .await
    }

    /// English prompt: queued as is
    pub async fn handle_english_illust(
        &self,
        ctx: &CommandContext,
        sink: Arc<dyn ReplySink>,
        prompt: &str,
    ) -> bool {
        info!(prompt = %prompt, "Received english illustration request");

        self.guard("handle_english_illust", ctx, &sink, async {
            let (seed, thread) = ctx.parent_info();
            let job = Job::text_to_image(prompt, prompt, Some(seed), ctx.job_context(thread), sink.clone());
            Ok(self.enqueue_job(job).await)
        })
        .await
    }

    /// Transform the parent image. Without one nothing is queued.
    pub async fn handle_img2img(
        &self,
        ctx: &CommandContext,
        sink: Arc<dyn ReplySink>,
        prompt: &str,
    ) -> bool {
        info!(prompt = %prompt, "Received img2img request");

        let Some(parent) = ctx.parent.as_ref() else {
            self.handle_missing_parent_image(ctx, sink.as_ref()).await;
            return false;
        };

        self.guard("handle_img2img", ctx, &sink, async {
            let translated = self.translator.translate_to_english(prompt).await?;
            info!(prompt = %translated, url = %parent.url, "Translated prompt");

            let job = Job::image_to_image(
                parent.url.clone(),
                translated,
                prompt,
                ctx.job_context(parent.thread.clone()),
                sink.clone(),
            );
            Ok(self.enqueue_job(job).await)
        })
        .await
    }

    /// Ukiyo-e in the style of Hokusai
    pub async fn handle_hokusai(
        &self,
        ctx: &CommandContext,
        sink: Arc<dyn ReplySink>,
        subject: &str,
    ) -> bool {
        let prompt = messages::hokusai_prompt(subject);
        info!(prompt = %prompt, "Received hokusai request");

        self.guard("handle_hokusai", ctx, &sink, async {
            let (seed, thread) = ctx.parent_info();
            let translated = self.translator.translate_to_english(&prompt).await?;
            let job = Job::text_to_image(translated, prompt.as_str(), Some(seed), ctx.job_context(thread), sink.clone());
            Ok(self.enqueue_job(job).await)
        })
        .await
    }

    /// Scene description generated from a single word
    pub async fn handle_poem(&self, ctx: &CommandContext, sink: Arc<dyn ReplySink>, word: &str) -> bool {
        info!(word = %word, "Received poem request");

        self.guard("handle_poem", ctx, &sink, async {
            let prompt = self.translator.generate_poem_prompt(word).await?;
            let label = self.translator.translate_to_japanese(&prompt).await?;
            let job = Job::text_to_image(prompt, label, None, ctx.job_context(None), sink.clone());
            Ok(self.enqueue_job(job).await)
        })
        .await
    }

    /// Report the queue length and what is waiting
    pub async fn handle_queue_status(&self, ctx: &CommandContext, sink: Arc<dyn ReplySink>) {
        let length = self.queue.size();
        info!(size = length, "Current queue size");

        sink.deliver(Outcome::notice(messages::queue_length(length), ctx.reply_context.clone()))
            .await;

        let contents = self.queue.contents();
        if !contents.is_empty() {
            let listing = contents
                .iter()
                .map(|job| job.org_prompt())
                .collect::<Vec<_>>()
                .join("\n");
            sink.deliver(Outcome::notice(listing, ctx.reply_context.clone())).await;
        }
    }

    async fn enqueue_job(&self, job: Job) -> bool {
        let sink = job.reply_sink().clone();
        let context = job.reply_context().clone();

        let admitted = self.queue.enqueue(job);
        if !admitted {
            sink.deliver(Outcome::notice(messages::QUEUE_FULL, context)).await;
        }
        admitted
    }

    async fn handle_missing_parent_image(&self, ctx: &CommandContext, sink: &dyn ReplySink) {
        let reply = &ctx.reply_context;
        let context = ReplyContext {
            conversation: reply.conversation.clone(),
            thread: reply.error_thread().map(str::to_string),
            origin: reply.origin.clone(),
        };
        sink.deliver(Outcome::notice(messages::MISSING_SOURCE_IMAGE, context)).await;
    }

    /// Run a handler body; errors are logged and reported to the requester
    async fn guard<F>(&self, name: &str, ctx: &CommandContext, sink: &Arc<dyn ReplySink>, body: F) -> bool
    where
        F: Future<Output = Result<bool>>,
    {
        match body.await {
            Ok(admitted) => admitted,
            Err(e) => {
                error!("Error in {}: {}", name, error_text(&e));
                sink.deliver(Outcome::notice(
                    messages::command_error(error_text(&e)),
                    ctx.reply_context.clone(),
                ))
                .await;
                false
            }
        }
    }
}

fn error_text(error: &AppError) -> String {
    match error {
        AppError::Translation(message) => message.clone(),
        other => other.to_string(),
    }
}
