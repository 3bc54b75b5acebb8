//! Generation jobs and the contracts for replying to their requester

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Seed value asking the backend to pick a random seed
pub const DEFAULT_SEED: i64 = -1;

/// Where a reply for a request has to be routed
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReplyContext {
    /// Conversation (channel) the request came from
    pub conversation: String,
    /// Thread of the parent message, if the request was made inside one
    pub thread: Option<String>,
    /// The message that triggered the request
    pub origin: Option<String>,
}

impl ReplyContext {
    pub fn new(conversation: impl Into<String>) -> Self {
        Self {
            conversation: conversation.into(),
            thread: None,
            origin: None,
        }
    }

    pub fn with_thread(mut self, thread: Option<String>) -> Self {
        self.thread = thread;
        self
    }

    pub fn with_origin(mut self, origin: Option<String>) -> Self {
        self.origin = origin;
        self
    }

    /// Thread an error or notice should land in
    pub fn error_thread(&self) -> Option<&str> {
        self.thread.as_deref().or(self.origin.as_deref())
    }
}

/// Result of a request, as delivered to the requester
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outcome {
    /// A generated image, labelled with the user-facing prompt
    Image {
        url: String,
        label: String,
        alt_text: String,
        context: ReplyContext,
    },
    /// Generation failed for good
    Failure { message: String, context: ReplyContext },
    /// Status or policy message that is not tied to a generated image
    Notice { text: String, context: ReplyContext },
}

impl Outcome {
    pub fn image(
        url: impl Into<String>,
        label: impl Into<String>,
        alt_text: impl Into<String>,
        context: ReplyContext,
    ) -> Self {
        Self::Image {
            url: url.into(),
            label: label.into(),
            alt_text: alt_text.into(),
            context,
        }
    }

    pub fn failure(message: impl Into<String>, context: ReplyContext) -> Self {
        Self::Failure {
            message: message.into(),
            context,
        }
    }

    pub fn notice(text: impl Into<String>, context: ReplyContext) -> Self {
        Self::Notice {
            text: text.into(),
            context,
        }
    }

    pub fn context(&self) -> &ReplyContext {
        match self {
            Self::Image { context, .. } => context,
            Self::Failure { context, .. } => context,
            Self::Notice { context, .. } => context,
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Self::Image { .. })
    }
}

/// Capability for sending an outcome back to the requester
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn deliver(&self, outcome: Outcome);
}

/// The generation operation a job asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobKind {
    TextToImage { seed: Option<i64> },
    ImageToImage { source_url: String },
}

/// One queued image-generation request. Immutable once built.
#[derive(Clone)]
pub struct Job {
    id: Uuid,
    prompt: String,
    org_prompt: String,
    seed: Option<i64>,
    source_image_url: Option<String>,
    reply_context: ReplyContext,
    reply_sink: Arc<dyn ReplySink>,
    enqueued_at: DateTime<Utc>,
}

impl Job {
    /// A text-to-image job
    pub fn text_to_image(
        prompt: impl Into<String>,
        org_prompt: impl Into<String>,
        seed: Option<i64>,
        reply_context: ReplyContext,
        reply_sink: Arc<dyn ReplySink>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt: prompt.into(),
            org_prompt: org_prompt.into(),
            seed,
            source_image_url: None,
            reply_context,
            reply_sink,
            enqueued_at: Utc::now(),
        }
    }

    /// An image-to-image job transforming the image at `source_image_url`
    pub fn image_to_image(
        source_image_url: impl Into<String>,
        prompt: impl Into<String>,
        org_prompt: impl Into<String>,
        reply_context: ReplyContext,
        reply_sink: Arc<dyn ReplySink>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt: prompt.into(),
            org_prompt: org_prompt.into(),
            seed: None,
            source_image_url: Some(source_image_url.into()),
            reply_context,
            reply_sink,
            enqueued_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn org_prompt(&self) -> &str {
        &self.org_prompt
    }

    pub fn seed(&self) -> Option<i64> {
        self.seed
    }

    pub fn source_image_url(&self) -> Option<&str> {
        self.source_image_url.as_deref()
    }

    pub fn reply_context(&self) -> &ReplyContext {
        &self.reply_context
    }

    pub fn reply_sink(&self) -> &Arc<dyn ReplySink> {
        &self.reply_sink
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    /// Which operation this job needs; decided by the presence of a source image
    pub fn kind(&self) -> JobKind {
        match &self.source_image_url {
            Some(url) => JobKind::ImageToImage {
                source_url: url.clone(),
            },
            None => JobKind::TextToImage { seed: self.seed },
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("prompt", &self.prompt)
            .field("org_prompt", &self.org_prompt)
            .field("seed", &self.seed)
            .field("source_image_url", &self.source_image_url)
            .field("reply_context", &self.reply_context)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
