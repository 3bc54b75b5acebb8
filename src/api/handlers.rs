//! Request handlers for the command endpoints

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::command::{extract_url_from_text, CommandContext, ParentMessage};
use crate::error::{AppError, Result};
use crate::job::{JobKind, ReplyContext, ReplySink};
use crate::queue::QueueStats;
use crate::reply::{LogSink, WebhookSink};
use crate::AppState;

/// Language of an illustration prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Ja,
    En,
}

/// Envelope shared by all command endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct CommandRequest {
    /// Prompt, subject or word, depending on the command
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub language: Language,
    /// Conversation (channel) to reply to
    pub conversation: String,
    #[serde(default)]
    pub thread: Option<String>,
    /// Message that carried the command
    #[serde(default)]
    pub origin: Option<String>,
    /// Image URL of the parent message
    #[serde(default)]
    pub parent_url: Option<String>,
    /// Raw text of the parent message; used to find an image URL when
    /// `parent_url` is not given
    #[serde(default)]
    pub parent_text: Option<String>,
    #[serde(default)]
    pub parent_thread: Option<String>,
    /// Where outcomes are POSTed; logged only when absent
    #[serde(default)]
    pub callback_url: Option<String>,
}

impl CommandRequest {
    fn context(&self) -> CommandContext {
        let reply_context = ReplyContext::new(self.conversation.clone())
            .with_thread(self.thread.clone())
            .with_origin(self.origin.clone());

        let parent_url = self
            .parent_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .or_else(|| self.parent_text.as_deref().and_then(extract_url_from_text));

        let parent = parent_url.map(|url| ParentMessage {
            url,
            thread: self.parent_thread.clone().or_else(|| self.thread.clone()),
        });

        CommandContext::new(reply_context).with_parent(parent)
    }

    fn validate(&self, needs_text: bool) -> Result<()> {
        if self.conversation.trim().is_empty() {
            return Err(AppError::InvalidRequest("conversation is required".to_string()));
        }
        if needs_text && self.text.trim().is_empty() {
            return Err(AppError::InvalidRequest("text is required".to_string()));
        }
        Ok(())
    }
}

/// Answer to a command
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandReceipt {
    /// Whether a job was queued
    pub accepted: bool,
    pub queue_size: usize,
}

/// One waiting job as shown in the queue listing
#[derive(Debug, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: String,
    pub org_prompt: String,
    pub prompt: String,
    pub kind: String,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct QueueStatus {
    pub size: usize,
    pub capacity: usize,
    pub jobs: Vec<QueuedJob>,
    pub stats: QueueStats,
    pub worker_running: bool,
    pub backend_state: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub worker_running: bool,
}

fn sink_for(state: &AppState, request: &CommandRequest) -> Arc<dyn ReplySink> {
    match request.callback_url.as_deref().filter(|url| !url.trim().is_empty()) {
        Some(url) => Arc::new(WebhookSink::new(state.http_client.clone(), url)),
        None => Arc::new(LogSink),
    }
}

fn receipt(state: &AppState, accepted: bool) -> (StatusCode, Json<CommandReceipt>) {
    (
        StatusCode::ACCEPTED,
        Json(CommandReceipt {
            accepted,
            queue_size: state.pipeline.queue().size(),
        }),
    )
}

/// POST /v1/illust
pub async fn illust(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CommandRequest>,
) -> Result<(StatusCode, Json<CommandReceipt>)> {
    request.validate(true)?;
    let ctx = request.context();
    let sink = sink_for(&state, &request);
    let commands = state.pipeline.commands();

    let accepted = match request.language {
        Language::Ja => commands.handle_japanese_illust(&ctx, sink, &request.text).await,
        Language::En => commands.handle_english_illust(&ctx, sink, &request.text).await,
    };
    Ok(receipt(&state, accepted))
}

/// POST /v1/img2img
pub async fn img2img(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CommandRequest>,
) -> Result<(StatusCode, Json<CommandReceipt>)> {
    request.validate(true)?;
    let ctx = request.context();
    let sink = sink_for(&state, &request);

    let accepted = state.pipeline.commands().handle_img2img(&ctx, sink, &request.text).await;
    Ok(receipt(&state, accepted))
}

/// POST /v1/hokusai
pub async fn hokusai(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CommandRequest>,
) -> Result<(StatusCode, Json<CommandReceipt>)> {
    request.validate(true)?;
    let ctx = request.context();
    let sink = sink_for(&state, &request);

    let accepted = state.pipeline.commands().handle_hokusai(&ctx, sink, &request.text).await;
    Ok(receipt(&state, accepted))
}

/// POST /v1/poem
pub async fn poem(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CommandRequest>,
) -> Result<(StatusCode, Json<CommandReceipt>)> {
    request.validate(true)?;
    let ctx = request.context();
    let sink = sink_for(&state, &request);

    let accepted = state.pipeline.commands().handle_poem(&ctx, sink, &request.text).await;
    Ok(receipt(&state, accepted))
}

/// POST /v1/queue/report - queue status sent through the reply sink
pub async fn queue_report(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CommandRequest>,
) -> Result<(StatusCode, Json<CommandReceipt>)> {
    request.validate(false)?;
    let ctx = request.context();
    let sink = sink_for(&state, &request);

    state.pipeline.commands().handle_queue_status(&ctx, sink).await;
    Ok(receipt(&state, false))
}

/// GET /v1/queue
pub async fn queue_status(State(state): State<Arc<AppState>>) -> Json<QueueStatus> {
    let pipeline = &state.pipeline;
    let queue = pipeline.queue();

    let jobs = queue
        .contents()
        .iter()
        .map(|job| QueuedJob {
            id: job.id().to_string(),
            org_prompt: job.org_prompt().to_string(),
            prompt: job.prompt().to_string(),
            kind: match job.kind() {
                JobKind::TextToImage { .. } => "text2img".to_string(),
                JobKind::ImageToImage { .. } => "img2img".to_string(),
            },
            enqueued_at: job.enqueued_at(),
        })
        .collect();

    Json(QueueStatus {
        size: queue.size(),
        capacity: queue.capacity(),
        jobs,
        stats: queue.stats(),
        worker_running: pipeline.worker().is_running(),
        backend_state: pipeline.backend().state().to_string(),
    })
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        worker_running: state.pipeline.worker().is_running(),
    })
}
