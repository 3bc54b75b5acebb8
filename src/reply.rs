//! Reply sinks used when requests arrive over HTTP

use async_trait::async_trait;
use reqwest::Client;
use tracing::{error, info, warn};

use crate::job::{Outcome, ReplySink};

/// Posts each outcome as JSON to a callback URL supplied by the chat layer
pub struct WebhookSink {
    client: Client,
    callback_url: String,
}

impl WebhookSink {
    pub fn new(client: Client, callback_url: impl Into<String>) -> Self {
        Self {
            client,
            callback_url: callback_url.into(),
        }
    }
}

#[async_trait]
impl ReplySink for WebhookSink {
    async fn deliver(&self, outcome: Outcome) {
        match self.client.post(&self.callback_url).json(&outcome).send().await {
            Ok(response) if response.status().is_success() => {
                info!(callback = %self.callback_url, "Delivered reply");
            }
            Ok(response) => {
                warn!(
                    callback = %self.callback_url,
                    status = %response.status(),
                    "Callback rejected reply"
                );
            }
            Err(e) => {
                error!(callback = %self.callback_url, error = %e, "Failed to deliver reply");
            }
        }
    }
}

/// Writes outcomes to the log only
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl ReplySink for LogSink {
    async fn deliver(&self, outcome: Outcome) {
        let context = outcome.context();
        match &outcome {
            Outcome::Image { url, label, .. } => {
                info!(conversation = %context.conversation, thread = ?context.thread, url = %url, label = %label, "Image ready")
            }
            Outcome::Failure { message, .. } => {
                warn!(conversation = %context.conversation, thread = ?context.error_thread(), "{}", message)
            }
            Outcome::Notice { text, .. } => {
                info!(conversation = %context.conversation, thread = ?context.error_thread(), "{}", text)
            }
        }
    }
}
