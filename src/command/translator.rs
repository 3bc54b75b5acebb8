//! Prompt translation through a chat-completion model

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::TranslatorConfig;
use crate::error::{AppError, Result};

const TO_ENGLISH_PROMPT: &str =
    "あなたは優秀な通訳です。以下の日本語を自然な英語に翻訳してください。返答は翻訳した内容だけにしてください。";
const TO_JAPANESE_PROMPT: &str =
    "あなたは優秀な通訳です。以下の英語を自然な日本語に翻訳してください。返答は翻訳した内容だけにしてください。";
const POEM_PROMPT: &str =
    "あなたは画像生成ＡＩのプロンプト職人です。ワードの場面を情景的に英語で説明してください。";

/// Turns user text into something the generation backend understands
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate_to_english(&self, text: &str) -> Result<String>;

    async fn translate_to_japanese(&self, text: &str) -> Result<String>;

    /// Describe the scene a word evokes, in English
    async fn generate_poem_prompt(&self, word: &str) -> Result<String>;
}

/// Returns every text unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughTranslator;

#[async_trait]
impl Translator for PassthroughTranslator {
    async fn translate_to_english(&self, text: &str) -> Result<String> {
        Ok(text.to_string())
    }

    async fn translate_to_japanese(&self, text: &str) -> Result<String> {
        Ok(text.to_string())
    }

    async fn generate_poem_prompt(&self, word: &str) -> Result<String> {
        Ok(word.to_string())
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Translator backed by an OpenAI-compatible `/v1/chat/completions` endpoint
pub struct ChatCompletionTranslator {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl ChatCompletionTranslator {
    pub fn new(config: &TranslatorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    async fn send_message(&self, text: &str, system: &str) -> Result<String> {
        info!(text = %text, "Sending message to chat model");

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: text,
                },
            ],
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Translation(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Translation(format!("Chat model returned {}: {}", status, body)));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::Translation(format!("Failed to parse response: {}", e)))?;

        let answer = chat
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| AppError::Translation("Chat model returned no answer".to_string()))?;

        debug!(answer = %answer, "Received chat model answer");
        Ok(answer)
    }
}

#[async_trait]
impl Translator for ChatCompletionTranslator {
    async fn translate_to_english(&self, text: &str) -> Result<String> {
        self.send_message(text, TO_ENGLISH_PROMPT).await
    }

    async fn translate_to_japanese(&self, text: &str) -> Result<String> {
        self.send_message(text, TO_JAPANESE_PROMPT).await
    }

    async fn generate_poem_prompt(&self, word: &str) -> Result<String> {
        self.send_message(word, POEM_PROMPT).await
    }
}
