//! Illustration generation gateway
//!
//! Queues image-generation requests coming from a chat assistant and runs
//! them one at a time against a Stable Diffusion WebUI process that is
//! started and stopped around every attempt.

pub mod api;
pub mod backend;
pub mod clock;
pub mod command;
pub mod config;
pub mod error;
pub mod generator;
pub mod job;
pub mod messages;
pub mod middleware;
pub mod pipeline;
pub mod queue;
pub mod reply;
pub mod response;
pub mod worker;

pub use error::{AppError, Result};

use std::sync::Arc;

use pipeline::Pipeline;

/// Application state shared across all handlers
pub struct AppState {
    pub settings: Arc<config::Settings>,
    pub pipeline: Arc<Pipeline>,
    /// Client used for reply callbacks
    pub http_client: reqwest::Client,
}
