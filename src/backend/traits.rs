//! Common traits and types for the generation backend

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

use crate::error::Result;

/// Lifecycle of the backend process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// An exclusive, restartable image generation backend.
///
/// Only one caller (the worker) is expected to drive an instance; nothing
/// here serializes concurrent use.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Bring up a fresh backend, replacing any running one
    async fn start(&self) -> Result<()>;

    /// Tear the backend down. Safe to call at any time, never fails.
    async fn stop(&self);

    /// Generate from a prompt; returns the hosted image URL
    async fn text_to_image(&self, prompt: &str, seed: Option<i64>) -> Result<String>;

    /// Transform the image at `source_url`; returns the hosted image URL
    async fn image_to_image(&self, source_url: &str, prompt: &str) -> Result<String>;

    /// Current lifecycle state
    fn state(&self) -> ServiceState;
}

/// OS-level handle on the backend process (group)
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Launch the process
    async fn spawn(&self) -> Result<()>;

    /// Terminate and reap the process if there is one. Never fails.
    async fn terminate(&self);

    fn is_running(&self) -> bool;
}
