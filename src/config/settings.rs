//! Application settings and configuration management

use crate::error::{AppError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub image_host: ImageHostConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub translator: TranslatorConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub api_keys: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_keys: vec![],
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Job queue configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

fn default_queue_capacity() -> usize {
    10
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
        }
    }
}

/// Stable Diffusion process and API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// `host:port` of the WebUI API, with or without a scheme
    #[serde(default = "default_backend_host")]
    pub host: String,
    /// Directory the WebUI is launched from
    #[serde(default = "default_working_dir")]
    pub working_dir: String,
    #[serde(default = "default_command")]
    pub command: String,
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    #[serde(default = "default_startup_wait")]
    pub startup_wait_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Where decoded images are staged before upload
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: String,
}

fn default_backend_host() -> String {
    "127.0.0.1:7861".to_string()
}

fn default_working_dir() -> String {
    ".".to_string()
}

fn default_command() -> String {
    "./webui.sh".to_string()
}

fn default_args() -> Vec<String> {
    [
        "--skip-python-version-check",
        "--skip-torch-cuda-test",
        "--nowebui",
        "--no-hashing",
        "--skip-version-check",
        "--allow-code",
        "--medvram",
        "--xformers",
        "--enable-insecure-extension-access",
        "--api",
        "--opt-channelslast",
        "--disable-gpu-warning",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_startup_wait() -> u64 {
    25
}

fn default_request_timeout() -> u64 {
    600
}

fn default_connect_timeout() -> u64 {
    60
}

fn default_scratch_dir() -> String {
    std::env::temp_dir().to_string_lossy().to_string()
}

impl BackendConfig {
    pub fn startup_wait(&self) -> Duration {
        Duration::from_secs(self.startup_wait_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn base_url(&self) -> String {
        http_base(&self.host)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: default_backend_host(),
            working_dir: default_working_dir(),
            command: default_command(),
            args: default_args(),
            startup_wait_secs: default_startup_wait(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            scratch_dir: default_scratch_dir(),
        }
    }
}

/// Image hosting side-service configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImageHostConfig {
    #[serde(default = "default_image_host")]
    pub host: String,
    #[serde(default = "default_upload_timeout")]
    pub timeout_secs: u64,
}

fn default_image_host() -> String {
    "127.0.0.1:4567".to_string()
}

fn default_upload_timeout() -> u64 {
    60
}

impl ImageHostConfig {
    pub fn base_url(&self) -> String {
        http_base(&self.host)
    }
}

impl Default for ImageHostConfig {
    fn default() -> Self {
        Self {
            host: default_image_host(),
            timeout_secs: default_upload_timeout(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub delay_secs: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    10
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            delay_secs: default_retry_delay(),
        }
    }
}

/// Generation parameters layered over the built-in payload defaults
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    #[serde(default = "default_dimension")]
    pub width: u32,
    #[serde(default = "default_dimension")]
    pub height: u32,
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default = "default_cfg_scale")]
    pub cfg_scale: f32,
    #[serde(default = "default_sampler")]
    pub sampler: String,
    #[serde(default)]
    pub negative_prompt: String,
}

fn default_dimension() -> u32 {
    512
}

fn default_steps() -> u32 {
    25
}

fn default_cfg_scale() -> f32 {
    1.0
}

fn default_sampler() -> String {
    "Euler a".to_string()
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            width: default_dimension(),
            height: default_dimension(),
            steps: default_steps(),
            cfg_scale: default_cfg_scale(),
            sampler: default_sampler(),
            negative_prompt: String::new(),
        }
    }
}

/// Chat-completion translator configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranslatorConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_translator_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_translator_model")]
    pub model: String,
    #[serde(default = "default_translator_timeout")]
    pub timeout_secs: u64,
}

fn default_translator_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_translator_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_translator_timeout() -> u64 {
    60
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_translator_url(),
            api_key: String::new(),
            model: default_translator_model(),
            timeout_secs: default_translator_timeout(),
        }
    }
}

/// Prefix a bare `host:port` with `http://` and strip any trailing slash
pub fn http_base(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    }
}

impl Settings {
    /// Load settings from configuration files and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/default.toml")
    }

    /// Load settings from a specific configuration file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        // A missing .env is fine
        let _ = dotenvy::dotenv();

        let config = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("queue.capacity", 10)?
            .add_source(File::with_name(path.as_ref().to_str().unwrap_or("config/default")).required(false))
            // Override with environment variables (prefixed with ILLUST__)
            .add_source(
                Environment::with_prefix("ILLUST")
                    .separator("__")
                    .list_separator(" ")
                    .with_list_parse_key("backend.args")
                    .with_list_parse_key("auth.api_keys")
                    .try_parsing(true),
            )
            // Variable names used by existing deployments
            .set_override_option("backend.working_dir", std::env::var("SD_PATH").ok())?
            .set_override_option("backend.host", std::env::var("STABLE_DIFFUSION_HOST").ok())?
            .set_override_option("image_host.host", std::env::var("IMAGE_SERVER_HOST").ok())?
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(invalid("Server port cannot be 0"));
        }
        if self.queue.capacity == 0 {
            return Err(invalid("Queue capacity must be at least 1"));
        }
        if self.backend.host.trim().is_empty() {
            return Err(invalid("Backend host cannot be empty"));
        }
        if self.backend.command.trim().is_empty() {
            return Err(invalid("Backend command cannot be empty"));
        }
        if self.image_host.host.trim().is_empty() {
            return Err(invalid("Image host cannot be empty"));
        }
        if self.generation.width == 0 || self.generation.height == 0 {
            return Err(invalid("Generation width and height must be positive"));
        }
        if self.translator.enabled && self.translator.api_key.is_empty() {
            return Err(invalid("Translator is enabled but no API key is set"));
        }

        Ok(())
    }
}

fn invalid(message: &str) -> AppError {
    AppError::Config(config::ConfigError::Message(message.to_string()))
}
