//! Stable Diffusion WebUI backend: process lifecycle plus the HTTP API

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::backend::traits::{GenerationBackend, ProcessSupervisor, ServiceState};
use crate::clock::Clock;
use crate::config::{BackendConfig, GenerationConfig};
use crate::error::{AppError, Result};
use crate::job::DEFAULT_SEED;
use crate::response::{base64, ImagePublisher};

const TXT2IMG_PATH: &str = "/sdapi/v1/txt2img";
const IMG2IMG_PATH: &str = "/sdapi/v1/img2img";

/// Response body of both generation endpoints
#[derive(Debug, Deserialize)]
struct ApiGenerateResponse {
    #[serde(default)]
    images: Vec<String>,
    /// JSON document, usually delivered as a string, holding the used seed
    #[serde(default)]
    info: Option<Value>,
}

/// Generation backend driving a local Stable Diffusion WebUI
pub struct StableDiffusionService {
    process: Box<dyn ProcessSupervisor>,
    clock: Arc<dyn Clock>,
    client: Client,
    base_url: String,
    startup_wait: Duration,
    params: GenerationConfig,
    publisher: ImagePublisher,
    state: Mutex<ServiceState>,
}

impl StableDiffusionService {
    pub fn new(
        config: &BackendConfig,
        params: GenerationConfig,
        process: Box<dyn ProcessSupervisor>,
        publisher: ImagePublisher,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            process,
            clock,
            client,
            base_url: config.base_url(),
            startup_wait: config.startup_wait(),
            params,
            publisher,
            state: Mutex::new(ServiceState::Stopped),
        })
    }

    fn set_state(&self, state: ServiceState) {
        *self.state.lock() = state;
        debug!(state = %state, "Backend state changed");
    }

    /// txt2img request body: defaults, configured parameters, then `overrides`
    pub fn txt2img_payload(&self, overrides: Value) -> Value {
        let mut payload = txt2img_defaults();
        apply_params(&mut payload, &self.params, "sampler_name");
        overlay(payload, overrides)
    }

    /// img2img request body: defaults, configured parameters, then `overrides`
    pub fn img2img_payload(&self, overrides: Value) -> Value {
        let mut payload = img2img_defaults();
        apply_params(&mut payload, &self.params, "sampler_index");
        overlay(payload, overrides)
    }

    async fn submit(&self, path: &str, payload: &Value) -> Result<String> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(request_error)?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Backend(format!("Backend returned {}: {}", status, body)));
        }

        let api_response: ApiGenerateResponse = response
            .json()
            .await
            .map_err(|e| AppError::Backend(format!("Failed to parse response: {}", e)))?;

        let seed = resolved_seed(api_response.info.as_ref())?;
        info!(seed = seed, "Generated image");

        let image = api_response
            .images
            .first()
            .ok_or_else(|| AppError::Backend("Response contained no images".to_string()))?;

        self.publisher.publish(image, seed).await
    }

    async fn fetch_source(&self, source_url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(source_url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl GenerationBackend for StableDiffusionService {
    async fn start(&self) -> Result<()> {
        info!("Starting SD process");
        self.stop().await;

        self.set_state(ServiceState::Starting);
        if let Err(e) = self.process.spawn().await {
            self.set_state(ServiceState::Stopped);
            return Err(e);
        }

        // No readiness endpoint is polled; the WebUI gets a fixed settle time.
        self.clock.sleep(self.startup_wait).await;
        self.set_state(ServiceState::Running);
        Ok(())
    }

    async fn stop(&self) {
        self.set_state(ServiceState::Stopping);
        self.process.terminate().await;
        self.set_state(ServiceState::Stopped);
        info!("SD process stopped");
    }

    async fn text_to_image(&self, prompt: &str, seed: Option<i64>) -> Result<String> {
        let payload = self.txt2img_payload(json!({
            "prompt": prompt,
            "seed": seed.unwrap_or(DEFAULT_SEED),
        }));
        debug!(payload = %payload, "Sending txt2img request");

        self.submit(TXT2IMG_PATH, &payload).await
    }

    async fn image_to_image(&self, source_url: &str, prompt: &str) -> Result<String> {
        let source = self.fetch_source(source_url).await?;
        let payload = self.img2img_payload(json!({
            "prompt": prompt,
            "init_images": [base64::encode(&source)],
        }));
        debug!(prompt = %prompt, source = %source_url, "Sending img2img request");

        self.submit(IMG2IMG_PATH, &payload).await
    }

    fn state(&self) -> ServiceState {
        *self.state.lock()
    }
}

fn request_error(e: reqwest::Error) -> AppError {
    if e.is_timeout() {
        AppError::Timeout(format!("Backend request timed out: {}", e))
    } else {
        AppError::HttpClient(e)
    }
}

/// Seed actually used by the backend, from the `info` document
fn resolved_seed(info: Option<&Value>) -> Result<i64> {
    let info = match info {
        Some(Value::String(raw)) => serde_json::from_str::<Value>(raw)
            .map_err(|e| AppError::Backend(format!("Invalid info document: {}", e)))?,
        Some(value) => value.clone(),
        None => return Err(AppError::Backend("Response contained no info".to_string())),
    };

    info.get("seed")
        .and_then(Value::as_i64)
        .ok_or_else(|| AppError::Backend("Response info has no seed".to_string()))
}

/// Copy every top-level field of `overrides` over `base`
pub fn overlay(base: Value, overrides: Value) -> Value {
    match (base, overrides) {
        (Value::Object(mut base), Value::Object(overrides)) => {
            for (key, value) in overrides {
                base.insert(key, value);
            }
            Value::Object(base)
        }
        (base, Value::Null) => base,
        (_, overrides) => overrides,
    }
}

fn apply_params(payload: &mut Value, params: &GenerationConfig, sampler_key: &str) {
    if let Value::Object(map) = payload {
        map.insert("width".into(), json!(params.width));
        map.insert("height".into(), json!(params.height));
        map.insert("steps".into(), json!(params.steps));
        map.insert("cfg_scale".into(), json!(params.cfg_scale));
        map.insert(sampler_key.into(), json!(params.sampler));
        map.insert("negative_prompt".into(), json!(params.negative_prompt));
    }
}

fn txt2img_defaults() -> Value {
    json!({
        "enable_hr": false,
        "denoising_strength": 0,
        "firstphase_width": 0,
        "firstphase_height": 0,
        "hr_scale": 2,
        "hr_upscaler": "string",
        "hr_second_pass_steps": 0,
        "hr_resize_x": 0,
        "hr_resize_y": 0,
        "prompt": "",
        "styles": [""],
        "seed": DEFAULT_SEED,
        "subseed": -1,
        "subseed_strength": 0,
        "seed_resize_from_h": -1,
        "seed_resize_from_w": -1,
        "sampler_name": "Euler a",
        "scheduler": "Simple",
        "batch_size": 1,
        "n_iter": 1,
        "steps": 25,
        "cfg_scale": 1,
        "distilled_cfg_scale": 3.5,
        "width": 512,
        "height": 512,
        "restore_faces": false,
        "tiling": false,
        "do_not_save_samples": false,
        "do_not_save_grid": false,
        "negative_prompt": "",
        "eta": 0,
        "s_churn": 0,
        "s_tmax": 0,
        "s_tmin": 0,
        "s_noise": 1,
        "override_settings": {},
        "override_settings_restore_afterwards": true,
        "script_args": [],
        "send_images": true,
        "save_images": false,
        "alwayson_scripts": {},
    })
}

fn img2img_defaults() -> Value {
    json!({
        "prompt": "",
        "negative_prompt": "",
        "seed": DEFAULT_SEED,
        "batch_size": 1,
        "n_iter": 1,
        "steps": 25,
        "cfg_scale": 1,
        "scheduler": "Simple",
        "distilled_cfg_scale": 3.5,
        "width": 512,
        "height": 512,
        "denoising_strength": 0.75,
        "comments": {},
        "init_images": Value::Null,
        "sampler_index": "Euler a",
    })
}
