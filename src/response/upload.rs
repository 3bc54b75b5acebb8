//! Client for the image-hosting side service

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::ImageHostConfig;
use crate::error::{AppError, Result};
use crate::response::file::TransientFile;

/// Form field the image host reads the upload from
const UPLOAD_FIELD: &str = "imagedata";

/// Uploads images and hands back the URL they are served under
#[derive(Clone)]
pub struct ImageHost {
    client: Client,
    base_url: String,
}

impl ImageHost {
    pub fn new(config: &ImageHostConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self::with_client(client, config.base_url()))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Upload a staged file as a multipart form; the response body is the URL
    pub async fn upload(&self, file: &TransientFile) -> Result<String> {
        let bytes = tokio::fs::read(file.path()).await?;
        let size = bytes.len();

        let part = Part::bytes(bytes)
            .file_name(file.file_name())
            .mime_str("image/png")
            .map_err(|e| AppError::Upload(format!("Invalid mime type: {}", e)))?;
        let form = Form::new().part(UPLOAD_FIELD, part);

        let url = format!("{}/", self.base_url);
        debug!(url = %url, size = size, "Uploading image");

        let response = self.client.post(&url).multipart(form).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(AppError::Upload(format!(
                "Image host returned {}: {}",
                status,
                body.trim()
            )));
        }

        let hosted = body.trim();
        if hosted.is_empty() {
            return Err(AppError::Upload("Image host returned an empty body".to_string()));
        }

        info!(url = %hosted, "Uploaded image");
        Ok(hosted.to_string())
    }

    /// Fetch a hosted URL once to make sure it is actually served
    pub async fn verify(&self, url: &str) -> Result<()> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::Upload(format!(
                "Hosted image {} is not reachable: {}",
                url,
                response.status()
            )));
        }
        Ok(())
    }
}
