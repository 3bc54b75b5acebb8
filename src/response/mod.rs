//! Response handling module - Base64 decoding, staging, upload and seed URLs

pub mod base64;
pub mod file;
pub mod upload;
pub mod url;

use std::path::PathBuf;
use tracing::info;

use crate::error::Result;
use file::TransientFile;
use upload::ImageHost;

/// Turns a backend image into a hosted, seed-carrying URL
pub struct ImagePublisher {
    scratch_dir: PathBuf,
    host: ImageHost,
}

impl ImagePublisher {
    pub fn new(scratch_dir: impl Into<PathBuf>, host: ImageHost) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            host,
        }
    }

    /// Decode, stage, upload, verify. The returned URL carries `seed` so the
    /// same image can be requested again.
    pub async fn publish(&self, b64_image: &str, seed: i64) -> Result<String> {
        let data = base64::decode(b64_image)?;

        let staged = TransientFile::write(&self.scratch_dir, &data).await?;
        let uploaded = self.host.upload(&staged).await;
        staged.remove().await;

        let url = url::with_seed(&uploaded?, seed);
        self.host.verify(&url).await?;

        info!(url = %url, seed = seed, "Image published");
        Ok(url)
    }
}
