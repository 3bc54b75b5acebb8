//! Short-lived files for images on their way to the image host

use rand::{distributions::Alphanumeric, Rng};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{AppError, Result};

const NAME_LENGTH: usize = 10;

/// The backend always returns PNG and the host is sent `image/png`
const EXTENSION: &str = "png";

/// A decoded image staged on disk. The file is removed by `remove()` or,
/// failing that, when the value is dropped.
#[derive(Debug)]
pub struct TransientFile {
    path: PathBuf,
    removed: bool,
}

impl TransientFile {
    /// Write `data` under a random name inside `dir`
    pub async fn write(dir: impl AsRef<Path>, data: &[u8]) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.exists() {
            fs::create_dir_all(dir).await.map_err(AppError::Io)?;
            debug!(path = ?dir, "Created scratch directory");
        }

        let path = dir.join(format!("{}.{}", random_name(NAME_LENGTH), EXTENSION));

        fs::write(&path, data).await.map_err(AppError::Io)?;
        debug!(path = ?path, size = data.len(), "Saved image file");

        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Delete the file now
    pub async fn remove(mut self) {
        self.removed = true;
        if let Err(e) = fs::remove_file(&self.path).await {
            warn!(path = ?self.path, error = %e, "Failed to remove transient file");
        }
    }
}

impl Drop for TransientFile {
    fn drop(&mut self) {
        if !self.removed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

fn random_name(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}
