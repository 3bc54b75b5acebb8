//! Base64 helpers for backend image payloads

use base64::{engine::general_purpose::STANDARD, Engine};
use crate::error::{AppError, Result};

/// Encode binary data to base64 string
pub fn encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode an image returned by the backend.
///
/// Accepts both bare base64 and data URLs (`data:image/png;base64,...`).
pub fn decode(encoded: &str) -> Result<Vec<u8>> {
    let data = strip_data_url(encoded);

    STANDARD
        .decode(data.trim())
        .map_err(|e| AppError::Backend(format!("Invalid base64 image data: {}", e)))
}

fn strip_data_url(data: &str) -> &str {
    match data.split_once(',') {
        Some((prefix, payload)) if prefix.starts_with("data:") => payload,
        _ => data,
    }
}
