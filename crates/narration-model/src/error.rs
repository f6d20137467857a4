//! Errors raised while loading narration data from disk.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

/// Errors that can occur when reading demo, alignment or bookmark files.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse error in {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Alignment failed for segment {segment_id}: {message}")]
    AlignmentFailed { segment_id: String, message: String },
}

/// Read and deserialize a JSON document.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ModelError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ModelError::IoError {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&raw).map_err(|e| ModelError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })
}
