//! Error types shared across Slidecast crates.
//!
//! Playback itself never aborts on media or sync problems; these errors
//! surface only at the edges (loading demos, alignment files, config).

use std::path::PathBuf;

/// Top-level error type for Slidecast operations.
#[derive(Debug, thiserror::Error)]
pub enum SlidecastError {
    #[error("Presentation error: {message}")]
    Presentation { message: String },

    #[error("Media error: {message}")]
    Media { message: String },

    #[error("Video sync error: {message}")]
    Sync { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using SlidecastError.
pub type SlidecastResult<T> = Result<T, SlidecastError>;

impl SlidecastError {
    pub fn presentation(msg: impl Into<String>) -> Self {
        Self::Presentation {
            message: msg.into(),
        }
    }

    pub fn media(msg: impl Into<String>) -> Self {
        Self::Media {
            message: msg.into(),
        }
    }

    pub fn sync(msg: impl Into<String>) -> Self {
        Self::Sync {
            message: msg.into(),
        }
    }
}
