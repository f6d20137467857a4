//! On-disk demo bundle.
//!
//! ```text
//! <demo>/
//!   presentation.json   slides, segments, triggers (required)
//!   alignment.json      c{chapter}_s{slide} -> entries (optional)
//!   bookmarks.json      videoId -> bookmarks (optional)
//!   audio/              segment audio, referenced relative to the root
//! ```

use std::path::{Path, PathBuf};

use crate::alignment::AlignmentData;
use crate::error::ModelError;
use crate::presentation::Presentation;
use crate::video::BookmarkStore;

pub const PRESENTATION_FILE: &str = "presentation.json";
pub const ALIGNMENT_FILE: &str = "alignment.json";
pub const BOOKMARKS_FILE: &str = "bookmarks.json";

/// The complete in-memory representation of a demo directory.
#[derive(Debug, Clone)]
pub struct LoadedDemo {
    /// Filesystem path to the demo directory.
    pub root: PathBuf,

    pub presentation: Presentation,

    /// Empty when the demo has not been aligned yet.
    pub alignment: AlignmentData,

    /// Empty when the demo uses no video.
    pub bookmarks: BookmarkStore,
}

impl LoadedDemo {
    /// Load a demo from a directory.
    pub fn load(root: impl AsRef<Path>) -> Result<Self, ModelError> {
        let root = root.as_ref().to_path_buf();

        let presentation = Presentation::load(root.join(PRESENTATION_FILE))?;

        let alignment_path = root.join(ALIGNMENT_FILE);
        let alignment = if alignment_path.exists() {
            AlignmentData::load(&alignment_path)?
        } else {
            tracing::debug!(path = %alignment_path.display(), "No alignment file; markers disabled");
            AlignmentData::new()
        };

        let bookmarks_path = root.join(BOOKMARKS_FILE);
        let bookmarks = if bookmarks_path.exists() {
            BookmarkStore::load(&bookmarks_path)?
        } else {
            BookmarkStore::new()
        };

        tracing::info!(
            demo = %presentation.id,
            slides = presentation.slide_count(),
            videos = bookmarks.len(),
            "Loaded demo"
        );

        Ok(Self {
            root,
            presentation,
            alignment,
            bookmarks,
        })
    }

    /// Absolute path of an asset referenced relative to the demo root.
    pub fn asset_path(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    /// Report segment audio files that are missing on disk.
    pub fn validate_sources(&self) -> Vec<String> {
        let mut errors = vec![];
        for slide in &self.presentation.slides {
            for segment in &slide.segments {
                if !self.asset_path(&segment.audio).exists() {
                    errors.push(format!(
                        "{}/{}: audio missing: {}",
                        slide.alignment_key(),
                        segment.id,
                        segment.audio.display()
                    ));
                }
            }
        }
        errors
    }
}
