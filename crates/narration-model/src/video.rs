//! Video bookmarks and marker-driven clip triggers.
//!
//! Bookmarks are named timestamps inside a named video. They are edited by
//! an external tool and are read-only here. Triggers attach to a narration
//! segment and say *when* (at which marker) and *how* a clip plays.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{read_json, ModelError};

/// A named timestamp inside one video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    pub id: String,
    /// Seconds from the start of the video.
    pub time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Bookmarks of one video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoBookmarks {
    /// Video source path or URL.
    pub src: String,
    #[serde(default)]
    pub bookmarks: Vec<Bookmark>,
}

impl VideoBookmarks {
    pub fn time_of(&self, bookmark_id: &str) -> Option<f64> {
        self.bookmarks
            .iter()
            .find(|b| b.id == bookmark_id)
            .map(|b| b.time)
    }
}

/// Bookmark store keyed by video id (`bookmarks.json`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookmarkStore {
    videos: BTreeMap<String, VideoBookmarks>,
}

impl BookmarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        read_json(path.as_ref())
    }

    pub fn insert(&mut self, video_id: impl Into<String>, video: VideoBookmarks) {
        self.videos.insert(video_id.into(), video);
    }

    pub fn video(&self, video_id: &str) -> Option<&VideoBookmarks> {
        self.videos.get(video_id)
    }

    /// Time of a bookmark, if both the video and the bookmark exist.
    pub fn lookup(&self, video_id: &str, bookmark_id: &str) -> Option<f64> {
        self.videos.get(video_id)?.time_of(bookmark_id)
    }

    pub fn video_ids(&self) -> impl Iterator<Item = &str> {
        self.videos.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.videos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.videos.is_empty()
    }
}

/// Identity of a clip: one video started at one bookmark.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClipKey {
    pub video_id: String,
    pub bookmark_id: String,
}

impl ClipKey {
    pub fn new(video_id: impl Into<String>, bookmark_id: impl Into<String>) -> Self {
        Self {
            video_id: video_id.into(),
            bookmark_id: bookmark_id.into(),
        }
    }
}

impl fmt::Display for ClipKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.video_id, self.bookmark_id)
    }
}

/// Start a clip when narration reaches a marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSeekTrigger {
    pub video_id: String,
    pub bookmark_id: String,
    pub at_marker: String,

    /// Pause narration until the clip finishes (pattern 1). When false the
    /// clip runs alongside narration (pattern 2).
    #[serde(default)]
    pub pause_narration: bool,

    #[serde(default = "default_auto_play")]
    pub auto_play: bool,

    /// Stop the clip at this bookmark instead of the natural end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_bookmark_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playback_rate: Option<f64>,
}

fn default_auto_play() -> bool {
    true
}

impl VideoSeekTrigger {
    pub fn clip_key(&self) -> ClipKey {
        ClipKey::new(&self.video_id, &self.bookmark_id)
    }
}

/// Stall narration at a marker while a pattern-2 clip is still running
/// (pattern 3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoWaitTrigger {
    pub video_id: String,
    pub bookmark_id: String,
    pub at_marker: String,
}

impl VideoWaitTrigger {
    pub fn clip_key(&self) -> ClipKey {
        ClipKey::new(&self.video_id, &self.bookmark_id)
    }
}
