//! Presentation (demo) definitions and playable segments.
//!
//! A presentation is an ordered list of slides; each slide holds ordered
//! narration segments. Segment definitions are static data loaded from
//! `presentation.json`. When the player enters a slide it builds a
//! [`Segment`] per definition, combining the definition with the slide's
//! alignment data.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::alignment::{resolve_markers, slide_key, AlignedWord, AlignmentEntry, ResolvedMarker};
use crate::error::{read_json, ModelError};
use crate::marker::parse_markers;
use crate::timing::{resolve_timing, ResolvedTimingConfig, TimingConfig};
use crate::video::{BookmarkStore, VideoSeekTrigger, VideoWaitTrigger};

/// Top-level presentation file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presentation {
    pub id: String,

    #[serde(default)]
    pub title: String,

    /// Demo-wide timing layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<TimingConfig>,

    #[serde(default)]
    pub slides: Vec<Slide>,
}

/// One slide of a presentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slide {
    pub chapter: u32,
    pub slide: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<TimingConfig>,

    #[serde(default)]
    pub segments: Vec<NarrationSegment>,
}

/// Static definition of a narrated audio segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrationSegment {
    pub id: String,

    /// Audio file, relative to the demo directory.
    pub audio: PathBuf,

    /// Narration text with inline markers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<TimingConfig>,

    /// Caption style override; opaque to playback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub video_seeks: Vec<VideoSeekTrigger>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub video_waits: Vec<VideoWaitTrigger>,
}

/// A playable segment: definition plus resolved alignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub id: String,
    pub audio_path: PathBuf,
    pub resolved_markers: Vec<ResolvedMarker>,
    pub words: Vec<AlignedWord>,
    pub timing: Option<TimingConfig>,
    pub style: Option<serde_json::Value>,
    pub video_seeks: Vec<VideoSeekTrigger>,
    pub video_waits: Vec<VideoWaitTrigger>,
}

impl Segment {
    /// Build a playable segment from its definition and alignment entry.
    ///
    /// Without an entry the segment has no words and no markers, so any
    /// trigger referencing its markers silently never fires. With narration
    /// text the markers are re-parsed and resolved against the entry's
    /// words; otherwise the entry's stored markers are used.
    pub fn build(def: &NarrationSegment, alignment: Option<&AlignmentEntry>) -> Self {
        let (resolved_markers, words) = match alignment {
            None => {
                tracing::debug!(segment = %def.id, "No alignment for segment; markers disabled");
                (Vec::new(), Vec::new())
            }
            Some(entry) => {
                let markers = match def.text.as_deref() {
                    Some(text) => {
                        let parsed = parse_markers(text);
                        if parsed.word_count() != entry.words.len() {
                            tracing::warn!(
                                segment = %def.id,
                                text_words = parsed.word_count(),
                                aligned_words = entry.words.len(),
                                "Narration and alignment word counts differ; alignment may be stale"
                            );
                        }
                        resolve_markers(&parsed.markers, &entry.words)
                    }
                    None => entry.markers.clone(),
                };
                (markers, entry.words.clone())
            }
        };

        Self {
            id: def.id.clone(),
            audio_path: def.audio.clone(),
            resolved_markers,
            words,
            timing: def.timing.clone(),
            style: def.style.clone(),
            video_seeks: def.video_seeks.clone(),
            video_waits: def.video_waits.clone(),
        }
    }

    /// Time of a marker in this segment's audio.
    pub fn marker_time(&self, id: &str) -> Option<f64> {
        self.resolved_markers
            .iter()
            .find(|m| m.id() == id)
            .map(|m| m.time)
    }

    /// Number of markers reached at `time`, for progressive reveals.
    pub fn reveal_index(&self, time: f64) -> usize {
        self.resolved_markers
            .iter()
            .filter(|m| m.time <= time)
            .count()
    }

    /// The latest marker reached at `time`.
    pub fn last_reached_marker(&self, time: f64) -> Option<&ResolvedMarker> {
        self.resolved_markers
            .iter()
            .filter(|m| m.time <= time)
            .max_by(|a, b| a.time.total_cmp(&b.time))
    }

    /// Index of the word being spoken at `time`.
    pub fn word_at(&self, time: f64) -> Option<usize> {
        self.words
            .iter()
            .position(|w| w.start <= time && time < w.end)
    }
}

impl Slide {
    pub fn alignment_key(&self) -> String {
        slide_key(self.chapter, self.slide)
    }
}

impl Presentation {
    /// Load a presentation file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        read_json(path.as_ref())
    }

    pub fn slide_count(&self) -> usize {
        self.slides.len()
    }

    pub fn is_last_slide(&self, slide_index: usize) -> bool {
        slide_index + 1 >= self.slides.len()
    }

    /// Timing for a position: demo → slide → segment.
    pub fn timing_for(&self, slide_index: usize, segment_index: Option<usize>) -> ResolvedTimingConfig {
        let slide = self.slides.get(slide_index);
        let segment =
            segment_index.and_then(|j| slide.and_then(|s| s.segments.get(j)));
        resolve_timing([
            self.timing.as_ref(),
            slide.and_then(|s| s.timing.as_ref()),
            segment.and_then(|s| s.timing.as_ref()),
        ])
    }

    /// Report trigger references that can never fire.
    ///
    /// Problems are reported, not rejected: playback tolerates all of them.
    pub fn validate(&self, bookmarks: &BookmarkStore) -> Vec<String> {
        let mut issues = Vec::new();
        let mut seen_slides = HashSet::new();

        for slide in &self.slides {
            let key = slide.alignment_key();
            if !seen_slides.insert(key.clone()) {
                issues.push(format!("{key}: duplicate slide"));
            }

            let mut seen_segments = HashSet::new();
            for segment in &slide.segments {
                let at = format!("{key}/{}", segment.id);
                if !seen_segments.insert(segment.id.as_str()) {
                    issues.push(format!("{at}: duplicate segment id"));
                }

                let marker_ids: Option<HashSet<String>> = segment.text.as_deref().map(|text| {
                    parse_markers(text)
                        .markers
                        .into_iter()
                        .map(|m| m.id)
                        .collect()
                });
                let knows_marker = |id: &str| {
                    marker_ids
                        .as_ref()
                        .map(|ids| ids.contains(id))
                        .unwrap_or(true)
                };

                for seek in &segment.video_seeks {
                    if !knows_marker(&seek.at_marker) {
                        issues.push(format!(
                            "{at}: seek on {} waits for unknown marker '{}'",
                            seek.clip_key(),
                            seek.at_marker
                        ));
                    }
                    check_bookmark(bookmarks, &seek.video_id, &seek.bookmark_id, &at, &mut issues);
                    if let Some(end) = &seek.end_bookmark_id {
                        check_bookmark(bookmarks, &seek.video_id, end, &at, &mut issues);
                    }
                    if let Some(rate) = seek.playback_rate {
                        if !(rate.is_finite() && rate > 0.0) {
                            issues.push(format!(
                                "{at}: seek on {} has invalid playback rate {rate}",
                                seek.clip_key()
                            ));
                        }
                    }
                }

                for wait in &segment.video_waits {
                    if !knows_marker(&wait.at_marker) {
                        issues.push(format!(
                            "{at}: wait on {} waits for unknown marker '{}'",
                            wait.clip_key(),
                            wait.at_marker
                        ));
                    }
                    let started_in_parallel = segment
                        .video_seeks
                        .iter()
                        .any(|s| !s.pause_narration && s.clip_key() == wait.clip_key());
                    if !started_in_parallel {
                        issues.push(format!(
                            "{at}: wait on {} has no non-pausing seek in the same segment",
                            wait.clip_key()
                        ));
                    }
                }
            }
        }

        issues
    }
}

fn check_bookmark(
    bookmarks: &BookmarkStore,
    video_id: &str,
    bookmark_id: &str,
    at: &str,
    issues: &mut Vec<String>,
) {
    match bookmarks.video(video_id) {
        None => issues.push(format!("{at}: unknown video '{video_id}'")),
        Some(video) if video.time_of(bookmark_id).is_none() => {
            issues.push(format!("{at}: unknown bookmark '{video_id}:{bookmark_id}'"))
        }
        Some(_) => {}
    }
}
