//! Forced-alignment data and marker time resolution.
//!
//! The alignment service maps each segment's audio against its clean text
//! and returns one timed entry per spoken word. Markers parsed from the
//! narration are anchored to word indices; this module turns those indices
//! into absolute seconds.
//!
//! Alignment files are keyed by slide (`c{chapter}_s{slide}`) and hold one
//! entry per segment.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{read_json, ModelError};
use crate::marker::{Anchor, Marker};

/// One spoken word with its audio interval (seconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedWord {
    pub word: String,
    pub start: f64,
    pub end: f64,
    /// Alignment confidence in `[0, 1]`.
    #[serde(default)]
    pub score: f64,
}

impl AlignedWord {
    pub fn new(word: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            word: word.into(),
            start,
            end,
            score: 1.0,
        }
    }
}

/// A marker with its absolute time in the segment audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedMarker {
    #[serde(flatten)]
    pub marker: Marker,
    /// Seconds from the start of the segment audio.
    pub time: f64,
}

impl ResolvedMarker {
    pub fn id(&self) -> &str {
        &self.marker.id
    }
}

/// Resolve marker word indices to times.
///
/// Markers whose index has no corresponding word are dropped with a
/// warning; the rest keep their input order.
pub fn resolve_markers(markers: &[Marker], words: &[AlignedWord]) -> Vec<ResolvedMarker> {
    markers
        .iter()
        .filter_map(|marker| {
            let word = usize::try_from(marker.word_index)
                .ok()
                .and_then(|idx| words.get(idx));
            let Some(word) = word else {
                tracing::warn!(
                    marker = %marker.id,
                    word_index = marker.word_index,
                    word_count = words.len(),
                    "Marker word index out of range; dropping marker"
                );
                return None;
            };
            let time = match marker.anchor {
                Anchor::Start => word.start,
                Anchor::End => word.end,
            };
            Some(ResolvedMarker {
                marker: marker.clone(),
                time,
            })
        })
        .collect()
}

/// Alignment record of one segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlignmentEntry {
    pub segment_id: String,
    /// Hash of the audio the words were aligned against.
    #[serde(default)]
    pub audio_hash: String,
    /// Hash of the narration text at alignment time.
    #[serde(default)]
    pub narration_hash: String,
    #[serde(default)]
    pub words: Vec<AlignedWord>,
    /// Markers resolved when the entry was produced.
    #[serde(default)]
    pub markers: Vec<ResolvedMarker>,
}

/// Alignment key of a slide.
pub fn slide_key(chapter: u32, slide: u32) -> String {
    format!("c{chapter}_s{slide}")
}

/// Alignment data of a whole demo (`alignment.json`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlignmentData {
    slides: BTreeMap<String, Vec<AlignmentEntry>>,
}

impl AlignmentData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        read_json(path.as_ref())
    }

    pub fn slide(&self, key: &str) -> &[AlignmentEntry] {
        self.slides.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn entry(&self, key: &str, segment_id: &str) -> Option<&AlignmentEntry> {
        self.slide(key).iter().find(|e| e.segment_id == segment_id)
    }

    /// Replace the entries of one slide.
    pub fn set_slide(&mut self, key: impl Into<String>, entries: Vec<AlignmentEntry>) {
        self.slides.insert(key.into(), entries);
    }

    /// Insert or replace a single segment's entry.
    pub fn upsert(&mut self, key: impl Into<String>, entry: AlignmentEntry) {
        let entries = self.slides.entry(key.into()).or_default();
        match entries.iter_mut().find(|e| e.segment_id == entry.segment_id) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.slides.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.slides.is_empty()
    }
}

/// Alignment data for the active demo.
///
/// The cache is explicitly initialized when a demo is opened and cleared
/// when it is closed or another demo takes over; nothing is global.
#[derive(Debug, Clone, Default)]
pub struct AlignmentCache {
    demo_id: Option<String>,
    data: AlignmentData,
}

impl AlignmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load alignment for a demo, replacing whatever was cached.
    pub fn init(&mut self, demo_id: impl Into<String>, data: AlignmentData) {
        let demo_id = demo_id.into();
        tracing::debug!(demo = %demo_id, slides = data.slides.len(), "Alignment cache initialized");
        self.demo_id = Some(demo_id);
        self.data = data;
    }

    pub fn clear(&mut self) {
        if let Some(demo) = self.demo_id.take() {
            tracing::debug!(demo = %demo, "Alignment cache cleared");
        }
        self.data = AlignmentData::default();
    }

    pub fn demo_id(&self) -> Option<&str> {
        self.demo_id.as_deref()
    }

    pub fn is_loaded_for(&self, demo_id: &str) -> bool {
        self.demo_id.as_deref() == Some(demo_id)
    }

    /// Install fresh entries for one slide after a regeneration.
    pub fn refresh(&mut self, key: impl Into<String>, entries: Vec<AlignmentEntry>) {
        self.data.set_slide(key, entries);
    }

    pub fn entry(&self, key: &str, segment_id: &str) -> Option<&AlignmentEntry> {
        self.data.entry(key, segment_id)
    }

    pub fn data(&self) -> &AlignmentData {
        &self.data
    }
}

/// A request to align one segment's audio against its clean text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentRequest {
    pub segment_id: String,
    pub audio_path: std::path::PathBuf,
    pub clean_text: String,
}

/// Forced-alignment collaborator.
pub trait AlignmentService {
    /// Align audio against marker-free reference text.
    fn align(&self, audio_path: &Path, clean_text: &str) -> Result<Vec<AlignedWord>, ModelError>;
}

/// Align a batch of segments; a failed item is logged and skipped without
/// aborting the rest of the batch.
pub fn align_batch<S: AlignmentService + ?Sized>(
    service: &S,
    requests: &[AlignmentRequest],
) -> Vec<(String, Vec<AlignedWord>)> {
    let mut aligned = Vec::with_capacity(requests.len());
    for request in requests {
        match service.align(&request.audio_path, &request.clean_text) {
            Ok(words) => aligned.push((request.segment_id.clone(), words)),
            Err(e) => {
                tracing::warn!(
                    segment = %request.segment_id,
                    error = %e,
                    "Alignment failed; skipping segment"
                );
            }
        }
    }
    aligned
}
