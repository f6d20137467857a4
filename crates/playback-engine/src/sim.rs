//! Simulated media backend and video player.
//!
//! Nothing is decoded: a segment "plays" for a known duration measured on
//! the tokio clock, so paused-time tests and the CLI `simulate` command run
//! the exact orchestrator code paths without audio hardware.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use slidecast_common::clock::secs_to_duration;
use slidecast_common::error::{SlidecastError, SlidecastResult};
use slidecast_narration_model::LoadedDemo;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::media::{EventSink, HandleId, MediaBackend, MediaEvent, MediaHandle, PlaybackEvent};
use crate::video_sync::{ClipRequest, VideoPlayer};

/// Silence kept after the last aligned word.
const TAIL_SECS: f64 = 0.25;

/// Timed stand-in for an audio stack.
pub struct SimulatedMediaBackend {
    events: EventSink,
    durations: HashMap<PathBuf, Duration>,
    default_duration: Duration,
    missing: HashSet<PathBuf>,
    failing: HashSet<PathBuf>,
    opened: Arc<Mutex<Vec<PathBuf>>>,
}

impl SimulatedMediaBackend {
    pub fn new(events: EventSink) -> Self {
        Self {
            events,
            durations: HashMap::new(),
            default_duration: Duration::from_secs(2),
            missing: HashSet::new(),
            failing: HashSet::new(),
            opened: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Derive each segment's duration from its aligned words.
    pub fn from_demo(demo: &LoadedDemo, events: EventSink) -> Self {
        let mut backend = Self::new(events);
        for slide in &demo.presentation.slides {
            let key = slide.alignment_key();
            for segment in &slide.segments {
                let Some(last) = demo
                    .alignment
                    .entry(&key, &segment.id)
                    .and_then(|e| e.words.last())
                else {
                    continue;
                };
                backend.durations.insert(
                    demo.asset_path(&segment.audio),
                    secs_to_duration(last.end + TAIL_SECS),
                );
            }
        }
        tracing::debug!(segments = backend.durations.len(), "Simulated durations from alignment");
        backend
    }

    pub fn with_duration(mut self, path: impl Into<PathBuf>, duration: Duration) -> Self {
        self.durations.insert(path.into(), duration);
        self
    }

    pub fn with_default_duration(mut self, duration: Duration) -> Self {
        self.default_duration = duration;
        self
    }

    /// Loading this path reports `LoadFailed`.
    pub fn with_missing(mut self, path: impl Into<PathBuf>) -> Self {
        self.missing.insert(path.into());
        self
    }

    /// Playing this path reports `PlaybackFailed` halfway through.
    pub fn with_failing(mut self, path: impl Into<PathBuf>) -> Self {
        self.failing.insert(path.into());
        self
    }

    /// Every path opened so far, in order.
    pub fn opened(&self) -> Arc<Mutex<Vec<PathBuf>>> {
        Arc::clone(&self.opened)
    }
}

impl MediaBackend for SimulatedMediaBackend {
    fn open(&mut self, id: HandleId, path: &Path) -> Box<dyn MediaHandle> {
        if let Ok(mut opened) = self.opened.lock() {
            opened.push(path.to_path_buf());
        }

        let event = if self.missing.contains(path) {
            MediaEvent::LoadFailed {
                reason: SlidecastError::FileNotFound {
                    path: path.to_path_buf(),
                }
                .to_string(),
            }
        } else {
            MediaEvent::Ready
        };
        let _ = self.events.send(PlaybackEvent::Media { handle: id, event });

        Box::new(SimulatedHandle {
            id,
            path: path.to_path_buf(),
            events: self.events.clone(),
            duration: self
                .durations
                .get(path)
                .copied()
                .unwrap_or(self.default_duration),
            fails: self.failing.contains(path),
            position: Duration::ZERO,
            playing_since: None,
            task: None,
        })
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

struct SimulatedHandle {
    id: HandleId,
    path: PathBuf,
    events: EventSink,
    duration: Duration,
    fails: bool,
    position: Duration,
    playing_since: Option<Instant>,
    task: Option<JoinHandle<()>>,
}

impl SimulatedHandle {
    fn elapsed(&self) -> Duration {
        let running = self
            .playing_since
            .map(|since| since.elapsed())
            .unwrap_or_default();
        (self.position + running).min(self.duration)
    }

    fn cancel_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl MediaHandle for SimulatedHandle {
    fn play(&mut self) -> SlidecastResult<()> {
        if self.playing_since.is_some() {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SlidecastError::media(format!("No async runtime for playback: {e}")))?;

        let remaining = self.duration.saturating_sub(self.position);
        let (wait, event) = if self.fails {
            (
                remaining / 2,
                MediaEvent::PlaybackFailed {
                    reason: "simulated decode error".to_string(),
                },
            )
        } else {
            (remaining, MediaEvent::Ended)
        };

        let id = self.id;
        let events = self.events.clone();
        self.playing_since = Some(Instant::now());
        self.task = Some(runtime.spawn(async move {
            tokio::time::sleep(wait).await;
            let _ = events.send(PlaybackEvent::Media { handle: id, event });
        }));
        Ok(())
    }

    fn pause(&mut self) {
        self.position = self.elapsed();
        self.playing_since = None;
        self.cancel_task();
    }

    fn current_time(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SimulatedHandle {
    fn drop(&mut self) {
        self.cancel_task();
    }
}

/// Video player that finishes each clip after its simulated length.
pub struct SimulatedVideoPlayer {
    events: EventSink,
    default_clip: Duration,
    requests: Arc<Mutex<Vec<ClipRequest>>>,
}

impl SimulatedVideoPlayer {
    /// `default_clip` is used for clips without an end bookmark.
    pub fn new(events: EventSink, default_clip: Duration) -> Self {
        Self {
            events,
            default_clip,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every clip requested so far, in order.
    pub fn requests(&self) -> Arc<Mutex<Vec<ClipRequest>>> {
        Arc::clone(&self.requests)
    }

    fn clip_length(&self, request: &ClipRequest) -> Duration {
        let rate = if request.playback_rate > 0.0 {
            request.playback_rate
        } else {
            1.0
        };
        match request.end {
            Some(end) => secs_to_duration((end - request.start) / rate),
            None => self.default_clip.div_f64(rate),
        }
    }
}

impl VideoPlayer for SimulatedVideoPlayer {
    fn play_clip(&mut self, request: ClipRequest) {
        let length = self.clip_length(&request);
        tracing::debug!(
            clip = %request.ticket.key,
            start = request.start,
            ?length,
            auto_play = request.auto_play,
            "Simulated clip"
        );
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        let finished = PlaybackEvent::ClipFinished(request.ticket);
        let events = self.events.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    tokio::time::sleep(length).await;
                    let _ = events.send(finished);
                });
            }
            Err(_) => {
                tracing::warn!("No async runtime; finishing clip immediately");
                let _ = events.send(finished);
            }
        }
    }
}
