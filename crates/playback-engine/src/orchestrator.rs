//! Narrated playback state machine.
//!
//! The orchestrator sequences the segments of a demo: it owns the single
//! active media handle, the one pending timer and the frame sampler, and it
//! applies the narration commands returned by the [`VideoSyncCoordinator`].
//! It never blocks and never spawns; callers feed it events, timer polls and
//! frame ticks with the current instant (see [`crate::driver`]).
//!
//! ```text
//! Idle ─▶ StartSilence ─▶ PlayingSegment(i,j) ─▶ InterSegmentDelay ─▶ PlayingSegment(i,j+1)
//!                              │  ▲
//!                              │  └──────────── InterSlideDelay ◀─┐
//!                              └────────────────────────────────────┴─▶ FinalDelay ─▶ Complete
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use slidecast_common::clock::FramePacer;
use slidecast_common::config::PlaybackDefaults;
use slidecast_common::error::{SlidecastError, SlidecastResult};
use slidecast_narration_model::{
    AlignmentCache, AlignmentEntry, LoadedDemo, Presentation, Segment,
};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::media::{HandleId, MediaBackend, MediaEvent, MediaHandle, PlaybackEvent};
use crate::video_sync::{
    NarrationCommand, RegistrationToken, VideoPlayer, VideoSyncCoordinator,
};

/// Session-level playback state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlaybackState {
    /// Not started.
    #[default]
    Idle,
    /// Lead-in silence before the first slide.
    StartSilence,
    /// A segment is active (loading, playing, paused or ended).
    PlayingSegment { slide: usize, segment: usize },
    /// A slide without segments is shown before moving on.
    ShowingSlide { slide: usize },
    InterSegmentDelay { slide: usize, segment: usize },
    InterSlideDelay { slide: usize },
    FinalDelay,
    Complete,
}

/// Navigation mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackMode {
    /// Audio always plays; segments follow each other.
    #[default]
    Narrated,
    /// Free jumps; audio only plays when enabled.
    Manual,
}

/// Lifecycle of the active segment's audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentPhase {
    /// No segment is active.
    Idle,
    /// Waiting for the media handle to become ready.
    Loading,
    Playing,
    /// Narration paused by the video sync coordinator.
    PausedForVideo,
    Ended,
    /// Active without audio (manual mode, muted).
    Silent,
    /// Playback failed; skipping after the backoff.
    Failed,
}

/// What observers see of the session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSnapshot {
    pub state: PlaybackState,
    pub mode: PlaybackMode,
    pub slide: Option<usize>,
    pub segment: Option<usize>,
    pub segment_id: Option<String>,
    /// Narration time in seconds within the active segment.
    pub time: f64,
    /// Number of markers reached.
    pub reveal_index: usize,
    pub current_marker: Option<String>,
    pub word_index: Option<usize>,
    pub narration_paused: bool,
    pub audio_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cursor {
    slide: usize,
    /// `None` on a slide without segments.
    segment: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerAction {
    EnterSlide(usize),
    StartSegment { slide: usize, segment: usize },
    SkipForward { slide: usize, segment: Option<usize> },
    Complete,
}

#[derive(Debug, Clone, Copy)]
struct PendingTimer {
    deadline: Instant,
    action: TimerAction,
}

struct ActiveMedia {
    id: HandleId,
    handle: Box<dyn MediaHandle>,
    /// Whether this is already the silence fallback.
    fallback: bool,
}

/// Sequences narration segments and drives video sync.
pub struct Orchestrator {
    root: PathBuf,
    presentation: Presentation,
    alignment: AlignmentCache,
    sync: VideoSyncCoordinator,
    backend: Box<dyn MediaBackend>,
    defaults: PlaybackDefaults,

    state: PlaybackState,
    mode: PlaybackMode,
    auto_advance: bool,
    audio_enabled: bool,

    loaded_slide: Option<usize>,
    segments: Vec<Segment>,
    cursor: Option<Cursor>,
    phase: SegmentPhase,
    media: Option<ActiveMedia>,
    next_handle: u64,
    timer: Option<PendingTimer>,
    pacer: FramePacer,
    epoch: Option<Instant>,
    time: f64,

    snapshot_tx: watch::Sender<PlaybackSnapshot>,
}

impl Orchestrator {
    pub fn new(demo: LoadedDemo, backend: Box<dyn MediaBackend>, defaults: PlaybackDefaults) -> Self {
        let LoadedDemo {
            root,
            presentation,
            alignment,
            bookmarks,
        } = demo;

        let mut cache = AlignmentCache::new();
        cache.init(presentation.id.clone(), alignment);
        let (snapshot_tx, _) = watch::channel(PlaybackSnapshot::default());

        let orchestrator = Self {
            root,
            presentation,
            alignment: cache,
            sync: VideoSyncCoordinator::new(bookmarks),
            backend,
            pacer: FramePacer::new(defaults.frame_rate_hz),
            audio_enabled: !defaults.start_muted,
            defaults,
            state: PlaybackState::Idle,
            mode: PlaybackMode::Narrated,
            auto_advance: true,
            loaded_slide: None,
            segments: Vec::new(),
            cursor: None,
            phase: SegmentPhase::Idle,
            media: None,
            next_handle: 0,
            timer: None,
            epoch: None,
            time: 0.0,
            snapshot_tx,
        };
        orchestrator.publish();
        orchestrator
    }

    /// Replace the active demo. Playback stops and the alignment cache is
    /// reinitialized; registered video players are kept.
    pub fn load_demo(&mut self, demo: LoadedDemo) {
        self.stop();
        self.alignment.clear();
        self.alignment
            .init(demo.presentation.id.clone(), demo.alignment);
        self.sync.set_bookmarks(demo.bookmarks);
        self.root = demo.root;
        self.presentation = demo.presentation;
        tracing::info!(demo = %self.presentation.id, "Demo loaded into orchestrator");
        self.publish();
    }

    /// Stop playback and drop the demo's alignment data.
    pub fn close(&mut self) {
        self.stop();
        self.alignment.clear();
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn mode(&self) -> PlaybackMode {
        self.mode
    }

    pub fn phase(&self) -> SegmentPhase {
        self.phase
    }

    pub fn auto_advance(&self) -> bool {
        self.auto_advance
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled
    }

    pub fn narration_paused(&self) -> bool {
        self.phase == SegmentPhase::PausedForVideo
    }

    pub fn presentation(&self) -> &Presentation {
        &self.presentation
    }

    pub fn alignment(&self) -> &AlignmentCache {
        &self.alignment
    }

    pub fn sync(&self) -> &VideoSyncCoordinator {
        &self.sync
    }

    /// Current `(slide, segment)` position.
    pub fn position(&self) -> Option<(usize, Option<usize>)> {
        self.cursor.map(|c| (c.slide, c.segment))
    }

    /// The active segment, including its resolved markers and words.
    pub fn current_segment(&self) -> Option<&Segment> {
        self.cursor
            .and_then(|c| c.segment)
            .and_then(|j| self.segments.get(j))
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn register_player(
        &mut self,
        video_id: impl Into<String>,
        player: Box<dyn VideoPlayer>,
    ) -> RegistrationToken {
        self.sync.registry_mut().register(video_id, player)
    }

    pub fn unregister_player(&mut self, token: &RegistrationToken) -> bool {
        self.sync.registry_mut().unregister(token)
    }

    /// Begin narrated playback from the first slide. A completed session
    /// starts over.
    pub fn start(&mut self, now: Instant) {
        match self.state {
            PlaybackState::Idle => {}
            PlaybackState::Complete => {
                tracing::debug!("Restarting completed playback");
                self.stop();
            }
            state => {
                tracing::debug!(?state, "Playback already in progress");
                return;
            }
        }
        self.epoch = Some(now);

        if self.presentation.slides.is_empty() {
            tracing::warn!(demo = %self.presentation.id, "Demo has no slides");
            self.complete();
            return;
        }

        let lead_in = self.presentation.timing_for(0, None).lead_in();
        tracing::info!(
            demo = %self.presentation.id,
            slides = self.presentation.slide_count(),
            mode = ?self.mode,
            ?lead_in,
            "Starting playback"
        );

        if lead_in.is_zero() {
            self.enter_slide(0, now);
        } else {
            self.state = PlaybackState::StartSilence;
            self.schedule(now + lead_in, TimerAction::EnterSlide(0));
            self.publish();
        }
    }

    /// Stop playback and return to `Idle`.
    pub fn stop(&mut self) {
        if self.state != PlaybackState::Idle {
            tracing::info!(state = ?self.state, "Stopping playback");
        }
        self.detach_media();
        self.timer = None;
        self.sync.deactivate();
        self.segments.clear();
        self.loaded_slide = None;
        self.cursor = None;
        self.phase = SegmentPhase::Idle;
        self.state = PlaybackState::Idle;
        self.epoch = None;
        self.time = 0.0;
        self.publish();
    }

    /// Deadline of the pending timer, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timer.map(|t| t.deadline)
    }

    /// When the frame sampler wants to run next, if it is running.
    pub fn next_frame_deadline(&self) -> Option<Instant> {
        if self.phase != SegmentPhase::Playing || self.media.is_none() {
            return None;
        }
        let epoch = self.epoch?;
        Some(match self.pacer.next_due_ns() {
            Some(ns) => epoch + Duration::from_nanos(ns),
            None => epoch,
        })
    }

    /// Run the pending timer if its deadline has passed.
    pub fn poll_timers(&mut self, now: Instant) {
        let due = matches!(self.timer, Some(t) if t.deadline <= now);
        if !due {
            return;
        }
        let Some(timer) = self.timer.take() else {
            return;
        };

        tracing::trace!(action = ?timer.action, "Timer fired");
        match timer.action {
            TimerAction::EnterSlide(slide) => self.enter_slide(slide, now),
            TimerAction::StartSegment { slide, segment } => self.start_segment(slide, segment),
            TimerAction::SkipForward { slide, segment } => self.skip_forward(slide, segment, now),
            TimerAction::Complete => self.complete(),
        }
    }

    /// Sample the narration clock if a frame is due.
    pub fn frame_tick(&mut self, now: Instant) {
        if self.phase != SegmentPhase::Playing {
            return;
        }
        let Some(epoch) = self.epoch else {
            return;
        };
        let elapsed_ns =
            u64::try_from(now.saturating_duration_since(epoch).as_nanos()).unwrap_or(u64::MAX);
        if !self.pacer.should_tick(elapsed_ns) {
            return;
        }
        self.sample(now);
    }

    pub fn handle_event(&mut self, event: PlaybackEvent, now: Instant) {
        match event {
            PlaybackEvent::Media { handle, event } => self.handle_media_event(handle, event, now),
            PlaybackEvent::ClipFinished(ticket) => {
                let commands = self.sync.clip_finished(&ticket);
                self.apply_commands(commands, now);
            }
        }
    }

    /// Jump to a segment. On a slide without segments, `segment` must be 0.
    pub fn goto(&mut self, slide: usize, segment: usize, now: Instant) -> SlidecastResult<()> {
        let Some(def) = self.presentation.slides.get(slide) else {
            return Err(SlidecastError::presentation(format!(
                "No slide {slide}; demo has {} slides",
                self.presentation.slide_count()
            )));
        };
        let count = def.segments.len();
        if segment >= count.max(1) {
            return Err(SlidecastError::presentation(format!(
                "No segment {segment} on slide {slide}; it has {count}"
            )));
        }

        self.ensure_epoch(now);
        tracing::info!(slide, segment, "Jumping to position");
        if count == 0 {
            self.enter_slide(slide, now);
        } else {
            self.start_segment(slide, segment);
        }
        Ok(())
    }

    /// Move to the next segment, or the next slide after the last segment.
    pub fn next(&mut self, now: Instant) {
        self.ensure_epoch(now);
        let Some(Cursor { slide, segment }) = self.cursor else {
            self.enter_slide(0, now);
            return;
        };
        let next_segment = segment.map_or(0, |j| j + 1);
        if next_segment >= self.segment_count(slide) && self.presentation.is_last_slide(slide) {
            tracing::debug!(slide, ?segment, "Already at the last segment");
            return;
        }
        self.skip_forward(slide, segment, now);
    }

    /// Move to the previous segment, or the last segment of the previous
    /// slide. On the very first segment it restarts that segment.
    pub fn previous(&mut self, now: Instant) {
        self.ensure_epoch(now);
        let Some(Cursor { slide, segment }) = self.cursor else {
            self.enter_slide(0, now);
            return;
        };
        match segment {
            Some(j) if j > 0 => self.start_segment(slide, j - 1),
            _ if slide > 0 => {
                let prev = slide - 1;
                match self.segment_count(prev) {
                    0 => self.enter_slide(prev, now),
                    count => self.start_segment(prev, count - 1),
                }
            }
            _ => self.enter_slide(0, now),
        }
    }

    /// Switch mode. An active segment is re-activated under the new mode.
    pub fn set_mode(&mut self, mode: PlaybackMode) {
        if self.mode == mode {
            return;
        }
        tracing::info!(?mode, "Playback mode changed");
        self.mode = mode;
        self.restart_active_segment();
        self.publish();
    }

    pub fn set_auto_advance(&mut self, enabled: bool, now: Instant) {
        if self.auto_advance == enabled {
            return;
        }
        tracing::info!(enabled, "Auto-advance toggled");
        self.auto_advance = enabled;

        if enabled && self.phase == SegmentPhase::Ended {
            if let Some(Cursor {
                slide,
                segment: Some(segment),
            }) = self.cursor
            {
                self.schedule_advance(slide, segment, now);
            }
        }
    }

    /// Toggle audio for manual mode. Narrated mode always plays audio.
    pub fn set_audio_enabled(&mut self, enabled: bool) {
        if self.audio_enabled == enabled {
            return;
        }
        tracing::info!(enabled, "Audio toggled");
        self.audio_enabled = enabled;
        if self.mode == PlaybackMode::Manual {
            self.restart_active_segment();
        }
        self.publish();
    }

    /// Install regenerated alignment for one slide. If it is the active
    /// slide, its segments are rebuilt so new marker times apply at once;
    /// fired triggers stay fired.
    pub fn refresh_alignment(&mut self, key: &str, entries: Vec<AlignmentEntry>) {
        self.alignment.refresh(key, entries);

        let Some(slide) = self.loaded_slide else {
            return;
        };
        let is_active = self
            .presentation
            .slides
            .get(slide)
            .is_some_and(|s| s.alignment_key() == key);
        if !is_active {
            return;
        }

        self.segments = self.build_segments(slide);
        tracing::info!(slide = key, "Alignment refreshed for active slide");
        self.publish();
    }

    fn audio_active(&self) -> bool {
        self.mode == PlaybackMode::Narrated || self.audio_enabled
    }

    fn ensure_epoch(&mut self, now: Instant) {
        if self.epoch.is_none() {
            self.epoch = Some(now);
        }
    }

    fn segment_count(&self, slide: usize) -> usize {
        self.presentation
            .slides
            .get(slide)
            .map_or(0, |s| s.segments.len())
    }

    fn build_segments(&self, slide_index: usize) -> Vec<Segment> {
        let Some(slide) = self.presentation.slides.get(slide_index) else {
            return Vec::new();
        };
        let key = slide.alignment_key();
        slide
            .segments
            .iter()
            .map(|def| Segment::build(def, self.alignment.entry(&key, &def.id)))
            .collect()
    }

    fn schedule(&mut self, deadline: Instant, action: TimerAction) {
        self.timer = Some(PendingTimer { deadline, action });
    }

    fn enter_slide(&mut self, slide: usize, now: Instant) {
        self.detach_media();
        self.timer = None;
        self.segments = self.build_segments(slide);
        self.loaded_slide = Some(slide);

        if !self.segments.is_empty() {
            self.start_segment(slide, 0);
            return;
        }

        // Nothing to narrate; clear sync state and move on after a beat.
        self.sync.activate_segment(&[], &[]);
        self.cursor = Some(Cursor {
            slide,
            segment: None,
        });
        self.state = PlaybackState::ShowingSlide { slide };
        self.phase = SegmentPhase::Idle;
        self.time = 0.0;

        let delay = self.defaults.empty_slide_delay();
        tracing::info!(slide, ?delay, "Slide has no segments; advancing after delay");
        self.schedule(
            now + delay,
            TimerAction::SkipForward {
                slide,
                segment: None,
            },
        );
        self.publish();
    }

    fn start_segment(&mut self, slide: usize, segment: usize) {
        self.detach_media();
        self.timer = None;
        if self.loaded_slide != Some(slide) {
            self.segments = self.build_segments(slide);
            self.loaded_slide = Some(slide);
        }

        let Some(current) = self.segments.get(segment) else {
            tracing::warn!(slide, segment, "Segment out of range; ignoring");
            return;
        };
        self.sync
            .activate_segment(&current.video_seeks, &current.video_waits);
        let audio = self.root.join(&current.audio_path);
        let id = current.id.clone();

        self.cursor = Some(Cursor {
            slide,
            segment: Some(segment),
        });
        self.state = PlaybackState::PlayingSegment { slide, segment };
        self.time = 0.0;

        if self.audio_active() {
            tracing::info!(slide, segment, id = %id, "Starting segment");
            self.open_media(&audio, false);
            self.phase = SegmentPhase::Loading;
        } else {
            tracing::debug!(slide, segment, id = %id, "Audio disabled; segment shown silently");
            self.phase = SegmentPhase::Silent;
        }
        self.publish();
    }

    fn restart_active_segment(&mut self) {
        if let PlaybackState::PlayingSegment { slide, segment } = self.state {
            self.start_segment(slide, segment);
        }
    }

    fn skip_forward(&mut self, slide: usize, segment: Option<usize>, now: Instant) {
        let next = segment.map_or(0, |j| j + 1);
        if next < self.segment_count(slide) {
            self.start_segment(slide, next);
        } else if !self.presentation.is_last_slide(slide) {
            self.enter_slide(slide + 1, now);
        } else {
            self.complete();
        }
    }

    fn schedule_advance(&mut self, slide: usize, segment: usize, now: Instant) {
        let timing = self.presentation.timing_for(slide, Some(segment));

        if segment + 1 < self.segment_count(slide) {
            self.state = PlaybackState::InterSegmentDelay { slide, segment };
            self.schedule(
                now + timing.segment_gap(),
                TimerAction::StartSegment {
                    slide,
                    segment: segment + 1,
                },
            );
        } else if !self.presentation.is_last_slide(slide) {
            self.state = PlaybackState::InterSlideDelay { slide };
            self.schedule(now + timing.slide_gap(), TimerAction::EnterSlide(slide + 1));
        } else {
            self.state = PlaybackState::FinalDelay;
            self.schedule(now + timing.final_hold(), TimerAction::Complete);
        }
        tracing::debug!(state = ?self.state, "Advance scheduled");
        self.publish();
    }

    fn complete(&mut self) {
        self.detach_media();
        self.timer = None;
        self.sync.deactivate();
        self.phase = SegmentPhase::Idle;
        self.state = PlaybackState::Complete;
        tracing::info!(demo = %self.presentation.id, "Playback complete");
        self.publish();
    }

    fn open_media(&mut self, path: &Path, fallback: bool) {
        self.detach_media();
        self.next_handle += 1;
        let id = HandleId(self.next_handle);
        tracing::debug!(
            handle = %id,
            path = %path.display(),
            backend = self.backend.name(),
            fallback,
            "Opening media"
        );
        let handle = self.backend.open(id, path);
        self.media = Some(ActiveMedia {
            id,
            handle,
            fallback,
        });
    }

    /// Drop the active handle; its later events no longer match.
    fn detach_media(&mut self) {
        if let Some(media) = self.media.take() {
            tracing::trace!(handle = %media.id, "Detaching media handle");
        }
        self.pacer.reset();
    }

    fn handle_media_event(&mut self, id: HandleId, event: MediaEvent, now: Instant) {
        if self.media.as_ref().map(|m| m.id) != Some(id) {
            tracing::trace!(handle = %id, ?event, "Ignoring event from detached handle");
            return;
        }

        match event {
            MediaEvent::Ready => {
                if self.phase == SegmentPhase::Loading {
                    self.begin_playback(now);
                }
            }
            MediaEvent::Ended => self.segment_ended(now),
            MediaEvent::LoadFailed { reason } => self.load_failed(&reason, now),
            MediaEvent::PlaybackFailed { reason } => self.playback_failed(&reason, now),
        }
    }

    fn begin_playback(&mut self, now: Instant) {
        let result = match self.media.as_mut() {
            Some(media) => media.handle.play(),
            None => return,
        };
        match result {
            Ok(()) => {
                self.phase = SegmentPhase::Playing;
                self.pacer.reset();
                self.publish();
            }
            Err(e) => self.playback_failed(&e.to_string(), now),
        }
    }

    fn load_failed(&mut self, reason: &str, now: Instant) {
        let (already_fallback, path) = match &self.media {
            Some(media) => (media.fallback, media.handle.path().to_path_buf()),
            None => return,
        };
        if already_fallback {
            self.playback_failed(reason, now);
            return;
        }

        tracing::warn!(
            path = %path.display(),
            reason,
            "Narration audio failed to load; substituting silence"
        );
        let fallback = self.root.join(&self.defaults.fallback_audio);
        self.open_media(&fallback, true);
        self.phase = SegmentPhase::Loading;
    }

    fn playback_failed(&mut self, reason: &str, now: Instant) {
        let Some(Cursor { slide, segment }) = self.cursor else {
            return;
        };
        let backoff = self.defaults.error_backoff();
        tracing::warn!(slide, ?segment, reason, ?backoff, "Narration playback failed; skipping");
        self.detach_media();
        self.phase = SegmentPhase::Failed;
        self.schedule(now + backoff, TimerAction::SkipForward { slide, segment });
        self.publish();
    }

    fn segment_ended(&mut self, now: Instant) {
        let Some(Cursor {
            slide,
            segment: Some(segment),
        }) = self.cursor
        else {
            return;
        };
        if let Some(media) = &self.media {
            self.time = media.handle.current_time();
        }
        self.detach_media();
        self.phase = SegmentPhase::Ended;
        tracing::info!(slide, segment, "Segment ended");

        if self.auto_advance {
            self.schedule_advance(slide, segment, now);
        } else {
            self.publish();
        }
    }

    fn sample(&mut self, now: Instant) {
        let Some(media) = &self.media else {
            return;
        };
        self.time = media.handle.current_time();
        let time = self.time;

        let Some(segment) = self
            .cursor
            .and_then(|c| c.segment)
            .and_then(|j| self.segments.get(j))
        else {
            return;
        };

        // Seeks before waits within one tick.
        let mut commands = self
            .sync
            .check_and_fire_seeks(time, |id| segment.marker_time(id));
        commands.extend(
            self.sync
                .check_and_wait_for_clips(time, |id| segment.marker_time(id)),
        );

        self.publish();
        self.apply_commands(commands, now);
    }

    fn apply_commands(&mut self, commands: Vec<NarrationCommand>, now: Instant) {
        for command in commands {
            match command {
                NarrationCommand::Pause => {
                    if self.phase != SegmentPhase::Playing {
                        continue;
                    }
                    if let Some(media) = self.media.as_mut() {
                        self.time = media.handle.current_time();
                        media.handle.pause();
                    }
                    self.phase = SegmentPhase::PausedForVideo;
                    self.pacer.reset();
                    tracing::info!(time = self.time, "Narration paused for video");
                    self.publish();
                }
                NarrationCommand::Resume => {
                    if self.phase != SegmentPhase::PausedForVideo {
                        continue;
                    }
                    tracing::info!(time = self.time, "Narration resumed");
                    self.begin_playback(now);
                }
            }
        }
    }

    fn publish(&self) {
        let segment = self.current_segment();
        let time = self.time;
        let snapshot = PlaybackSnapshot {
            state: self.state,
            mode: self.mode,
            slide: self.cursor.map(|c| c.slide),
            segment: self.cursor.and_then(|c| c.segment),
            segment_id: segment.map(|s| s.id.clone()),
            time,
            reveal_index: segment.map_or(0, |s| s.reveal_index(time)),
            current_marker: segment
                .and_then(|s| s.last_reached_marker(time))
                .map(|m| m.id().to_string()),
            word_index: segment.and_then(|s| s.word_at(time)),
            narration_paused: self.narration_paused(),
            audio_enabled: self.audio_enabled,
        };
        self.snapshot_tx.send_replace(snapshot);
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("demo", &self.presentation.id)
            .field("state", &self.state)
            .field("mode", &self.mode)
            .field("phase", &self.phase)
            .field("backend", &self.backend.name())
            .field("handle", &self.media.as_ref().map(|m| m.id))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use slidecast_narration_model::{AlignedWord, AlignmentData, BookmarkStore};

    use crate::video_sync::{ClipPattern, ClipRequest};

    #[derive(Debug, Default)]
    struct HandleState {
        plays: u32,
        pauses: u32,
        time: f64,
    }

    #[derive(Clone)]
    struct Opened {
        id: HandleId,
        path: PathBuf,
        state: Rc<RefCell<HandleState>>,
    }

    #[derive(Clone, Default)]
    struct FakeBackend {
        opened: Rc<RefCell<Vec<Opened>>>,
        reject_play: Rc<Cell<bool>>,
    }

    impl FakeBackend {
        fn last(&self) -> Opened {
            self.opened.borrow().last().cloned().expect("no handle opened")
        }

        fn count(&self) -> usize {
            self.opened.borrow().len()
        }

        fn set_time(&self, time: f64) {
            self.last().state.borrow_mut().time = time;
        }
    }

    struct FakeHandle {
        path: PathBuf,
        state: Rc<RefCell<HandleState>>,
        reject_play: Rc<Cell<bool>>,
    }

    impl MediaHandle for FakeHandle {
        fn play(&mut self) -> SlidecastResult<()> {
            if self.reject_play.get() {
                return Err(SlidecastError::media("output device busy"));
            }
            self.state.borrow_mut().plays += 1;
            Ok(())
        }

        fn pause(&mut self) {
            self.state.borrow_mut().pauses += 1;
        }

        fn current_time(&self) -> f64 {
            self.state.borrow().time
        }

        fn path(&self) -> &Path {
            &self.path
        }
    }

    impl MediaBackend for FakeBackend {
        fn open(&mut self, id: HandleId, path: &Path) -> Box<dyn MediaHandle> {
            let state = Rc::new(RefCell::new(HandleState::default()));
            self.opened.borrow_mut().push(Opened {
                id,
                path: path.to_path_buf(),
                state: state.clone(),
            });
            Box::new(FakeHandle {
                path: path.to_path_buf(),
                state,
                reject_play: self.reject_play.clone(),
            })
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    #[derive(Clone, Default)]
    struct RecordingPlayer {
        requests: Rc<RefCell<Vec<ClipRequest>>>,
    }

    impl VideoPlayer for RecordingPlayer {
        fn play_clip(&mut self, request: ClipRequest) {
            self.requests.borrow_mut().push(request);
        }
    }

    fn demo(lead_in: u64) -> LoadedDemo {
        let presentation: Presentation = serde_json::from_value(serde_json::json!({
            "id": "demo",
            "title": "Demo",
            "timing": {
                "betweenSegments": 300,
                "betweenSlides": 800,
                "afterFinalSlide": 1200,
                "beforeFirstSlide": lead_in
            },
            "slides": [
                { "chapter": 1, "slide": 1, "segments": [
                    { "id": "intro", "audio": "audio/intro.wav",
                      "text": "Watch {#go}this clip{hold#} now.",
                      "videoSeeks": [ { "videoId": "demo", "bookmarkId": "start", "atMarker": "go" } ],
                      "videoWaits": [ { "videoId": "demo", "bookmarkId": "start", "atMarker": "hold" } ] },
                    { "id": "detail", "audio": "audio/detail.wav",
                      "text": "Then {#pause}stop.",
                      "videoSeeks": [ { "videoId": "demo", "bookmarkId": "start", "atMarker": "pause", "pauseNarration": true } ] }
                ] },
                { "chapter": 1, "slide": 2, "segments": [] },
                { "chapter": 2, "slide": 1, "segments": [
                    { "id": "outro", "audio": "audio/outro.wav", "text": "Bye." }
                ] }
            ]
        }))
        .unwrap();

        let alignment: AlignmentData = serde_json::from_value(serde_json::json!({
            "c1_s1": [
                { "segmentId": "intro", "words": [
                    { "word": "Watch", "start": 0.0, "end": 0.3 },
                    { "word": "this", "start": 0.4, "end": 0.6 },
                    { "word": "clip", "start": 0.7, "end": 1.0 },
                    { "word": "now.", "start": 1.2, "end": 1.5 }
                ] },
                { "segmentId": "detail", "words": [
                    { "word": "Then", "start": 0.0, "end": 0.2 },
                    { "word": "stop.", "start": 0.3, "end": 0.6 }
                ] }
            ]
        }))
        .unwrap();

        let bookmarks: BookmarkStore = serde_json::from_value(serde_json::json!({
            "demo": { "src": "videos/demo.mp4", "bookmarks": [ { "id": "start", "time": 5.0 } ] }
        }))
        .unwrap();

        LoadedDemo {
            root: PathBuf::from("/demo"),
            presentation,
            alignment,
            bookmarks,
        }
    }

    fn orchestrator(lead_in: u64) -> (Orchestrator, FakeBackend, RecordingPlayer) {
        let backend = FakeBackend::default();
        let player = RecordingPlayer::default();
        let mut orch = Orchestrator::new(
            demo(lead_in),
            Box::new(backend.clone()),
            PlaybackDefaults::default(),
        );
        orch.register_player("demo", Box::new(player.clone()));
        (orch, backend, player)
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn media(orch: &mut Orchestrator, backend: &FakeBackend, event: MediaEvent, now: Instant) {
        let id = backend.last().id;
        orch.handle_event(PlaybackEvent::Media { handle: id, event }, now);
    }

    #[test]
    fn test_lead_in_delays_first_slide_once() {
        let (mut orch, backend, _) = orchestrator(1000);
        let t0 = Instant::now();

        orch.start(t0);
        assert_eq!(orch.state(), PlaybackState::StartSilence);
        assert_eq!(orch.next_deadline(), Some(t0 + ms(1000)));

        orch.poll_timers(t0 + ms(999));
        assert_eq!(orch.state(), PlaybackState::StartSilence);
        assert_eq!(backend.count(), 0);

        orch.poll_timers(t0 + ms(1000));
        assert_eq!(
            orch.state(),
            PlaybackState::PlayingSegment {
                slide: 0,
                segment: 0
            }
        );
        assert_eq!(orch.phase(), SegmentPhase::Loading);
        assert_eq!(backend.last().path, PathBuf::from("/demo/audio/intro.wav"));
    }

    #[test]
    fn test_zero_lead_in_starts_immediately() {
        let (mut orch, backend, _) = orchestrator(0);
        orch.start(Instant::now());
        assert_eq!(
            orch.state(),
            PlaybackState::PlayingSegment {
                slide: 0,
                segment: 0
            }
        );
        assert_eq!(orch.next_deadline(), None);
        assert_eq!(backend.count(), 1);
    }

    #[test]
    fn test_full_sequence_uses_resolved_delays() {
        let (mut orch, backend, _) = orchestrator(0);
        let t0 = Instant::now();
        orch.start(t0);

        media(&mut orch, &backend, MediaEvent::Ready, t0);
        assert_eq!(orch.phase(), SegmentPhase::Playing);
        assert_eq!(backend.last().state.borrow().plays, 1);

        media(&mut orch, &backend, MediaEvent::Ended, t0 + ms(1500));
        assert_eq!(
            orch.state(),
            PlaybackState::InterSegmentDelay {
                slide: 0,
                segment: 0
            }
        );
        assert_eq!(orch.next_deadline(), Some(t0 + ms(1800)));

        orch.poll_timers(t0 + ms(1800));
        assert_eq!(
            orch.state(),
            PlaybackState::PlayingSegment {
                slide: 0,
                segment: 1
            }
        );
        assert_eq!(backend.last().path, PathBuf::from("/demo/audio/detail.wav"));

        let t1 = t0 + ms(3000);
        media(&mut orch, &backend, MediaEvent::Ready, t1);
        media(&mut orch, &backend, MediaEvent::Ended, t1);
        assert_eq!(orch.state(), PlaybackState::InterSlideDelay { slide: 0 });
        assert_eq!(orch.next_deadline(), Some(t1 + ms(800)));

        orch.poll_timers(t1 + ms(800));
        assert_eq!(orch.state(), PlaybackState::ShowingSlide { slide: 1 });
        assert_eq!(orch.next_deadline(), Some(t1 + ms(1300)));

        orch.poll_timers(t1 + ms(1300));
        assert_eq!(
            orch.state(),
            PlaybackState::PlayingSegment {
                slide: 2,
                segment: 0
            }
        );

        let t2 = t1 + ms(2000);
        media(&mut orch, &backend, MediaEvent::Ready, t2);
        media(&mut orch, &backend, MediaEvent::Ended, t2);
        assert_eq!(orch.state(), PlaybackState::FinalDelay);
        assert_eq!(orch.next_deadline(), Some(t2 + ms(1200)));

        orch.poll_timers(t2 + ms(1200));
        assert_eq!(orch.state(), PlaybackState::Complete);
        assert_eq!(orch.next_deadline(), None);
    }

    #[test]
    fn test_events_from_replaced_handle_are_ignored() {
        let (mut orch, backend, _) = orchestrator(0);
        let t0 = Instant::now();
        orch.start(t0);
        let stale = backend.last().id;

        orch.next(t0);
        assert_eq!(orch.position(), Some((0, Some(1))));
        assert_ne!(backend.last().id, stale);

        orch.handle_event(
            PlaybackEvent::Media {
                handle: stale,
                event: MediaEvent::Ended,
            },
            t0,
        );
        orch.handle_event(
            PlaybackEvent::Media {
                handle: stale,
                event: MediaEvent::Ready,
            },
            t0,
        );
        assert_eq!(
            orch.state(),
            PlaybackState::PlayingSegment {
                slide: 0,
                segment: 1
            }
        );
        assert_eq!(orch.phase(), SegmentPhase::Loading);
        assert_eq!(backend.last().state.borrow().plays, 0);
    }

    #[test]
    fn test_load_failure_substitutes_silence_then_skips() {
        let (mut orch, backend, _) = orchestrator(0);
        let t0 = Instant::now();
        orch.start(t0);

        media(
            &mut orch,
            &backend,
            MediaEvent::LoadFailed {
                reason: "not found".into(),
            },
            t0,
        );
        assert_eq!(backend.count(), 2);
        assert_eq!(backend.last().path, PathBuf::from("/demo/audio/silence.wav"));
        assert_eq!(orch.phase(), SegmentPhase::Loading);

        media(&mut orch, &backend, MediaEvent::Ready, t0);
        assert_eq!(orch.phase(), SegmentPhase::Playing);

        // A failing fallback is a playback failure.
        orch.goto(0, 0, t0).unwrap();
        media(
            &mut orch,
            &backend,
            MediaEvent::LoadFailed {
                reason: "not found".into(),
            },
            t0,
        );
        media(
            &mut orch,
            &backend,
            MediaEvent::LoadFailed {
                reason: "not found".into(),
            },
            t0,
        );
        assert_eq!(orch.phase(), SegmentPhase::Failed);
        assert_eq!(orch.next_deadline(), Some(t0 + ms(500)));

        orch.poll_timers(t0 + ms(500));
        assert_eq!(orch.position(), Some((0, Some(1))));
    }

    #[test]
    fn test_rejected_play_backs_off_and_skips() {
        let (mut orch, backend, _) = orchestrator(0);
        let t0 = Instant::now();
        orch.start(t0);
        backend.reject_play.set(true);

        media(&mut orch, &backend, MediaEvent::Ready, t0);
        assert_eq!(orch.phase(), SegmentPhase::Failed);

        orch.poll_timers(t0 + ms(499));
        assert_eq!(orch.position(), Some((0, Some(0))));
        orch.poll_timers(t0 + ms(500));
        assert_eq!(orch.position(), Some((0, Some(1))));

        backend.reject_play.set(false);
        media(
            &mut orch,
            &backend,
            MediaEvent::PlaybackFailed {
                reason: "decode error".into(),
            },
            t0 + ms(600),
        );
        orch.poll_timers(t0 + ms(1100));
        assert_eq!(orch.state(), PlaybackState::ShowingSlide { slide: 1 });
    }

    #[test]
    fn test_parallel_clip_and_wait_through_frame_ticks() {
        let (mut orch, backend, player) = orchestrator(0);
        let t0 = Instant::now();
        orch.start(t0);
        media(&mut orch, &backend, MediaEvent::Ready, t0);
        assert_eq!(orch.next_frame_deadline(), Some(t0));

        backend.set_time(0.2);
        orch.frame_tick(t0);
        assert!(player.requests.borrow().is_empty());
        assert_eq!(orch.next_frame_deadline(), Some(t0 + Duration::from_nanos(16_666_666)));

        backend.set_time(0.5);
        orch.frame_tick(t0 + ms(20));
        let ticket = {
            let requests = player.requests.borrow();
            assert_eq!(requests.len(), 1);
            assert_eq!(requests[0].start, 5.0);
            assert_eq!(requests[0].ticket.pattern, ClipPattern::Parallel);
            requests[0].ticket.clone()
        };
        let snapshot = orch.snapshot();
        assert_eq!(snapshot.reveal_index, 1);
        assert_eq!(snapshot.current_marker.as_deref(), Some("go"));
        assert_eq!(snapshot.word_index, Some(1));
        assert!(!snapshot.narration_paused);

        backend.set_time(1.05);
        orch.frame_tick(t0 + ms(40));
        assert_eq!(orch.phase(), SegmentPhase::PausedForVideo);
        assert_eq!(backend.last().state.borrow().pauses, 1);
        assert!(orch.snapshot().narration_paused);
        assert_eq!(orch.next_frame_deadline(), None);

        orch.handle_event(PlaybackEvent::ClipFinished(ticket), t0 + ms(900));
        assert_eq!(orch.phase(), SegmentPhase::Playing);
        assert_eq!(backend.last().state.borrow().plays, 2);
        assert_eq!(player.requests.borrow().len(), 1);
    }

    #[test]
    fn test_seek_and_wait_due_in_one_frame_tick() {
        let (mut orch, backend, player) = orchestrator(0);
        let t0 = Instant::now();
        orch.start(t0);
        media(&mut orch, &backend, MediaEvent::Ready, t0);

        // Both "go" (0.4s) and "hold" (1.0s) are behind the first sample.
        backend.set_time(1.05);
        orch.frame_tick(t0);

        let ticket = {
            let requests = player.requests.borrow();
            assert_eq!(requests.len(), 1);
            requests[0].ticket.clone()
        };
        assert_eq!(orch.phase(), SegmentPhase::PausedForVideo);
        assert!(orch.sync().is_waiting_for(&ticket.key));
        assert_eq!(backend.last().state.borrow().pauses, 1);

        orch.handle_event(PlaybackEvent::ClipFinished(ticket), t0 + ms(500));
        assert_eq!(orch.phase(), SegmentPhase::Playing);
    }

    #[test]
    fn test_start_after_complete_replays() {
        let (mut orch, backend, _) = orchestrator(0);
        let t0 = Instant::now();
        orch.goto(2, 0, t0).unwrap();
        media(&mut orch, &backend, MediaEvent::Ready, t0);
        media(&mut orch, &backend, MediaEvent::Ended, t0);
        orch.poll_timers(t0 + ms(1200));
        assert_eq!(orch.state(), PlaybackState::Complete);

        let opened = backend.count();
        orch.start(t0 + ms(2000));
        assert_eq!(
            orch.state(),
            PlaybackState::PlayingSegment {
                slide: 0,
                segment: 0
            }
        );
        assert_eq!(backend.count(), opened + 1);

        // Starting again mid-run is a no-op.
        orch.start(t0 + ms(2100));
        assert_eq!(backend.count(), opened + 1);
    }

    #[test]
    fn test_stale_blocking_completion_does_not_resume() {
        let (mut orch, backend, player) = orchestrator(0);
        let t0 = Instant::now();

        orch.goto(0, 1, t0).unwrap();
        media(&mut orch, &backend, MediaEvent::Ready, t0);
        backend.set_time(0.35);
        orch.frame_tick(t0);
        assert_eq!(orch.phase(), SegmentPhase::PausedForVideo);
        let first = player.requests.borrow()[0].ticket.clone();
        assert_eq!(first.pattern, ClipPattern::Blocking);

        // Re-entering the segment re-arms the trigger.
        orch.goto(0, 1, t0 + ms(100)).unwrap();
        media(&mut orch, &backend, MediaEvent::Ready, t0 + ms(100));
        backend.set_time(0.35);
        orch.frame_tick(t0 + ms(120));
        assert_eq!(orch.phase(), SegmentPhase::PausedForVideo);
        let second = player.requests.borrow()[1].ticket.clone();

        orch.handle_event(PlaybackEvent::ClipFinished(first), t0 + ms(200));
        assert_eq!(orch.phase(), SegmentPhase::PausedForVideo);

        orch.handle_event(PlaybackEvent::ClipFinished(second), t0 + ms(300));
        assert_eq!(orch.phase(), SegmentPhase::Playing);
    }

    #[test]
    fn test_manual_mode_muted_keeps_markers_without_audio() {
        let (mut orch, backend, _) = orchestrator(0);
        let t0 = Instant::now();
        orch.set_mode(PlaybackMode::Manual);
        orch.set_audio_enabled(false);

        orch.goto(0, 0, t0).unwrap();
        assert_eq!(orch.phase(), SegmentPhase::Silent);
        assert_eq!(backend.count(), 0);
        assert_eq!(orch.next_frame_deadline(), None);

        let segment = orch.current_segment().unwrap();
        assert_eq!(segment.marker_time("go"), Some(0.4));
        assert_eq!(segment.marker_time("hold"), Some(1.0));

        orch.set_audio_enabled(true);
        assert_eq!(orch.phase(), SegmentPhase::Loading);
        assert_eq!(backend.count(), 1);
    }

    #[test]
    fn test_auto_advance_off_holds_after_end() {
        let (mut orch, backend, _) = orchestrator(0);
        let t0 = Instant::now();
        orch.set_auto_advance(false, t0);
        orch.start(t0);
        media(&mut orch, &backend, MediaEvent::Ready, t0);
        media(&mut orch, &backend, MediaEvent::Ended, t0 + ms(1500));

        assert_eq!(orch.phase(), SegmentPhase::Ended);
        assert_eq!(orch.next_deadline(), None);

        orch.set_auto_advance(true, t0 + ms(2000));
        assert_eq!(
            orch.state(),
            PlaybackState::InterSegmentDelay {
                slide: 0,
                segment: 0
            }
        );
        assert_eq!(orch.next_deadline(), Some(t0 + ms(2300)));
    }

    #[test]
    fn test_navigation_crosses_empty_slide() {
        let (mut orch, _, _) = orchestrator(0);
        let t0 = Instant::now();

        assert!(orch.goto(7, 0, t0).is_err());
        assert!(orch.goto(0, 2, t0).is_err());
        assert!(orch.goto(1, 1, t0).is_err());

        orch.goto(2, 0, t0).unwrap();
        orch.previous(t0);
        assert_eq!(orch.state(), PlaybackState::ShowingSlide { slide: 1 });
        orch.previous(t0);
        assert_eq!(orch.position(), Some((0, Some(1))));
        orch.next(t0);
        assert_eq!(orch.state(), PlaybackState::ShowingSlide { slide: 1 });
        orch.next(t0);
        orch.next(t0);
        assert_eq!(orch.position(), Some((2, Some(0))));
    }

    #[test]
    fn test_refresh_alignment_updates_active_markers() {
        let (mut orch, _, _) = orchestrator(0);
        let t0 = Instant::now();
        orch.goto(0, 0, t0).unwrap();
        let generation = orch.sync().generation();

        orch.refresh_alignment(
            "c1_s1",
            vec![AlignmentEntry {
                segment_id: "intro".into(),
                audio_hash: "a2".into(),
                narration_hash: "n2".into(),
                words: vec![
                    AlignedWord::new("Watch", 0.0, 0.5),
                    AlignedWord::new("this", 0.9, 1.1),
                    AlignedWord::new("clip", 1.2, 1.6),
                    AlignedWord::new("now.", 1.8, 2.0),
                ],
                markers: vec![],
            }],
        );

        let segment = orch.current_segment().unwrap();
        assert_eq!(segment.marker_time("go"), Some(0.9));
        assert_eq!(segment.marker_time("hold"), Some(1.6));
        assert_eq!(orch.sync().generation(), generation);

        orch.refresh_alignment("c9_s9", vec![]);
        assert_eq!(orch.current_segment().unwrap().marker_time("go"), Some(0.9));
    }

    #[test]
    fn test_snapshot_channel_follows_state() {
        let (mut orch, _, _) = orchestrator(1000);
        let rx = orch.subscribe();
        assert_eq!(rx.borrow().state, PlaybackState::Idle);

        orch.goto(0, 1, Instant::now()).unwrap();
        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.slide, Some(0));
        assert_eq!(snapshot.segment, Some(1));
        assert_eq!(snapshot.segment_id.as_deref(), Some("detail"));
        assert_eq!(snapshot.reveal_index, 0);

        orch.stop();
        assert_eq!(rx.borrow().state, PlaybackState::Idle);
        assert_eq!(rx.borrow().segment_id, None);
    }

    #[test]
    fn test_load_demo_resets_session_and_cache() {
        let (mut orch, _, _) = orchestrator(0);
        orch.start(Instant::now());

        let mut other = demo(0);
        other.presentation.id = "other".into();
        other.alignment = AlignmentData::new();
        orch.load_demo(other);

        assert_eq!(orch.state(), PlaybackState::Idle);
        assert!(orch.alignment().is_loaded_for("other"));
        assert!(orch.sync().registry().contains("demo"));

        orch.goto(0, 0, Instant::now()).unwrap();
        assert!(orch.current_segment().unwrap().resolved_markers.is_empty());

        orch.close();
        assert_eq!(orch.alignment().demo_id(), None);
    }
}
