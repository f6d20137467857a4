//! Marker-driven video synchronization.
//!
//! Each frame the orchestrator hands the live narration time and a
//! marker-time lookup to the [`VideoSyncCoordinator`], which fires clip
//! playback on registered video players under three patterns:
//!
//! 1. **Blocking clip** (`pauseNarration = true`): narration pauses, the clip
//!    plays, narration resumes when the clip finishes.
//! 2. **Parallel clip** (`pauseNarration = false`): narration keeps running
//!    while the clip plays.
//! 3. **Wait** : at a later marker, narration stalls if the parallel clip is
//!    still running and resumes when it finishes.
//!
//! Narration resumes only once nothing holds it: every blocking clip and
//! every awaited parallel clip of the activation has finished.
//!
//! All coordination state is scoped to one segment activation. Activating a
//! segment clears it in full and bumps the generation, so completions from
//! clips started under an older activation are ignored.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use slidecast_narration_model::{BookmarkStore, ClipKey, VideoSeekTrigger, VideoWaitTrigger};

/// How a clip relates to narration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipPattern {
    /// Narration is paused for the duration of the clip.
    Blocking,
    /// Narration keeps running alongside the clip.
    Parallel,
}

/// Returned to the coordinator when a clip finishes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClipTicket {
    pub key: ClipKey,
    /// Coordinator generation at the time the clip was started.
    pub generation: u64,
    pub pattern: ClipPattern,
}

/// Instruction sent to a video player.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipRequest {
    pub ticket: ClipTicket,
    /// Seek target in seconds.
    pub start: f64,
    /// Stop here instead of at the natural end.
    pub end: Option<f64>,
    pub playback_rate: f64,
    /// When false the player only seeks and waits for the viewer.
    pub auto_play: bool,
}

/// Narration control emitted by the coordinator and applied by the
/// orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NarrationCommand {
    Pause,
    Resume,
}

/// A seek-capable video surface.
///
/// When a requested clip finishes, the player reports
/// `PlaybackEvent::ClipFinished(request.ticket)` on the event channel.
pub trait VideoPlayer {
    fn play_clip(&mut self, request: ClipRequest);
}

/// Proof of a player registration; pass back to unregister.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistrationToken {
    video_id: String,
    serial: u64,
}

impl RegistrationToken {
    pub fn video_id(&self) -> &str {
        &self.video_id
    }
}

struct Registration {
    serial: u64,
    player: Box<dyn VideoPlayer>,
}

/// Video players by video id.
#[derive(Default)]
pub struct VideoRegistry {
    players: HashMap<String, Registration>,
    next_serial: u64,
}

impl VideoRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a player for `video_id`, replacing any previous one.
    pub fn register(
        &mut self,
        video_id: impl Into<String>,
        player: Box<dyn VideoPlayer>,
    ) -> RegistrationToken {
        let video_id = video_id.into();
        self.next_serial += 1;
        let serial = self.next_serial;
        if self
            .players
            .insert(video_id.clone(), Registration { serial, player })
            .is_some()
        {
            tracing::debug!(video = %video_id, "Replaced video player registration");
        }
        RegistrationToken { video_id, serial }
    }

    /// Remove a registration. A token from a replaced registration is a
    /// no-op, so a late unregister never removes a newer player.
    pub fn unregister(&mut self, token: &RegistrationToken) -> bool {
        match self.players.get(&token.video_id) {
            Some(reg) if reg.serial == token.serial => {
                self.players.remove(&token.video_id);
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, video_id: &str) -> bool {
        self.players.contains_key(video_id)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    fn player_mut(&mut self, video_id: &str) -> Option<&mut dyn VideoPlayer> {
        self.players
            .get_mut(video_id)
            .map(|reg| reg.player.as_mut() as &mut dyn VideoPlayer)
    }
}

impl std::fmt::Debug for VideoRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoRegistry")
            .field("videos", &self.players.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Per-segment video sync state machine.
#[derive(Debug)]
pub struct VideoSyncCoordinator {
    bookmarks: BookmarkStore,
    registry: VideoRegistry,
    seeks: Vec<VideoSeekTrigger>,
    waits: Vec<VideoWaitTrigger>,
    fired_seeks: HashSet<usize>,
    fired_waits: HashSet<usize>,
    active_clips: HashSet<ClipKey>,
    /// Blocking clips still playing.
    blocking_clips: HashSet<ClipKey>,
    /// Parallel clips a wait trigger is stalled on.
    awaited_clips: HashSet<ClipKey>,
    generation: u64,
}

impl VideoSyncCoordinator {
    pub fn new(bookmarks: BookmarkStore) -> Self {
        Self {
            bookmarks,
            registry: VideoRegistry::new(),
            seeks: Vec::new(),
            waits: Vec::new(),
            fired_seeks: HashSet::new(),
            fired_waits: HashSet::new(),
            active_clips: HashSet::new(),
            blocking_clips: HashSet::new(),
            awaited_clips: HashSet::new(),
            generation: 0,
        }
    }

    /// Swap in the bookmarks of a newly opened demo and disarm.
    pub fn set_bookmarks(&mut self, bookmarks: BookmarkStore) {
        self.deactivate();
        self.bookmarks = bookmarks;
    }

    pub fn bookmarks(&self) -> &BookmarkStore {
        &self.bookmarks
    }

    pub fn registry(&self) -> &VideoRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut VideoRegistry {
        &mut self.registry
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Arm the triggers of a newly active segment and drop every trace of
    /// the previous activation.
    pub fn activate_segment(&mut self, seeks: &[VideoSeekTrigger], waits: &[VideoWaitTrigger]) {
        self.reset();
        self.seeks = seeks.to_vec();
        self.waits = waits.to_vec();
        tracing::debug!(
            generation = self.generation,
            seeks = self.seeks.len(),
            waits = self.waits.len(),
            "Video sync armed"
        );
    }

    /// Disarm everything, e.g. when playback completes or stops.
    pub fn deactivate(&mut self) {
        self.reset();
        self.seeks.clear();
        self.waits.clear();
    }

    fn reset(&mut self) {
        self.fired_seeks.clear();
        self.fired_waits.clear();
        self.active_clips.clear();
        self.blocking_clips.clear();
        self.awaited_clips.clear();
        self.generation += 1;
    }

    pub fn is_clip_active(&self, key: &ClipKey) -> bool {
        self.active_clips.contains(key)
    }

    /// Whether a wait trigger is stalled on this clip.
    pub fn is_waiting_for(&self, key: &ClipKey) -> bool {
        self.awaited_clips.contains(key)
    }

    /// Whether any clip still keeps narration paused.
    pub fn is_holding_narration(&self) -> bool {
        !self.blocking_clips.is_empty() || !self.awaited_clips.is_empty()
    }

    /// Fire every seek trigger whose marker time has been reached.
    pub fn check_and_fire_seeks<F>(&mut self, current_time: f64, marker_time: F) -> Vec<NarrationCommand>
    where
        F: Fn(&str) -> Option<f64>,
    {
        let mut commands = Vec::new();

        for (idx, trigger) in self.seeks.iter().enumerate() {
            if self.fired_seeks.contains(&idx) {
                continue;
            }
            let Some(at) = marker_time(&trigger.at_marker) else {
                continue;
            };
            if current_time < at {
                continue;
            }
            self.fired_seeks.insert(idx);

            let key = trigger.clip_key();
            let Some(start) = self.bookmarks.lookup(&trigger.video_id, &trigger.bookmark_id) else {
                tracing::warn!(clip = %key, "Unknown bookmark; seek trigger ignored");
                continue;
            };
            let end = match trigger.end_bookmark_id.as_deref() {
                None => None,
                Some(end_id) => match self.bookmarks.lookup(&trigger.video_id, end_id) {
                    Some(end) => Some(end),
                    None => {
                        tracing::warn!(clip = %key, end = end_id, "Unknown end bookmark; seek trigger ignored");
                        continue;
                    }
                },
            };
            let playback_rate = match trigger.playback_rate {
                None => 1.0,
                Some(rate) if rate.is_finite() && rate > 0.0 => rate,
                Some(rate) => {
                    tracing::warn!(clip = %key, rate, "Invalid playback rate; using 1.0");
                    1.0
                }
            };
            let Some(player) = self.registry.player_mut(&trigger.video_id) else {
                tracing::warn!(clip = %key, "No video player registered; seek trigger ignored");
                continue;
            };

            let pattern = if trigger.pause_narration {
                ClipPattern::Blocking
            } else {
                ClipPattern::Parallel
            };
            match pattern {
                ClipPattern::Blocking => {
                    self.blocking_clips.insert(key.clone());
                    commands.push(NarrationCommand::Pause);
                }
                ClipPattern::Parallel => {
                    self.active_clips.insert(key.clone());
                }
            }

            tracing::info!(
                clip = %key,
                ?pattern,
                marker = %trigger.at_marker,
                start,
                end,
                "Firing video seek"
            );
            player.play_clip(ClipRequest {
                ticket: ClipTicket {
                    key,
                    generation: self.generation,
                    pattern,
                },
                start,
                end,
                playback_rate,
                auto_play: trigger.auto_play,
            });
        }

        commands
    }

    /// Stall narration at wait markers whose clip is still running.
    pub fn check_and_wait_for_clips<F>(
        &mut self,
        current_time: f64,
        marker_time: F,
    ) -> Vec<NarrationCommand>
    where
        F: Fn(&str) -> Option<f64>,
    {
        let mut commands = Vec::new();

        for (idx, wait) in self.waits.iter().enumerate() {
            if self.fired_waits.contains(&idx) {
                continue;
            }
            let Some(at) = marker_time(&wait.at_marker) else {
                continue;
            };
            if current_time < at {
                continue;
            }
            self.fired_waits.insert(idx);

            let key = wait.clip_key();
            if self.active_clips.contains(&key) {
                tracing::info!(clip = %key, marker = %wait.at_marker, "Narration waiting for clip");
                commands.push(NarrationCommand::Pause);
                self.awaited_clips.insert(key);
            } else {
                tracing::debug!(clip = %key, "Clip already finished; no wait needed");
            }
        }

        commands
    }

    /// Handle a clip completion reported by a player.
    pub fn clip_finished(&mut self, ticket: &ClipTicket) -> Vec<NarrationCommand> {
        if ticket.generation != self.generation {
            tracing::debug!(
                clip = %ticket.key,
                ticket_generation = ticket.generation,
                generation = self.generation,
                "Ignoring completion from a previous segment"
            );
            return Vec::new();
        }

        let released = match ticket.pattern {
            ClipPattern::Blocking => self.blocking_clips.remove(&ticket.key),
            ClipPattern::Parallel => {
                self.active_clips.remove(&ticket.key);
                self.awaited_clips.remove(&ticket.key)
            }
        };
        if !released {
            return Vec::new();
        }

        if self.is_holding_narration() {
            tracing::info!(
                clip = %ticket.key,
                blocking = self.blocking_clips.len(),
                awaited = self.awaited_clips.len(),
                "Clip finished; narration still held"
            );
            return Vec::new();
        }
        tracing::info!(clip = %ticket.key, pattern = ?ticket.pattern, "Clip finished; resuming narration");
        vec![NarrationCommand::Resume]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use slidecast_narration_model::{Bookmark, VideoBookmarks};

    #[derive(Clone, Default)]
    struct RecordingPlayer {
        requests: Rc<RefCell<Vec<ClipRequest>>>,
    }

    impl VideoPlayer for RecordingPlayer {
        fn play_clip(&mut self, request: ClipRequest) {
            self.requests.borrow_mut().push(request);
        }
    }

    fn bookmarks() -> BookmarkStore {
        let mut store = BookmarkStore::new();
        store.insert(
            "demo",
            VideoBookmarks {
                src: "demo.mp4".into(),
                bookmarks: vec![
                    Bookmark {
                        id: "intro".into(),
                        time: 2.0,
                        label: None,
                    },
                    Bookmark {
                        id: "outro".into(),
                        time: 9.5,
                        label: Some("Wrap up".into()),
                    },
                ],
            },
        );
        store
    }

    fn seek(marker: &str, pause: bool) -> VideoSeekTrigger {
        VideoSeekTrigger {
            video_id: "demo".into(),
            bookmark_id: "intro".into(),
            at_marker: marker.into(),
            pause_narration: pause,
            auto_play: true,
            end_bookmark_id: None,
            playback_rate: None,
        }
    }

    fn wait(marker: &str) -> VideoWaitTrigger {
        VideoWaitTrigger {
            video_id: "demo".into(),
            bookmark_id: "intro".into(),
            at_marker: marker.into(),
        }
    }

    fn markers(id: &str) -> Option<f64> {
        match id {
            "go" => Some(1.0),
            "hold" => Some(3.0),
            _ => None,
        }
    }

    fn coordinator() -> (VideoSyncCoordinator, RecordingPlayer) {
        let player = RecordingPlayer::default();
        let mut sync = VideoSyncCoordinator::new(bookmarks());
        sync.registry_mut()
            .register("demo", Box::new(player.clone()));
        (sync, player)
    }

    #[test]
    fn test_seek_fires_once_per_activation() {
        let (mut sync, player) = coordinator();
        sync.activate_segment(&[seek("go", false)], &[]);

        assert!(sync.check_and_fire_seeks(0.5, markers).is_empty());
        assert_eq!(player.requests.borrow().len(), 0);

        sync.check_and_fire_seeks(1.0, markers);
        sync.check_and_fire_seeks(1.5, markers);
        sync.check_and_fire_seeks(4.0, markers);
        assert_eq!(player.requests.borrow().len(), 1);

        let request = player.requests.borrow()[0].clone();
        assert_eq!(request.start, 2.0);
        assert_eq!(request.end, None);
        assert_eq!(request.playback_rate, 1.0);
        assert_eq!(request.ticket.pattern, ClipPattern::Parallel);

        sync.activate_segment(&[seek("go", false)], &[]);
        sync.check_and_fire_seeks(1.2, markers);
        assert_eq!(player.requests.borrow().len(), 2);
    }

    #[test]
    fn test_blocking_clip_pauses_and_resumes() {
        let (mut sync, player) = coordinator();
        let mut trigger = seek("go", true);
        trigger.end_bookmark_id = Some("outro".into());
        trigger.playback_rate = Some(2.0);
        sync.activate_segment(&[trigger], &[]);

        let commands = sync.check_and_fire_seeks(1.0, markers);
        assert_eq!(commands, vec![NarrationCommand::Pause]);

        let request = player.requests.borrow()[0].clone();
        assert_eq!(request.end, Some(9.5));
        assert_eq!(request.playback_rate, 2.0);
        assert_eq!(request.ticket.pattern, ClipPattern::Blocking);

        assert_eq!(
            sync.clip_finished(&request.ticket),
            vec![NarrationCommand::Resume]
        );
    }

    #[test]
    fn test_stale_blocking_completion_does_not_resume() {
        let (mut sync, player) = coordinator();
        sync.activate_segment(&[seek("go", true)], &[]);
        sync.check_and_fire_seeks(1.0, markers);
        let stale = player.requests.borrow()[0].ticket.clone();

        // Two quick advances before the clip finishes.
        sync.activate_segment(&[], &[]);
        sync.activate_segment(&[seek("go", true)], &[]);

        assert!(sync.clip_finished(&stale).is_empty());
    }

    #[test]
    fn test_wait_pauses_while_parallel_clip_runs() {
        let (mut sync, player) = coordinator();
        sync.activate_segment(&[seek("go", false)], &[wait("hold")]);

        assert!(sync.check_and_fire_seeks(1.0, markers).is_empty());
        let ticket = player.requests.borrow()[0].ticket.clone();
        assert!(sync.is_clip_active(&ticket.key));

        assert!(sync.check_and_wait_for_clips(2.0, markers).is_empty());
        assert_eq!(
            sync.check_and_wait_for_clips(3.0, markers),
            vec![NarrationCommand::Pause]
        );
        assert!(sync.is_waiting_for(&ticket.key));

        assert_eq!(sync.clip_finished(&ticket), vec![NarrationCommand::Resume]);
        assert!(!sync.is_clip_active(&ticket.key));
        assert!(!sync.is_holding_narration());
    }

    #[test]
    fn test_wait_after_clip_finished_never_pauses() {
        let (mut sync, player) = coordinator();
        sync.activate_segment(&[seek("go", false)], &[wait("hold")]);
        sync.check_and_fire_seeks(1.0, markers);
        let ticket = player.requests.borrow()[0].ticket.clone();

        assert!(sync.clip_finished(&ticket).is_empty());
        assert!(sync.check_and_wait_for_clips(3.5, markers).is_empty());
        assert!(!sync.is_holding_narration());
    }

    #[test]
    fn test_activation_clears_active_clips_and_waits() {
        let (mut sync, player) = coordinator();
        sync.activate_segment(&[seek("go", false)], &[wait("hold")]);
        sync.check_and_fire_seeks(1.0, markers);
        sync.check_and_wait_for_clips(3.0, markers);
        let ticket = player.requests.borrow()[0].ticket.clone();
        let before = sync.generation();

        sync.activate_segment(&[], &[]);
        assert_eq!(sync.generation(), before + 1);
        assert!(!sync.is_clip_active(&ticket.key));
        assert!(!sync.is_holding_narration());
        assert!(sync.clip_finished(&ticket).is_empty());
    }

    #[test]
    fn test_missing_bookmark_or_marker_never_fires() {
        let (mut sync, player) = coordinator();
        let mut unknown_bookmark = seek("go", true);
        unknown_bookmark.bookmark_id = "nope".into();
        let unknown_marker = seek("nowhere", true);
        let mut unknown_end = seek("go", true);
        unknown_end.end_bookmark_id = Some("gone".into());
        sync.activate_segment(&[unknown_bookmark, unknown_marker, unknown_end], &[]);

        assert!(sync.check_and_fire_seeks(100.0, markers).is_empty());
        assert!(player.requests.borrow().is_empty());
    }

    #[test]
    fn test_unregistered_video_does_not_pause_narration() {
        let mut sync = VideoSyncCoordinator::new(bookmarks());
        sync.activate_segment(&[seek("go", true)], &[]);
        assert!(sync.check_and_fire_seeks(1.0, markers).is_empty());
    }

    #[test]
    fn test_multiple_triggers_fire_independently_in_one_tick() {
        let (mut sync, player) = coordinator();
        let mut second = seek("hold", false);
        second.bookmark_id = "outro".into();
        sync.activate_segment(&[seek("go", false), second], &[]);

        sync.check_and_fire_seeks(5.0, markers);
        let requests = player.requests.borrow();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].start, 2.0);
        assert_eq!(requests[1].start, 9.5);
    }

    #[test]
    fn test_seek_and_wait_on_same_marker_pause_in_one_tick() {
        let (mut sync, player) = coordinator();
        sync.activate_segment(&[seek("go", false)], &[wait("go")]);

        // Seeks run first, so the wait sees the clip it just started.
        let mut commands = sync.check_and_fire_seeks(1.0, markers);
        commands.extend(sync.check_and_wait_for_clips(1.0, markers));
        assert_eq!(commands, vec![NarrationCommand::Pause]);

        let ticket = player.requests.borrow()[0].ticket.clone();
        assert!(sync.is_waiting_for(&ticket.key));
        assert_eq!(sync.clip_finished(&ticket), vec![NarrationCommand::Resume]);
    }

    #[test]
    fn test_parallel_finish_does_not_resume_over_blocking_clip() {
        let (mut sync, player) = coordinator();
        let mut blocking = seek("hold", true);
        blocking.bookmark_id = "outro".into();
        sync.activate_segment(&[seek("go", false), blocking], &[wait("hold")]);

        sync.check_and_fire_seeks(1.0, markers);
        let mut commands = sync.check_and_fire_seeks(3.0, markers);
        commands.extend(sync.check_and_wait_for_clips(3.0, markers));
        assert_eq!(commands, vec![NarrationCommand::Pause, NarrationCommand::Pause]);

        let (parallel, blocking) = {
            let requests = player.requests.borrow();
            (requests[0].ticket.clone(), requests[1].ticket.clone())
        };
        assert_eq!(blocking.pattern, ClipPattern::Blocking);

        assert!(sync.clip_finished(&parallel).is_empty());
        assert!(sync.is_holding_narration());
        assert_eq!(sync.clip_finished(&blocking), vec![NarrationCommand::Resume]);
        assert!(!sync.is_holding_narration());
    }

    #[test]
    fn test_two_waits_resume_after_both_clips() {
        let (mut sync, player) = coordinator();
        let mut second = seek("go", false);
        second.bookmark_id = "outro".into();
        let mut second_wait = wait("hold");
        second_wait.bookmark_id = "outro".into();
        sync.activate_segment(&[seek("go", false), second], &[wait("hold"), second_wait]);

        sync.check_and_fire_seeks(1.0, markers);
        assert_eq!(
            sync.check_and_wait_for_clips(3.0, markers),
            vec![NarrationCommand::Pause, NarrationCommand::Pause]
        );

        let (first, second) = {
            let requests = player.requests.borrow();
            (requests[0].ticket.clone(), requests[1].ticket.clone())
        };
        assert!(sync.clip_finished(&first).is_empty());
        assert!(sync.is_waiting_for(&second.key));
        assert_eq!(sync.clip_finished(&second), vec![NarrationCommand::Resume]);
    }

    #[test]
    fn test_registry_tokens() {
        let mut registry = VideoRegistry::new();
        let first = registry.register("demo", Box::new(RecordingPlayer::default()));
        let second = registry.register("demo", Box::new(RecordingPlayer::default()));
        assert_eq!(registry.len(), 1);

        assert!(!registry.unregister(&first));
        assert!(registry.contains("demo"));
        assert!(registry.unregister(&second));
        assert!(registry.is_empty());
        assert_eq!(second.video_id(), "demo");
    }
}
