//! Media handle contracts.
//!
//! The orchestrator never talks to an audio stack directly. A
//! [`MediaBackend`] opens one [`MediaHandle`] per segment; readiness, end
//! and failures come back asynchronously as [`PlaybackEvent`]s tagged with
//! the [`HandleId`] they were opened under. Events carrying an id other than
//! the active one are ignored, which is how callbacks of a replaced handle
//! are detached.

use std::fmt;
use std::path::Path;

use slidecast_common::error::SlidecastResult;
use tokio::sync::mpsc;

use crate::video_sync::ClipTicket;

/// Identity of one opened media handle. Never reused within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Asynchronous notification from a media handle.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    /// Enough data is buffered to start playback.
    Ready,
    /// Playback reached the end of the asset.
    Ended,
    /// The asset is missing or cannot be decoded at all.
    LoadFailed { reason: String },
    /// Decoding or output failed mid-playback.
    PlaybackFailed { reason: String },
}

/// Everything the driver loop reacts to besides timers and commands.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Media { handle: HandleId, event: MediaEvent },
    ClipFinished(ClipTicket),
}

/// Sending half handed to media backends and video players.
pub type EventSink = mpsc::UnboundedSender<PlaybackEvent>;

/// Receiving half consumed by the driver.
pub type EventStream = mpsc::UnboundedReceiver<PlaybackEvent>;

/// Create the event channel shared by backends, players and the driver.
pub fn event_channel() -> (EventSink, EventStream) {
    mpsc::unbounded_channel()
}

/// One opened audio asset.
///
/// Dropping the handle must silence it and stop any event delivery it
/// scheduled.
pub trait MediaHandle {
    /// Start or resume playback. A rejection is a playback failure.
    fn play(&mut self) -> SlidecastResult<()>;

    fn pause(&mut self);

    /// Current position in seconds.
    fn current_time(&self) -> f64;

    fn path(&self) -> &Path;
}

/// Factory for media handles.
pub trait MediaBackend {
    /// Begin loading `path`. The result arrives later as `Ready` or
    /// `LoadFailed` for `id`.
    fn open(&mut self, id: HandleId, path: &Path) -> Box<dyn MediaHandle>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}
