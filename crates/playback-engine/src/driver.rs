//! Async scheduler around the [`Orchestrator`].
//!
//! The driver owns the orchestrator and runs a single `select!` loop over
//! media/clip events, control commands, the pending timer and the frame
//! deadline. Everything the orchestrator does happens on this one task.

use slidecast_common::error::{SlidecastError, SlidecastResult};
use slidecast_narration_model::AlignmentEntry;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};

use crate::media::EventStream;
use crate::orchestrator::{Orchestrator, PlaybackMode, PlaybackSnapshot, PlaybackState};

/// Requests accepted by a running driver.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    Start,
    Next,
    Previous,
    Goto { slide: usize, segment: usize },
    SetMode(PlaybackMode),
    SetAutoAdvance(bool),
    SetAudioEnabled(bool),
    /// Fresh alignment for one slide, e.g. after audio regeneration.
    RefreshAlignment {
        key: String,
        entries: Vec<AlignmentEntry>,
    },
    Stop,
}

/// Cloneable handle for steering a running driver.
#[derive(Debug, Clone)]
pub struct PlaybackController {
    commands: mpsc::UnboundedSender<ControlCommand>,
    snapshots: watch::Receiver<PlaybackSnapshot>,
}

impl PlaybackController {
    pub fn send(&self, command: ControlCommand) -> SlidecastResult<()> {
        self.commands
            .send(command)
            .map_err(|_| SlidecastError::sync("Playback driver is no longer running"))
    }

    pub fn start(&self) -> SlidecastResult<()> {
        self.send(ControlCommand::Start)
    }

    pub fn next(&self) -> SlidecastResult<()> {
        self.send(ControlCommand::Next)
    }

    pub fn previous(&self) -> SlidecastResult<()> {
        self.send(ControlCommand::Previous)
    }

    pub fn goto(&self, slide: usize, segment: usize) -> SlidecastResult<()> {
        self.send(ControlCommand::Goto { slide, segment })
    }

    pub fn set_mode(&self, mode: PlaybackMode) -> SlidecastResult<()> {
        self.send(ControlCommand::SetMode(mode))
    }

    pub fn stop(&self) -> SlidecastResult<()> {
        self.send(ControlCommand::Stop)
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackSnapshot> {
        self.snapshots.clone()
    }

    /// Wait until a published snapshot satisfies `predicate`.
    pub async fn wait_for<F>(&self, predicate: F) -> SlidecastResult<PlaybackSnapshot>
    where
        F: FnMut(&PlaybackSnapshot) -> bool,
    {
        let mut rx = self.snapshots.clone();
        let snapshot = rx
            .wait_for(predicate)
            .await
            .map_err(|_| SlidecastError::sync("Playback driver dropped before condition was met"))?;
        Ok(snapshot.clone())
    }
}

/// Runs an orchestrator until playback completes or is stopped.
pub struct PlaybackDriver {
    orchestrator: Orchestrator,
    events: EventStream,
    commands: mpsc::UnboundedReceiver<ControlCommand>,
    exit_on_complete: bool,
}

impl PlaybackDriver {
    pub fn new(orchestrator: Orchestrator, events: EventStream) -> (Self, PlaybackController) {
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = PlaybackController {
            commands: tx,
            snapshots: orchestrator.subscribe(),
        };
        let driver = Self {
            orchestrator,
            events,
            commands: rx,
            exit_on_complete: true,
        };
        (driver, controller)
    }

    /// Keep running after narrated playback completes (manual sessions).
    pub fn keep_alive(mut self) -> Self {
        self.exit_on_complete = false;
        self
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn orchestrator_mut(&mut self) -> &mut Orchestrator {
        &mut self.orchestrator
    }

    /// Drive playback. Returns the final snapshot.
    pub async fn run(mut self) -> PlaybackSnapshot {
        let mut events_open = true;
        let mut commands_open = true;

        loop {
            if self.exit_on_complete
                && self.orchestrator.state() == PlaybackState::Complete
                && self.orchestrator.mode() == PlaybackMode::Narrated
            {
                break;
            }

            let now = Instant::now();
            let timer = self.orchestrator.next_deadline();
            let frame = self.orchestrator.next_frame_deadline();

            if !events_open && !commands_open && timer.is_none() && frame.is_none() {
                tracing::warn!("All inputs closed with nothing scheduled; stopping driver");
                break;
            }

            tokio::select! {
                event = self.events.recv(), if events_open => match event {
                    Some(event) => self.orchestrator.handle_event(event, Instant::now()),
                    None => {
                        tracing::debug!("Event channel closed");
                        events_open = false;
                    }
                },
                command = self.commands.recv(), if commands_open => match command {
                    Some(ControlCommand::Stop) => {
                        self.orchestrator.stop();
                        break;
                    }
                    Some(command) => self.apply(command),
                    None => {
                        tracing::debug!("Control channel closed");
                        commands_open = false;
                    }
                },
                _ = sleep_until(timer.unwrap_or(now)), if timer.is_some() => {
                    self.orchestrator.poll_timers(Instant::now());
                }
                _ = sleep_until(frame.unwrap_or(now)), if frame.is_some() => {
                    self.orchestrator.frame_tick(Instant::now());
                }
            }
        }

        let snapshot = self.orchestrator.snapshot();
        tracing::info!(state = ?snapshot.state, "Playback driver finished");
        snapshot
    }

    fn apply(&mut self, command: ControlCommand) {
        let now = Instant::now();
        tracing::debug!(?command, "Control command");
        match command {
            ControlCommand::Start => self.orchestrator.start(now),
            ControlCommand::Next => self.orchestrator.next(now),
            ControlCommand::Previous => self.orchestrator.previous(now),
            ControlCommand::Goto { slide, segment } => {
                if let Err(e) = self.orchestrator.goto(slide, segment, now) {
                    tracing::warn!(error = %e, "Ignoring goto");
                }
            }
            ControlCommand::SetMode(mode) => self.orchestrator.set_mode(mode),
            ControlCommand::SetAutoAdvance(enabled) => {
                self.orchestrator.set_auto_advance(enabled, now)
            }
            ControlCommand::SetAudioEnabled(enabled) => {
                self.orchestrator.set_audio_enabled(enabled)
            }
            ControlCommand::RefreshAlignment { key, entries } => {
                self.orchestrator.refresh_alignment(&key, entries)
            }
            ControlCommand::Stop => self.orchestrator.stop(),
        }
    }
}
