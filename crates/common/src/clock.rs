//! Clock and timing utilities for narration playback.
//!
//! A playback session is anchored to the moment it started. This module
//! provides:
//! - The session epoch (monotonic + wall clock)
//! - Conversions between media seconds and `Duration`
//! - A frame pacer that gates the per-frame sync sampler

use std::time::{Duration, Instant};

/// A session clock that provides monotonic timestamps relative to
/// a fixed epoch (the moment the presentation started).
#[derive(Debug, Clone)]
pub struct SessionClock {
    epoch: Instant,

    /// Wall-clock time at epoch (RFC 3339).
    epoch_wall: String,
}

impl SessionClock {
    /// Create a new session clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Seconds elapsed since the session started.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Wall-clock time at session start.
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }
}

/// Convert media seconds to a `Duration`. Negative and non-finite values
/// collapse to zero.
pub fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_finite() && secs > 0.0 {
        Duration::from_secs_f64(secs)
    } else {
        Duration::ZERO
    }
}

/// Frame pacer for the playback sampler.
///
/// Time is expressed as nanoseconds since an arbitrary epoch chosen by the
/// caller, so the pacer works the same under real and paused test clocks.
#[derive(Debug, Clone)]
pub struct FramePacer {
    target_interval_ns: u64,
    last_tick_ns: Option<u64>,
}

impl FramePacer {
    /// Create a pacer targeting the given Hz rate (0 is treated as 1 Hz).
    pub fn new(target_hz: u32) -> Self {
        Self {
            target_interval_ns: 1_000_000_000 / u64::from(target_hz.max(1)),
            last_tick_ns: None,
        }
    }

    /// Check if enough time has passed for the next frame.
    /// Returns true and records the tick if ready. The first call after
    /// construction or `reset` always returns true.
    pub fn should_tick(&mut self, current_ns: u64) -> bool {
        match self.last_tick_ns {
            None => {
                self.last_tick_ns = Some(current_ns);
                true
            }
            Some(last) if current_ns >= last + self.target_interval_ns => {
                self.last_tick_ns = Some(current_ns);
                true
            }
            _ => false,
        }
    }

    /// When the next frame is due, or `None` if the pacer is idle and the
    /// next call to `should_tick` fires immediately.
    pub fn next_due_ns(&self) -> Option<u64> {
        self.last_tick_ns.map(|last| last + self.target_interval_ns)
    }

    /// Forget the last tick; used whenever the sampler is restarted.
    pub fn reset(&mut self) {
        self.last_tick_ns = None;
    }
}
