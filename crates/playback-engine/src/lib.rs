//! Slidecast Playback Engine
//!
//! Sequences the narrated audio segments of a demo and fires marker-driven
//! video clips while narration plays. Media and video surfaces are traits,
//! so the same engine runs against a real audio stack, a UI, or the
//! simulated backends used by the CLI and tests.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                   PlaybackDriver                      │
//! │   select! { events, commands, timer, frame tick }     │
//! │  ┌─────────────────────────────────────────────────┐  │
//! │  │                  Orchestrator                   │  │
//! │  │  ┌────────────┐ ┌──────────────┐ ┌───────────┐  │  │
//! │  │  │ MediaHandle│ │ VideoSync    │ │ Alignment │  │  │
//! │  │  │ (one)      │ │ Coordinator  │ │ Cache     │  │  │
//! │  │  └─────┬──────┘ └──────┬───────┘ └───────────┘  │  │
//! │  └────────┼───────────────┼────────────────────────┘  │
//! │           ▼               ▼                           │
//! │     MediaBackend     VideoPlayer(s)                   │
//! └───────────┬───────────────┬───────────────────────────┘
//!             └──── PlaybackEvent ────▶ driver
//! ```

pub mod driver;
pub mod media;
pub mod orchestrator;
pub mod sim;
pub mod video_sync;

pub use driver::*;
pub use media::*;
pub use orchestrator::*;
pub use sim::*;
pub use video_sync::*;
