//! Slidecast Narration Model
//!
//! Defines the data contracts of a narrated slide deck and the pure
//! resolvers that turn narration text into timed sync points:
//! - **Markers:** Inline `{#id}` / `{id#}` anchors parsed out of narration text
//! - **Timing:** Layered delay configuration (demo → slide → segment)
//! - **Alignment:** Word-level forced-alignment data and marker time resolution
//! - **Presentation:** Slides, narration segments and their video triggers
//! - **Video:** Bookmark store and clip trigger definitions
//! - **Bundle:** A demo directory loaded from disk
//!
//! Nothing in this crate performs playback; every resolver is a pure
//! function of its inputs.

pub mod alignment;
pub mod bundle;
pub mod error;
pub mod marker;
pub mod presentation;
pub mod timing;
pub mod video;

pub use alignment::*;
pub use bundle::*;
pub use error::*;
pub use marker::*;
pub use presentation::*;
pub use timing::*;
pub use video::*;
