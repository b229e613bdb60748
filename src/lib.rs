//! Deterministic, time-accurate playback of recorded driving sessions.
//!
//! A route is read segment by segment (`segment`, `log_reader`,
//! `frame_reader`), kept resident in a sliding window around the playback
//! cursor (`window`), merged into one time-ordered stream (`merger`), and
//! walked by a pacing loop that republishes messages and camera frames at
//! their original relative timing (`control`, `camera`, `bus`).

pub mod log_capnp {
    include!(concat!(env!("OUT_DIR"), "/log_capnp.rs"));
}

pub mod bus;
pub mod camera;
pub mod control;
pub mod error;
pub mod frame_reader;
pub mod log;
pub mod log_reader;
pub mod merger;
pub mod route;
pub mod segment;
pub mod types;
pub mod window;

pub use control::Control;
pub use error::{ReplayError, Result};
pub use route::{Route, SegmentFiles};
pub use types::{Event, MessageKind, Nanos};
