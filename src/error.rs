//! Typed error kinds for the replay engine.
//!
//! Errors encountered inside a Segment (log parse failure, codec failure,
//! missing file) are *contained*: the caller converts them into a `valid =
//! false` flag rather than propagating. This enum exists so that containment
//! boundary can match on a kind instead of parsing a string.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, ReplayError>;

#[derive(thiserror::Error, Debug)]
pub enum ReplayError {
    #[error("file missing: {0}")]
    FileMissing(PathBuf),

    #[error("file corrupt: {path}: {reason}")]
    FileCorrupt { path: PathBuf, reason: String },

    #[error("decode failure: {0}")]
    DecodeFailure(String),

    #[error("geometry mismatch: expected {expected_w}x{expected_h}, got {got_w}x{got_h}")]
    GeometryMismatch {
        expected_w: u32,
        expected_h: u32,
        got_w: u32,
        got_h: u32,
    },

    /// Not constructed on the hot path: `Control::seek_absolute` reports
    /// this case with a `tracing::warn!` and simply leaves the cursor where
    /// it was, rather than a `Result`-returning one. Kept as a typed variant for
    /// any caller (e.g. a future RPC boundary) that does want to surface
    /// the rejection as an error rather than a log line.
    #[error("seek to {requested_ns}ns is out of range [{start_ns}, {end_ns}]")]
    OutOfRangeSeek {
        requested_ns: u64,
        start_ns: u64,
        end_ns: u64,
    },

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("capnp error: {0}")]
    Capnp(#[from] capnp::Error),

    #[error("ffmpeg error: {0}")]
    Ffmpeg(#[from] ffmpeg::Error),

    #[error("route has no segments")]
    EmptyRoute,
}
