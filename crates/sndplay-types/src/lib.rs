use serde::{Deserialize, Serialize};

/// Reason why a playback session ended.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackEndReason {
    /// Source exhausted and the sink finished playing everything written.
    Eof,
    /// The source reported a read failure; buffered audio was still drained.
    Error,
    /// Playback was explicitly stopped by the control side.
    Stopped,
}

/// Song details published when a session starts, and returned by song queries.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SongInfo {
    /// Display title (file basename).
    pub title: String,
    /// Length in milliseconds, rounded up. `0` when unknown.
    pub length_ms: u64,
    /// Bit-rate estimate in bits per second.
    pub bit_rate: u64,
    /// Source sample rate in Hz.
    pub sample_rate: u32,
    /// Source channel count.
    pub channels: u16,
}

/// Point-in-time view of a playback session.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionStatus {
    /// Title of the current song, if a session exists.
    pub title: Option<String>,
    /// `true` while the producer is decoding/delivering.
    pub playing: bool,
    /// `true` once the source was exhausted and the sink drained.
    pub end_of_stream: bool,
    /// Output position in milliseconds as reported by the sink.
    pub position_ms: Option<u64>,
    /// Song length in milliseconds.
    pub duration_ms: Option<u64>,
    /// Terminal reason once the session has ended.
    pub end_reason: Option<PlaybackEndReason>,
}
