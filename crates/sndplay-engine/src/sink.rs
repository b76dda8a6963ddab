//! Output Sink abstraction.
//!
//! A sink is opened for one session and then shared between the producer thread
//! (write/flush/close) and the control thread (pause). Implementations use interior
//! mutability; every method takes `&self`.

use std::sync::Arc;

use anyhow::Result;

/// Format a sink is opened with. Samples are always interleaved `f32`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SinkFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl SinkFormat {
    /// Duration of `frames` frames in milliseconds.
    pub fn frames_to_ms(&self, frames: u64) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        frames.saturating_mul(1000) / u64::from(self.sample_rate)
    }
}

/// Renders audio and reports buffer occupancy.
pub trait OutputSink: Send + Sync {
    /// Buffer interleaved samples written at `timestamp_ms`.
    ///
    /// Callers are expected to wait for [`OutputSink::buffer_free_frames`] first.
    fn write(&self, timestamp_ms: u64, samples: &[f32]) -> Result<()>;

    /// Time position of the end of the written data.
    fn written_time_ms(&self) -> u64;

    /// Time position currently audible.
    fn output_time_ms(&self) -> u64;

    /// Frames that can be written without overrunning the buffer.
    fn buffer_free_frames(&self) -> usize;

    /// Total buffer capacity in frames.
    fn capacity_frames(&self) -> usize;

    /// `true` while previously written audio is still playing.
    fn is_draining(&self) -> bool;

    /// Discard buffered audio and restart the clock at `timestamp_ms`.
    fn flush(&self, timestamp_ms: u64);

    fn pause(&self, paused: bool);

    /// Stop rendering and release the device. Idempotent.
    fn close(&self);
}

/// Opens sinks for a given format.
pub trait OutputBackend: Send + Sync {
    fn open(&self, format: SinkFormat) -> Result<Arc<dyn OutputSink>>;
}
