//! Source Handle abstraction: a seekable provider of interleaved `f32` frames.

use anyhow::Result;

/// Stream properties queried once when a source is opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceInfo {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
    /// Total frames when the container reports them.
    pub frames: Option<u64>,
    /// Whether [`Source::seek`] is supported.
    pub seekable: bool,
}

impl SourceInfo {
    /// Length in milliseconds, rounded up. `0` when the rate or frame count is unknown.
    pub fn length_ms(&self) -> u64 {
        match self.frames {
            Some(frames) if self.sample_rate > 0 => {
                let rate = u64::from(self.sample_rate);
                frames.saturating_mul(1000).div_ceil(rate)
            }
            _ => 0,
        }
    }

    /// Bit-rate estimate assuming 32-bit samples.
    pub fn bit_rate(&self) -> u64 {
        u64::from(self.sample_rate) * 32
    }

    /// Frame index equivalent to a millisecond offset.
    pub fn frame_at_ms(&self, ms: u64) -> u64 {
        ms.saturating_mul(u64::from(self.sample_rate)) / 1000
    }
}

/// An open, decoded audio stream.
///
/// Only the producer thread touches a source once playback starts.
pub trait Source: Send {
    /// Stream properties.
    fn info(&self) -> SourceInfo;

    /// Replace `out` with up to `max_frames` interleaved frames.
    ///
    /// Returns the number of frames read. `Ok(0)` is a clean end of stream;
    /// a failed read is reported as `Err`.
    fn read(&mut self, max_frames: usize, out: &mut Vec<f32>) -> Result<usize>;

    /// Reposition the read cursor to `frame`.
    fn seek(&mut self, frame: u64) -> Result<()>;

    /// Release the underlying stream. Further reads return end of stream.
    fn close(&mut self);
}

/// Opens sources by uri.
pub trait SourceProvider: Send + Sync {
    fn open(&self, uri: &str) -> Result<Box<dyn Source>>;
}
