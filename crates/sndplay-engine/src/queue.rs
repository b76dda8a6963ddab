//! Thread-safe bounded queue for interleaved audio samples.
//!
//! [`SharedAudio`] is the buffer between the producer side of the device sink
//! (`write`) and the CPAL callback (non-blocking drain). Its occupancy is what the
//! sink reports as free space and drain state.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Thread-safe bounded queue for interleaved `f32` audio samples.
///
/// ## Design
/// - **Bounded** by `max_buffered_samples` to cap memory and latency.
/// - Uses a single [`Condvar`] as a general “state changed” signal.
/// - A `done` flag is stored *under the same mutex* as the queue to avoid races.
///
/// Samples are stored **interleaved**; the `channels` count is fixed for the
/// lifetime of the queue.
pub struct SharedAudio {
    channels: usize,
    inner: Mutex<SharedInner>,
    cv: Condvar,
    max_buffered_samples: usize,
    low_watermark_ms: AtomicU64,
}

struct SharedInner {
    queue: VecDeque<f32>,
    done: bool,
}

/// Compute a conservative queue capacity in **samples** for a `(rate, channels, seconds)` target.
///
/// - If `buffer_seconds` is non-finite or `<= 0.0`, a safe fallback is used.
/// - The returned value is `ceil(rate_hz * buffer_seconds) * channels` (saturating).
pub fn calc_max_buffered_samples(rate_hz: u32, channels: usize, buffer_seconds: f32) -> usize {
    let secs = if buffer_seconds.is_finite() && buffer_seconds > 0.0 {
        buffer_seconds
    } else {
        2.0
    };

    let frames = (rate_hz as f32 * secs).ceil() as usize;
    frames.saturating_mul(channels)
}

impl SharedAudio {
    /// Create a new bounded queue.
    ///
    /// `max_buffered_samples` is a cap in **samples** (not frames); it is raised to
    /// at least one whole frame.
    pub fn new(channels: usize, max_buffered_samples: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            inner: Mutex::new(SharedInner {
                queue: VecDeque::new(),
                done: false,
            }),
            cv: Condvar::new(),
            max_buffered_samples: max_buffered_samples.max(channels),
            low_watermark_ms: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SharedInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Maximum buffered frames (capacity) for this queue.
    pub fn max_frames(&self) -> usize {
        self.max_buffered_samples / self.channels
    }

    /// Current buffered frames (best-effort snapshot).
    pub fn len_frames(&self) -> usize {
        self.lock().queue.len() / self.channels
    }

    /// Frames that fit before the queue is full.
    pub fn free_frames(&self) -> usize {
        let queued = self.lock().queue.len();
        self.max_buffered_samples.saturating_sub(queued) / self.channels
    }

    #[cfg(test)]
    pub(crate) fn is_done(&self) -> bool {
        self.lock().done
    }

    /// Mark the queue as finished and wake all waiters. Idempotent.
    pub fn close(&self) {
        let mut g = self.lock();
        g.done = true;
        g.queue.clear();
        drop(g);
        self.cv.notify_all();
    }

    /// Drop everything buffered. Returns the number of frames discarded.
    pub fn clear(&self) -> usize {
        let mut g = self.lock();
        let dropped = g.queue.len() / self.channels;
        g.queue.clear();
        drop(g);
        self.cv.notify_all();
        dropped
    }

    /// Push interleaved samples into the queue, blocking when the queue is full.
    ///
    /// If the queue is closed while waiting, this returns early and drops remaining
    /// samples. Returns the number of samples accepted.
    pub fn push_interleaved_blocking(&self, samples: &[f32]) -> usize {
        let mut offset = 0;

        while offset < samples.len() {
            let mut g = self.lock();

            while g.queue.len() >= self.max_buffered_samples && !g.done {
                g = self.cv.wait(g).unwrap_or_else(PoisonError::into_inner);
            }
            if g.done {
                return offset;
            }

            let room = self.max_buffered_samples - g.queue.len();
            let end = samples.len().min(offset + room);
            g.queue.extend(samples[offset..end].iter().copied());
            offset = end;

            drop(g);
            self.cv.notify_all();
        }
        offset
    }

    /// Return immediately with up to `max_frames` whole frames, or `None` if empty.
    pub fn pop_up_to(&self, max_frames: usize) -> Option<Vec<f32>> {
        let mut g = self.lock();

        let available_frames = g.queue.len() / self.channels;
        let take_samples = available_frames.min(max_frames) * self.channels;
        if take_samples == 0 {
            return None;
        }

        let out: Vec<f32> = g.queue.drain(..take_samples).collect();
        let queued = g.queue.len();
        drop(g);
        self.cv.notify_all();
        self.log_low_watermark(queued);
        Some(out)
    }

    fn log_low_watermark(&self, queued: usize) {
        let threshold = (self.max_buffered_samples / 8).max(self.channels * 16);
        if queued > 0 && queued < threshold {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_else(|_| Duration::from_millis(0))
                .as_millis() as u64;
            let last = self.low_watermark_ms.load(Ordering::Relaxed);
            if now.saturating_sub(last) > 1000 {
                self.low_watermark_ms.store(now, Ordering::Relaxed);
                tracing::debug!(
                    queued_samples = queued,
                    threshold_samples = threshold,
                    "output queue low watermark"
                );
            }
        }
    }
}
