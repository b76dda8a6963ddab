//! Device-backed Output Sink.
//!
//! Written audio goes into a bounded [`SharedAudio`] queue that the CPAL callback
//! drains. The CPAL stream itself lives on a dedicated output thread for the
//! lifetime of the sink, so the sink handle stays `Send + Sync`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::Sender;

use crate::config::EngineConfig;
use crate::device;
use crate::output::{self, CallbackState, OutputCallbackConfig};
use crate::queue::{SharedAudio, calc_max_buffered_samples};
use crate::sink::{OutputBackend, OutputSink, SinkFormat};

/// Opens [`CpalSink`]s on the configured output device.
#[derive(Clone, Debug)]
pub struct CpalBackend {
    device: Option<String>,
    buffer_seconds: f32,
    refill_max_frames: usize,
}

impl CpalBackend {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            device: config.device.clone(),
            buffer_seconds: config.buffer_seconds,
            refill_max_frames: config.refill_max_frames,
        }
    }
}

impl OutputBackend for CpalBackend {
    fn open(&self, format: SinkFormat) -> Result<Arc<dyn OutputSink>> {
        Ok(Arc::new(CpalSink::open(self, format)?))
    }
}

/// Clock bookkeeping for written and audible time.
#[derive(Debug, Default, Clone, Copy)]
struct SinkClock {
    /// Timestamp the clock was last restarted at (open or flush).
    base_ms: u64,
    /// Frames written since the last restart.
    written_frames: u64,
    /// Value of the played-frames counter at the last restart.
    played_at_base: u64,
}

impl SinkClock {
    fn written_ms(&self, format: &SinkFormat) -> u64 {
        self.base_ms + format.frames_to_ms(self.written_frames)
    }

    fn played_frames(&self, played_total: u64) -> u64 {
        played_total
            .saturating_sub(self.played_at_base)
            .min(self.written_frames)
    }

    fn output_ms(&self, format: &SinkFormat, played_total: u64) -> u64 {
        self.base_ms + format.frames_to_ms(self.played_frames(played_total))
    }

    /// Frames written since the last restart that the device has not played yet.
    fn unplayed_frames(&self, played_total: u64) -> u64 {
        self.written_frames - self.played_frames(played_total)
    }

    fn restart(&mut self, timestamp_ms: u64, played_total: u64) {
        self.base_ms = timestamp_ms;
        self.written_frames = 0;
        self.played_at_base = played_total;
    }
}

struct StreamThread {
    stop_tx: Sender<()>,
    join: thread::JoinHandle<()>,
}

/// CPAL output sink for one playback session.
pub struct CpalSink {
    format: SinkFormat,
    queue: Arc<SharedAudio>,
    paused: Arc<AtomicBool>,
    played_frames: Arc<AtomicU64>,
    underrun_events: Arc<AtomicU64>,
    pending: Arc<Mutex<CallbackState>>,
    clock: Mutex<SinkClock>,
    stream: Mutex<Option<StreamThread>>,
    closed: AtomicBool,
}

impl CpalSink {
    /// Start an output stream for `format` and wait until it is playing.
    pub fn open(backend: &CpalBackend, format: SinkFormat) -> Result<Self> {
        let channels = usize::from(format.channels);
        let max_samples =
            calc_max_buffered_samples(format.sample_rate, channels, backend.buffer_seconds);
        let queue = Arc::new(SharedAudio::new(channels, max_samples));
        let paused = Arc::new(AtomicBool::new(false));
        let played_frames = Arc::new(AtomicU64::new(0));
        let underrun_events = Arc::new(AtomicU64::new(0));
        let pending = Arc::new(Mutex::new(CallbackState::new(channels)));

        let callback = OutputCallbackConfig {
            refill_max_frames: backend.refill_max_frames,
            paused: paused.clone(),
            played_frames: played_frames.clone(),
            underrun_events: underrun_events.clone(),
            pending: pending.clone(),
        };

        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<()>>(1);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let needle = backend.device.clone();
        let queue_thread = queue.clone();

        let join = thread::Builder::new()
            .name("sndplay-output".to_string())
            .spawn(move || {
                let stream = match start_stream(needle.as_deref(), format, &queue_thread, callback) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Sender dropped or signalled: either way the sink is closing.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .context("spawn output thread")?;

        let ready = ready_rx
            .recv()
            .map_err(|_| anyhow!("output thread exited during setup"));
        if let Err(e) = ready.and_then(|r| r) {
            let _ = join.join();
            return Err(e);
        }

        tracing::info!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            buffer_frames = queue.max_frames(),
            "output opened"
        );

        Ok(Self {
            format,
            queue,
            paused,
            played_frames,
            underrun_events,
            pending,
            clock: Mutex::new(SinkClock::default()),
            stream: Mutex::new(Some(StreamThread { stop_tx, join })),
            closed: AtomicBool::new(false),
        })
    }

    fn clock(&self) -> SinkClock {
        *self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn start_stream(
    needle: Option<&str>,
    format: SinkFormat,
    queue: &Arc<SharedAudio>,
    callback: OutputCallbackConfig,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = device::pick_device(&host, needle)?;
    let config = device::pick_output_config(&device, format.sample_rate, format.channels)?;
    tracing::info!(
        device = %device.description()?,
        device_channels = config.channels(),
        sample_format = ?config.sample_format(),
        "output device"
    );
    let stream_config = config.config();
    let stream = output::build_output_stream(
        &device,
        &stream_config,
        config.sample_format(),
        queue,
        callback,
    )?;
    stream.play()?;
    Ok(stream)
}

impl OutputSink for CpalSink {
    fn write(&self, timestamp_ms: u64, samples: &[f32]) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        let channels = usize::from(self.format.channels).max(1);
        let accepted = self.queue.push_interleaved_blocking(samples);
        let frames = (accepted / channels) as u64;
        let mut clock = self.clock.lock().unwrap_or_else(PoisonError::into_inner);
        clock.written_frames += frames;
        tracing::trace!(timestamp_ms, frames, "output write");
        Ok(())
    }

    fn written_time_ms(&self) -> u64 {
        self.clock().written_ms(&self.format)
    }

    fn output_time_ms(&self) -> u64 {
        let played = self.played_frames.load(Ordering::Relaxed);
        self.clock().output_ms(&self.format, played)
    }

    fn buffer_free_frames(&self) -> usize {
        self.queue.free_frames()
    }

    fn capacity_frames(&self) -> usize {
        self.queue.max_frames()
    }

    fn is_draining(&self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let played = self.played_frames.load(Ordering::Relaxed);
        self.clock().unplayed_frames(played) > 0
    }

    fn flush(&self, timestamp_ms: u64) {
        // Holding the callback buffer keeps the callback out until the clock is rebased.
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let dropped = self.queue.clear() + pending.discard();
        let played = self.played_frames.load(Ordering::Relaxed);
        self.clock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .restart(timestamp_ms, played);
        drop(pending);
        tracing::debug!(timestamp_ms, dropped_frames = dropped, "output flushed");
    }

    fn pause(&self, paused: bool) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.paused.store(paused, Ordering::Relaxed);
        tracing::info!(paused, "output pause set");
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.queue.close();
        let stream = self
            .stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(StreamThread { stop_tx, join }) = stream {
            let _ = stop_tx.send(());
            if join.join().is_err() {
                tracing::warn!("output thread panicked");
            }
        }
        tracing::info!(
            underrun_events = self.underrun_events.load(Ordering::Relaxed),
            "output closed"
        );
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FMT: SinkFormat = SinkFormat {
        sample_rate: 1_000,
        channels: 2,
    };

    #[test]
    fn clock_tracks_written_time() {
        let mut clock = SinkClock::default();
        clock.written_frames = 250;
        assert_eq!(clock.written_ms(&FMT), 250);
    }

    #[test]
    fn restart_rebases_both_clocks() {
        let mut clock = SinkClock::default();
        clock.written_frames = 5_000;
        clock.restart(2_000, 1_200);
        assert_eq!(clock.written_ms(&FMT), 2_000);
        assert_eq!(clock.output_ms(&FMT, 1_200), 2_000);

        clock.written_frames = 500;
        assert_eq!(clock.output_ms(&FMT, 1_500), 2_300);
    }

    #[test]
    fn frames_held_by_the_callback_still_count_as_unplayed() {
        let mut clock = SinkClock::default();
        clock.written_frames = 4_096;
        // The queue is empty once the callback has pulled everything, but only
        // 1_000 frames have reached the device.
        assert_eq!(clock.unplayed_frames(1_000), 3_096);
        assert_eq!(clock.unplayed_frames(4_096), 0);
    }

    #[test]
    fn restart_leaves_nothing_unplayed() {
        let mut clock = SinkClock::default();
        clock.written_frames = 4_096;
        clock.restart(3_000, 1_000);
        assert_eq!(clock.unplayed_frames(1_000), 0);

        clock.written_frames = 200;
        assert_eq!(clock.unplayed_frames(1_050), 150);
        assert_eq!(clock.output_ms(&FMT, 1_050), 3_050);
    }

    #[test]
    fn output_time_never_passes_written_time() {
        let mut clock = SinkClock::default();
        clock.written_frames = 100;
        assert_eq!(clock.output_ms(&FMT, 10_000), 100);
    }
}
