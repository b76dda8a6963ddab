//! Output stage (CPAL output stream).
//!
//! Builds the CPAL output stream and provides the real-time audio callback.
//! The callback:
//! - refills a small local buffer from the shared queue without blocking
//! - applies basic channel mapping (mono↔stereo, best-effort otherwise)
//! - converts `f32` samples to the device sample format

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;

use crate::queue::SharedAudio;

/// Shared counters and flags wired into the output callback.
#[derive(Clone, Debug)]
pub struct OutputCallbackConfig {
    /// Maximum number of frames to pull from the queue per refill.
    pub refill_max_frames: usize,

    /// When `true`, the callback outputs silence and **does not drain** the queue.
    pub paused: Arc<AtomicBool>,

    /// Incremented by the number of source frames consumed from the queue.
    pub played_frames: Arc<AtomicU64>,

    /// Incremented when the callback has to output silence while unpaused.
    pub underrun_events: Arc<AtomicU64>,

    /// Frames already pulled from the queue but not yet played. Locked for the
    /// whole callback, so a holder of the lock sees `played_frames` settled.
    pub pending: Arc<Mutex<CallbackState>>,
}

/// Build a CPAL output stream that plays audio from `queue`.
///
/// `queue` must contain **interleaved `f32` samples** at the device sample rate.
/// The callback never waits on a condition variable; underruns are filled with zeros.
pub fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    queue: &Arc<SharedAudio>,
    cfg: OutputCallbackConfig,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, queue, cfg),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, queue, cfg),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, queue, cfg),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, queue, cfg),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: &Arc<SharedAudio>,
    cfg: OutputCallbackConfig,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    let channels_out = usize::from(config.channels).max(1);
    let refill_max_frames = cfg.refill_max_frames.max(1);
    let queue_cb = queue.clone();
    let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            if cfg.paused.load(Ordering::Relaxed) {
                data.fill(silence);
                return;
            }

            let mut st = cfg.pending.lock().unwrap_or_else(PoisonError::into_inner);
            let consumed = render(
                &mut st,
                &queue_cb,
                data,
                channels_out,
                refill_max_frames,
                &cfg.underrun_events,
            );
            if consumed > 0 {
                cfg.played_frames.fetch_add(consumed, Ordering::Relaxed);
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

/// Fill `data` from the pending buffer, refilling it from `queue` as needed.
///
/// Returns the number of frames played; the rest of `data` is silence.
fn render<T>(
    st: &mut CallbackState,
    queue: &SharedAudio,
    data: &mut [T],
    channels_out: usize,
    refill_max_frames: usize,
    underrun_events: &AtomicU64,
) -> u64
where
    T: cpal::Sample + cpal::FromSample<f32>,
{
    let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);
    let frames = data.len() / channels_out;
    let mut consumed_frames = 0u64;

    for frame in 0..frames {
        if st.pos >= st.src.len() {
            st.pos = 0;
            st.src.clear();
            match queue.pop_up_to(refill_max_frames) {
                Some(v) => st.src = v,
                None => {
                    underrun_events.fetch_add(1, Ordering::Relaxed);
                    data[frame * channels_out..].fill(silence);
                    break;
                }
            }
        }
        for ch in 0..channels_out {
            let sample = next_sample_mapped(st, channels_out, ch);
            data[frame * channels_out + ch] = <T as cpal::Sample>::from_sample::<f32>(sample);
        }
        consumed_frames += 1;
    }
    consumed_frames
}

/// Local buffer of interleaved samples fetched from [`SharedAudio`] so the callback
/// does not lock the queue per frame.
#[derive(Debug, Default)]
pub struct CallbackState {
    pos: usize,
    src_channels: usize,
    src: Vec<f32>,
}

impl CallbackState {
    pub fn new(src_channels: usize) -> Self {
        Self {
            pos: 0,
            src_channels: src_channels.max(1),
            src: Vec::new(),
        }
    }

    /// Drop the unplayed remainder. Returns the number of frames discarded.
    pub fn discard(&mut self) -> usize {
        let left = self.src.len().saturating_sub(self.pos) / self.src_channels;
        self.pos = 0;
        self.src.clear();
        left
    }
}

/// Read one output sample for `dst_ch`, applying a simple channel mapping.
///
/// Mapping rules:
/// - mono → stereo: duplicate channel 0
/// - stereo → mono: average L/R
/// - other layouts: clamp to available channels
///
/// `st.pos` advances once per destination frame (after the last channel).
fn next_sample_mapped(st: &mut CallbackState, dst_channels: usize, dst_ch: usize) -> f32 {
    if st.pos >= st.src.len() {
        return 0.0;
    }

    let frame_start = st.pos;
    let get_src = |ch: usize, st: &CallbackState| -> f32 {
        if ch < st.src_channels && frame_start + ch < st.src.len() {
            st.src[frame_start + ch]
        } else {
            0.0
        }
    };

    let out = match (st.src_channels, dst_channels) {
        (2, 1) => 0.5 * (get_src(0, st) + get_src(1, st)),
        (1, _) => get_src(0, st),
        _ => get_src(dst_ch.min(st.src_channels.saturating_sub(1)), st),
    };

    if dst_ch + 1 == dst_channels {
        st.pos += st.src_channels;
    }
    out
}
