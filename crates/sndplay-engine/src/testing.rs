//! In-memory sources and simulated sinks for engine tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};

use crate::sink::{OutputBackend, OutputSink, SinkFormat};
use crate::source::{Source, SourceInfo, SourceProvider};

/// Shared count of `close()` calls.
#[derive(Clone, Debug, Default)]
pub struct CloseCounter(Arc<AtomicUsize>);

impl CloseCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Synthetic source producing `frames` frames; sample value is the frame index.
pub struct MemorySource {
    info: SourceInfo,
    pos: u64,
    fail_after: Option<u64>,
    closes: CloseCounter,
    closed: bool,
}

impl MemorySource {
    pub fn new(sample_rate: u32, channels: u16, frames: u64) -> Self {
        Self {
            info: SourceInfo {
                sample_rate,
                channels,
                frames: Some(frames),
                seekable: true,
            },
            pos: 0,
            fail_after: None,
            closes: CloseCounter::default(),
            closed: false,
        }
    }

    pub fn close_counter(&self) -> CloseCounter {
        self.closes.clone()
    }

    /// Make reads fail once the cursor reaches `frame`.
    pub fn fail_after_frames(&mut self, frame: u64) {
        self.fail_after = Some(frame);
    }

    pub fn set_seekable(&mut self, seekable: bool) {
        self.info.seekable = seekable;
    }
}

impl Source for MemorySource {
    fn info(&self) -> SourceInfo {
        self.info
    }

    fn read(&mut self, max_frames: usize, out: &mut Vec<f32>) -> Result<usize> {
        out.clear();
        if self.closed {
            return Ok(0);
        }
        let total = self.info.frames.unwrap_or(0);
        let mut limit = total;
        if let Some(fail) = self.fail_after {
            if self.pos >= fail {
                return Err(anyhow!("simulated read failure at frame {}", self.pos));
            }
            limit = limit.min(fail);
        }
        let n = (max_frames as u64).min(limit.saturating_sub(self.pos));
        for frame in self.pos..self.pos + n {
            for _ in 0..self.info.channels {
                out.push(frame as f32);
            }
        }
        self.pos += n;
        Ok(n as usize)
    }

    fn seek(&mut self, frame: u64) -> Result<()> {
        self.pos = frame.min(self.info.frames.unwrap_or(0));
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
        self.closes.bump();
    }
}

/// Provider serving [`MemorySource`]s registered by uri.
#[derive(Default)]
pub struct MemoryProvider {
    tracks: Mutex<HashMap<String, (u32, u16, u64, bool)>>,
    opens: AtomicUsize,
    closes: CloseCounter,
}

impl MemoryProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, uri: &str, sample_rate: u32, channels: u16, frames: u64, seekable: bool) {
        self.tracks
            .lock()
            .unwrap()
            .insert(uri.to_string(), (sample_rate, channels, frames, seekable));
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Total closes across every source this provider opened.
    pub fn closes(&self) -> usize {
        self.closes.get()
    }
}

impl SourceProvider for MemoryProvider {
    fn open(&self, uri: &str) -> Result<Box<dyn Source>> {
        let (rate, channels, frames, seekable) = *self
            .tracks
            .lock()
            .unwrap()
            .get(uri)
            .ok_or_else(|| anyhow!("no such track: {uri}"))?;
        self.opens.fetch_add(1, Ordering::SeqCst);
        let mut source = MemorySource::new(rate, channels, frames);
        source.set_seekable(seekable);
        source.closes = self.closes.clone();
        Ok(Box::new(source))
    }
}

#[derive(Debug, Default)]
struct SimInner {
    buffered: usize,
    peak_buffered: usize,
    written_total: u64,
    since_base: u64,
    base_ms: u64,
    timestamps: Vec<u64>,
    first_samples: Vec<f32>,
    flushes: Vec<u64>,
    pauses: Vec<bool>,
}

/// Sink with a bounded buffer that only empties when told to.
pub struct SimSink {
    format: SinkFormat,
    capacity: usize,
    inner: Mutex<SimInner>,
    auto_consume: AtomicBool,
    closes: AtomicUsize,
}

impl SimSink {
    pub fn new(sample_rate: u32, channels: u16, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            format: SinkFormat {
                sample_rate,
                channels,
            },
            capacity,
            inner: Mutex::new(SimInner::default()),
            auto_consume: AtomicBool::new(false),
            closes: AtomicUsize::new(0),
        })
    }

    /// When set, everything written counts as played immediately.
    pub fn set_auto_consume(&self, on: bool) {
        self.auto_consume.store(on, Ordering::SeqCst);
    }

    /// Play `frames` buffered frames.
    pub fn consume(&self, frames: usize) {
        let mut g = self.inner.lock().unwrap();
        g.buffered = g.buffered.saturating_sub(frames);
    }

    fn settle(&self, g: &mut SimInner) {
        if self.auto_consume.load(Ordering::SeqCst) {
            g.buffered = 0;
        }
    }

    pub fn frames_written(&self) -> u64 {
        self.inner.lock().unwrap().written_total
    }

    pub fn peak_buffered(&self) -> usize {
        self.inner.lock().unwrap().peak_buffered
    }

    pub fn write_timestamps(&self) -> Vec<u64> {
        self.inner.lock().unwrap().timestamps.clone()
    }

    /// First sample of every write (the source frame index for [`MemorySource`]).
    pub fn first_samples(&self) -> Vec<f32> {
        self.inner.lock().unwrap().first_samples.clone()
    }

    pub fn flushes(&self) -> Vec<u64> {
        self.inner.lock().unwrap().flushes.clone()
    }

    pub fn pauses(&self) -> Vec<bool> {
        self.inner.lock().unwrap().pauses.clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl OutputSink for SimSink {
    fn write(&self, timestamp_ms: u64, samples: &[f32]) -> Result<()> {
        let frames = samples.len() / usize::from(self.format.channels).max(1);
        let mut g = self.inner.lock().unwrap();
        g.buffered += frames;
        g.peak_buffered = g.peak_buffered.max(g.buffered);
        g.written_total += frames as u64;
        g.since_base += frames as u64;
        g.timestamps.push(timestamp_ms);
        if let Some(first) = samples.first() {
            g.first_samples.push(*first);
        }
        Ok(())
    }

    fn written_time_ms(&self) -> u64 {
        let g = self.inner.lock().unwrap();
        g.base_ms + self.format.frames_to_ms(g.since_base)
    }

    fn output_time_ms(&self) -> u64 {
        let mut g = self.inner.lock().unwrap();
        self.settle(&mut g);
        let played = g.since_base.saturating_sub(g.buffered as u64);
        g.base_ms + self.format.frames_to_ms(played)
    }

    fn buffer_free_frames(&self) -> usize {
        let mut g = self.inner.lock().unwrap();
        self.settle(&mut g);
        self.capacity.saturating_sub(g.buffered)
    }

    fn capacity_frames(&self) -> usize {
        self.capacity
    }

    fn is_draining(&self) -> bool {
        let mut g = self.inner.lock().unwrap();
        self.settle(&mut g);
        g.buffered > 0
    }

    fn flush(&self, timestamp_ms: u64) {
        let mut g = self.inner.lock().unwrap();
        g.buffered = 0;
        g.since_base = 0;
        g.base_ms = timestamp_ms;
        g.flushes.push(timestamp_ms);
    }

    fn pause(&self, paused: bool) {
        self.inner.lock().unwrap().pauses.push(paused);
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Backend handing out one pre-built [`SimSink`], or failing.
pub struct SimBackend {
    sink: Arc<SimSink>,
    fail: bool,
    opened: Mutex<Vec<SinkFormat>>,
}

impl SimBackend {
    pub fn new(sink: Arc<SimSink>) -> Arc<Self> {
        Arc::new(Self {
            sink,
            fail: false,
            opened: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(sink: Arc<SimSink>) -> Arc<Self> {
        Arc::new(Self {
            sink,
            fail: true,
            opened: Mutex::new(Vec::new()),
        })
    }

    pub fn opened(&self) -> Vec<SinkFormat> {
        self.opened.lock().unwrap().clone()
    }
}

impl OutputBackend for SimBackend {
    fn open(&self, format: SinkFormat) -> Result<Arc<dyn OutputSink>> {
        if self.fail {
            return Err(anyhow!("simulated device failure"));
        }
        self.opened.lock().unwrap().push(format);
        let sink: Arc<dyn OutputSink> = self.sink.clone();
        Ok(sink)
    }
}
