//! Producer thread: the decode/deliver loop of a playback session.
//!
//! Each iteration reads one block from the source, waits (bounded, stop-aware) for
//! the sink to have room, and writes the block stamped with the sink's written time.
//! An exhausted source moves to draining; once the sink has played everything the
//! session is marked end-of-stream. Source and sink are closed exactly once, by this
//! thread, on every exit path.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sndplay_types::PlaybackEndReason;

use crate::session::{SessionState, WaitOutcome};
use crate::sink::OutputSink;
use crate::source::{Source, SourceInfo};

/// Why the loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Stopped,
    EndOfStream(PlaybackEndReason),
}

pub struct Producer {
    source: Box<dyn Source>,
    sink: Arc<dyn OutputSink>,
    state: Arc<SessionState>,
    info: SourceInfo,
    block_frames: usize,
    wait_timeout: Duration,
    released: bool,
}

impl Producer {
    pub fn new(
        source: Box<dyn Source>,
        sink: Arc<dyn OutputSink>,
        state: Arc<SessionState>,
        block_frames: usize,
        wait_timeout: Duration,
    ) -> Self {
        let info = source.info();
        Self {
            source,
            sink,
            state,
            info,
            block_frames: block_frames.max(1),
            wait_timeout,
            released: false,
        }
    }

    /// Run on a dedicated, named thread.
    ///
    /// If the thread cannot be started the producer is dropped, which still closes
    /// the source and sink.
    pub fn spawn(self) -> std::io::Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name("sndplay-producer".to_string())
            .spawn(move || self.run())
    }

    /// Run the loop to completion, then release the source and sink.
    pub fn run(mut self) {
        let exit = self.play_loop();

        self.release();
        if let Exit::EndOfStream(reason) = exit {
            self.state.mark_end_of_stream(reason);
        }
        self.state.finish();

        tracing::info!(?exit, "playback thread finished");
    }

    /// Close the source, then the sink. Only the first call has any effect.
    fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        self.source.close();
        self.sink.close();
    }

    fn play_loop(&mut self) -> Exit {
        let mut buf = Vec::with_capacity(self.block_frames * usize::from(self.info.channels));

        loop {
            if !self.state.is_playing() {
                return Exit::Stopped;
            }

            let (frames, read_failed) = match self.source.read(self.block_frames, &mut buf) {
                Ok(n) => (n, false),
                Err(e) => {
                    tracing::error!("source read failed: {e:#}");
                    (0, true)
                }
            };

            let outcome = if frames > 0 {
                self.deliver(&buf, frames)
            } else {
                match self.drain() {
                    WaitOutcome::Ready => {
                        let reason = if read_failed {
                            PlaybackEndReason::Error
                        } else {
                            PlaybackEndReason::Eof
                        };
                        tracing::debug!(?reason, "output drained");
                        return Exit::EndOfStream(reason);
                    }
                    other => other,
                }
            };

            if outcome == WaitOutcome::Stopped {
                return Exit::Stopped;
            }
            self.apply_pending_seek();
        }
    }

    /// Write `frames` frames from `buf`, pacing against the sink's free space.
    ///
    /// Blocks larger than the sink buffer are written in capacity-sized pieces.
    /// A seek posted while waiting abandons the rest of the block.
    fn deliver(&self, buf: &[f32], frames: usize) -> WaitOutcome {
        let channels = usize::from(self.info.channels).max(1);
        let capacity = self.sink.capacity_frames().max(1);
        let sink = &self.sink;

        let mut offset = 0;
        while offset < frames {
            let chunk = (frames - offset).min(capacity);
            let outcome = self
                .state
                .wait_until(self.wait_timeout, true, || sink.buffer_free_frames() >= chunk);
            if outcome != WaitOutcome::Ready {
                return outcome;
            }

            let timestamp_ms = sink.written_time_ms();
            let samples = &buf[offset * channels..(offset + chunk) * channels];
            if let Err(e) = sink.write(timestamp_ms, samples) {
                tracing::warn!(timestamp_ms, "output write failed: {e:#}");
            }
            offset += chunk;
        }
        WaitOutcome::Ready
    }

    /// Wait for the sink to finish playing what was written.
    fn drain(&self) -> WaitOutcome {
        let sink = &self.sink;
        self.state
            .wait_until(self.wait_timeout, true, || !sink.is_draining())
    }

    fn apply_pending_seek(&mut self) {
        let Some(req) = self.state.take_seek() else {
            return;
        };

        let mut frame = self.info.frame_at_ms(req.ms);
        if let Some(total) = self.info.frames {
            frame = frame.min(total);
        }

        match self.source.seek(frame) {
            Ok(()) => {
                self.sink.flush(req.ms);
                tracing::debug!(ms = req.ms, frame, "seek applied");
            }
            Err(e) => tracing::warn!(ms = req.ms, frame, "seek failed: {e:#}"),
        }
        req.acknowledge();
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        self.release();
    }
}
