//! Shared playback session state.
//!
//! One mutex guards the flags, one condition variable wakes the producer. Every wait
//! is bounded and re-tests its predicate, so a stop is observed within one timeout
//! even if no notification arrives.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use sndplay_types::PlaybackEndReason;

/// A seek requested by the control side, acknowledged once applied.
#[derive(Debug)]
pub struct SeekRequest {
    pub ms: u64,
    ack: Sender<()>,
}

impl SeekRequest {
    /// Release the caller waiting in [`SessionState::request_seek`].
    pub fn acknowledge(self) {
        let _ = self.ack.send(());
    }
}

/// How a producer wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The awaited condition holds.
    Ready,
    /// Playback was stopped.
    Stopped,
    /// A seek is waiting to be applied.
    SeekPending,
}

#[derive(Debug)]
struct Flags {
    playing: bool,
    end_of_stream: bool,
    pending_seek: Option<SeekRequest>,
    end_reason: Option<PlaybackEndReason>,
}

/// Monitor shared by the transport and the producer thread of one session.
#[derive(Debug)]
pub struct SessionState {
    flags: Mutex<Flags>,
    cv: Condvar,
}

impl SessionState {
    /// State of a session that has just started playing.
    pub fn playing() -> Self {
        Self {
            flags: Mutex::new(Flags {
                playing: true,
                end_of_stream: false,
                pending_seek: None,
                end_reason: None,
            }),
            cv: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Flags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_playing(&self) -> bool {
        self.lock().playing
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.lock().end_of_stream
    }

    pub fn end_reason(&self) -> Option<PlaybackEndReason> {
        self.lock().end_reason
    }

    #[cfg(test)]
    pub(crate) fn has_pending_seek(&self) -> bool {
        self.lock().pending_seek.is_some()
    }

    /// Clear the playing flag and wake the producer.
    ///
    /// Returns `false` when the session had already stopped.
    pub fn request_stop(&self) -> bool {
        let mut g = self.lock();
        let was_playing = g.playing;
        if was_playing {
            g.playing = false;
            g.end_reason.get_or_insert(PlaybackEndReason::Stopped);
        }
        drop(g);
        self.cv.notify_all();
        was_playing
    }

    /// Post a seek for the producer and return the acknowledgement channel.
    ///
    /// A request still pending is replaced; its waiter is released unacknowledged.
    /// Returns `None` when the session is not playing.
    pub fn request_seek(&self, ms: u64) -> Option<Receiver<()>> {
        let (ack, rx) = crossbeam_channel::bounded(1);
        let mut g = self.lock();
        if !g.playing {
            return None;
        }
        let replaced = g.pending_seek.replace(SeekRequest { ms, ack });
        drop(g);
        if let Some(old) = replaced {
            tracing::debug!(old_ms = old.ms, new_ms = ms, "seek request replaced");
        }
        self.cv.notify_all();
        Some(rx)
    }

    /// Take the pending seek, if any.
    pub fn take_seek(&self) -> Option<SeekRequest> {
        self.lock().pending_seek.take()
    }

    /// Block until `ready` returns `true`, playback stops, or (when `wake_on_seek`)
    /// a seek is posted.
    ///
    /// `ready` is evaluated under the session lock, once per wakeup or timeout.
    pub fn wait_until<F>(&self, timeout: Duration, wake_on_seek: bool, mut ready: F) -> WaitOutcome
    where
        F: FnMut() -> bool,
    {
        let mut g = self.lock();
        loop {
            if !g.playing {
                return WaitOutcome::Stopped;
            }
            if wake_on_seek && g.pending_seek.is_some() {
                return WaitOutcome::SeekPending;
            }
            if ready() {
                return WaitOutcome::Ready;
            }
            let (next, _timed_out) = self
                .cv
                .wait_timeout(g, timeout)
                .unwrap_or_else(PoisonError::into_inner);
            g = next;
        }
    }

    /// Record that the stream ended on its own.
    pub fn mark_end_of_stream(&self, reason: PlaybackEndReason) {
        let mut g = self.lock();
        g.end_of_stream = true;
        g.playing = false;
        g.end_reason.get_or_insert(reason);
        drop(g);
        self.cv.notify_all();
    }

    /// Producer exit: no longer playing, and any pending seek is abandoned so its
    /// caller returns.
    pub fn finish(&self) {
        let mut g = self.lock();
        g.playing = false;
        let abandoned = g.pending_seek.take();
        drop(g);
        self.cv.notify_all();
        if let Some(req) = abandoned {
            tracing::debug!(ms = req.ms, "seek abandoned at shutdown");
        }
    }

    /// Clear the playing flag without waking anyone.
    #[cfg(test)]
    pub(crate) fn clear_playing_silently(&self) {
        self.lock().playing = false;
    }
}
