//! Transport control API.
//!
//! Called from the control side (CLI, UI, plugin host). Owns at most one active
//! session: the shared [`SessionState`], the session's sink handle (for pause) and
//! the producer thread's join handle.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use sndplay_types::{SessionStatus, SongInfo};

use crate::config::EngineConfig;
use crate::error::{Result, TransportError};
use crate::producer::Producer;
use crate::session::SessionState;
use crate::sink::{OutputBackend, OutputSink, SinkFormat};
use crate::source::{SourceInfo, SourceProvider};
use crate::uri::{title_for, uri_to_path};

/// Receives song details when a session starts.
pub type SongInfoCallback = Box<dyn Fn(&SongInfo) + Send + Sync>;

struct ActiveSession {
    state: Arc<SessionState>,
    sink: Arc<dyn OutputSink>,
    info: SourceInfo,
    song: SongInfo,
    join: JoinHandle<()>,
}

impl ActiveSession {
    /// Stop the producer and wait for it to release the source and sink.
    fn shutdown(self) {
        self.state.request_stop();
        if self.join.join().is_err() {
            tracing::error!(title = %self.song.title, "playback thread panicked");
        }
    }
}

/// Start/stop/pause/seek control for one playback slot.
pub struct Transport {
    sources: Arc<dyn SourceProvider>,
    outputs: Arc<dyn OutputBackend>,
    config: EngineConfig,
    on_song_info: Option<SongInfoCallback>,
    active: Mutex<Option<ActiveSession>>,
}

impl Transport {
    pub fn new(
        sources: Arc<dyn SourceProvider>,
        outputs: Arc<dyn OutputBackend>,
        config: EngineConfig,
    ) -> Self {
        Self {
            sources,
            outputs,
            config,
            on_song_info: None,
            active: Mutex::new(None),
        }
    }

    /// Install the callback invoked with song details on every successful start.
    pub fn with_song_info_callback(mut self, callback: SongInfoCallback) -> Self {
        self.on_song_info = Some(callback);
        self
    }

    fn active(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open `uri`, configure the output for it and start the producer thread.
    ///
    /// Fails with [`TransportError::AlreadyActive`] while a session is still playing.
    /// A session that already ended on its own is reaped first. On any failure
    /// nothing stays open. The transport lock is not held while the source and sink
    /// open or while the song info callback runs, so the callback may call back
    /// into the transport.
    pub fn start(&self, uri: &str) -> Result<SongInfo> {
        let finished = {
            let mut active = self.active();
            if active.as_ref().is_some_and(|s| s.state.is_playing()) {
                return Err(TransportError::AlreadyActive);
            }
            active.take()
        };
        if let Some(finished) = finished {
            finished.shutdown();
        }

        let path = uri_to_path(uri).ok_or_else(|| TransportError::InvalidUri(uri.to_string()))?;
        let mut source = self
            .sources
            .open(uri)
            .map_err(|reason| TransportError::SourceOpen {
                uri: uri.to_string(),
                reason,
            })?;
        let info = source.info();

        let format = SinkFormat {
            sample_rate: info.sample_rate,
            channels: info.channels,
        };
        let sink = match self.outputs.open(format) {
            Ok(sink) => sink,
            Err(reason) => {
                source.close();
                return Err(TransportError::SinkOpen {
                    uri: uri.to_string(),
                    reason,
                });
            }
        };

        let song = song_info(&title_for(&path), &info);
        if let Some(callback) = &self.on_song_info {
            callback(&song);
        }

        let state = Arc::new(SessionState::playing());
        let producer = Producer::new(
            source,
            sink.clone(),
            state.clone(),
            self.config.block_frames,
            self.config.wait_timeout,
        );

        let mut active = self.active();
        // Another start may have won the slot while the lock was released.
        if active.as_ref().is_some_and(|s| s.state.is_playing()) {
            return Err(TransportError::AlreadyActive);
        }
        // Dropping the producer on either early return closes the source and sink.
        let join = producer.spawn().map_err(TransportError::Spawn)?;

        tracing::info!(
            uri = %uri,
            sample_rate = info.sample_rate,
            channels = info.channels,
            length_ms = song.length_ms,
            "playback started"
        );

        let stale = active.replace(ActiveSession {
            state,
            sink,
            info,
            song: song.clone(),
            join,
        });
        drop(active);
        if let Some(stale) = stale {
            stale.shutdown();
        }
        Ok(song)
    }

    /// Stop playback and wait until the producer has closed the source and sink.
    ///
    /// No-op when nothing was started.
    pub fn stop(&self) {
        let Some(session) = self.active().take() else {
            return;
        };
        let title = session.song.title.clone();
        session.shutdown();
        tracing::info!(title = %title, "playback stopped");
    }

    /// Pause or resume audible output. Delegates to the sink.
    pub fn pause(&self, paused: bool) {
        if let Some(session) = self.active().as_ref() {
            session.sink.pause(paused);
        }
    }

    /// Seek to `ms` and block until the producer has applied it.
    ///
    /// Returns `false` without effect when nothing is playing or the source is not
    /// seekable, and also when the session ends before the seek is applied.
    pub fn seek(&self, ms: u64) -> bool {
        let ack = {
            let active = self.active();
            let Some(session) = active.as_ref() else {
                return false;
            };
            if !session.info.seekable {
                tracing::debug!(ms, "seek ignored: source not seekable");
                return false;
            }
            match session.state.request_seek(ms) {
                Some(ack) => ack,
                None => return false,
            }
        };
        // The transport lock is released here so stop() can proceed concurrently.
        ack.recv().is_ok()
    }

    /// Seek by whole seconds.
    pub fn seek_seconds(&self, secs: u64) -> bool {
        self.seek(secs.saturating_mul(1000))
    }

    /// Title and length of `uri`, read through a throwaway source.
    ///
    /// Does not touch the active session.
    pub fn query_song_info(&self, uri: &str) -> Result<SongInfo> {
        let path = uri_to_path(uri).ok_or_else(|| TransportError::InvalidUri(uri.to_string()))?;
        let mut source = self
            .sources
            .open(uri)
            .map_err(|reason| TransportError::SourceOpen {
                uri: uri.to_string(),
                reason,
            })?;
        let info = source.info();
        source.close();
        Ok(song_info(&title_for(&path), &info))
    }

    /// Whether `uri` can be opened by the source provider.
    pub fn probe(&self, uri: &str) -> bool {
        if uri_to_path(uri).is_none() {
            return false;
        }
        match self.sources.open(uri) {
            Ok(mut source) => {
                source.close();
                true
            }
            Err(e) => {
                tracing::debug!(uri = %uri, "probe failed: {e:#}");
                false
            }
        }
    }

    /// `true` while a session is producing audio.
    pub fn is_playing(&self) -> bool {
        self.active()
            .as_ref()
            .map(|s| s.state.is_playing())
            .unwrap_or(false)
    }

    /// Snapshot of the current (or last finished) session.
    pub fn status(&self) -> SessionStatus {
        let active = self.active();
        let Some(session) = active.as_ref() else {
            return SessionStatus::default();
        };
        SessionStatus {
            title: Some(session.song.title.clone()),
            playing: session.state.is_playing(),
            end_of_stream: session.state.is_end_of_stream(),
            position_ms: Some(session.sink.output_time_ms()),
            duration_ms: Some(session.song.length_ms),
            end_reason: session.state.end_reason(),
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.stop();
    }
}

fn song_info(title: &str, info: &SourceInfo) -> SongInfo {
    SongInfo {
        title: title.to_string(),
        length_ms: info.length_ms(),
        bit_rate: info.bit_rate(),
        sample_rate: info.sample_rate,
        channels: info.channels,
    }
}
