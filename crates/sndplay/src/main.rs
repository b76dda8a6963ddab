//! sndplay: plays audio files through the decode/playback engine.
//!
//! ## Pipeline
//! 1. **Source**: Symphonia decodes the file into interleaved `f32` blocks on demand.
//! 2. **Producer**: one background thread paces blocks into the output buffer.
//! 3. **Output**: the CPAL callback drains the buffer without blocking.
//!
//! The main thread is the control side: it starts the session, forwards pause/seek
//! commands from stdin and stops the session on `q` or Ctrl-C.

mod cli;
mod control;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use tracing_subscriber::EnvFilter;

use control::ControlCommand;
use sndplay_engine::cpal_sink::CpalBackend;
use sndplay_engine::device;
use sndplay_engine::symphonia_source::SymphoniaProvider;
use sndplay_engine::transport::Transport;
use sndplay_types::SongInfo;

const PROGRESS_EVERY: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,sndplay=info,sndplay_engine=info")
        }))
        .init();

    match &args.cmd {
        cli::Command::ListDevices => {
            let host = cpal::default_host();
            for (i, d) in device::list_devices(&host)?.iter().enumerate() {
                println!("#{i}: {} ({}-{} Hz)", d.name, d.min_rate, d.max_rate);
            }
        }
        cli::Command::Info { path } => {
            let transport = build_transport(&args);
            let song = transport.query_song_info(&cli::to_uri(path))?;
            println!(
                "{}\t{}\t{} Hz\t{} ch",
                song.title,
                format_ms(song.length_ms),
                song.sample_rate,
                song.channels
            );
        }
        cli::Command::Play { path, seek_ms } => {
            let transport = build_transport(&args);
            play(&transport, &cli::to_uri(path), *seek_ms)?;
        }
    }
    Ok(())
}

fn build_transport(args: &cli::Args) -> Transport {
    let config = args.engine_config();
    let outputs = Arc::new(CpalBackend::new(&config));
    Transport::new(Arc::new(SymphoniaProvider), outputs, config).with_song_info_callback(Box::new(
        |song: &SongInfo| {
            tracing::info!(
                title = %song.title,
                length = %format_ms(song.length_ms),
                bit_rate = song.bit_rate,
                sample_rate = song.sample_rate,
                channels = song.channels,
                "now playing"
            );
        },
    ))
}

fn play(transport: &Transport, uri: &str, seek_ms: Option<u64>) -> Result<()> {
    transport.start(uri)?;
    if let Some(ms) = seek_ms {
        if !transport.seek(ms) {
            tracing::warn!(ms, "initial seek ignored");
        }
    }

    let (tx, rx) = crossbeam_channel::unbounded();
    control::spawn_stdin_reader(tx.clone());
    let tx_signal = tx;
    let _ = ctrlc::set_handler(move || {
        let _ = tx_signal.send(ControlCommand::Quit);
    });

    let mut paused = false;
    let mut last_report = Instant::now();
    loop {
        match rx.recv_timeout(Duration::from_millis(250)) {
            Ok(ControlCommand::TogglePause) => {
                paused = !paused;
                transport.pause(paused);
            }
            Ok(ControlCommand::Seek { ms }) => {
                if !transport.seek(ms) {
                    tracing::warn!(ms, "seek ignored");
                }
            }
            Ok(ControlCommand::Quit) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let status = transport.status();
        if !status.playing {
            tracing::info!(reason = ?status.end_reason, "playback finished");
            break;
        }
        if last_report.elapsed() >= PROGRESS_EVERY {
            last_report = Instant::now();
            tracing::info!(
                position = %format_ms(status.position_ms.unwrap_or(0)),
                duration = %format_ms(status.duration_ms.unwrap_or(0)),
                paused,
                "progress"
            );
        }
    }

    transport.stop();
    Ok(())
}

/// `m:ss` rendering of a millisecond duration.
fn format_ms(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_ms_rounds_down_to_seconds() {
        assert_eq!(format_ms(0), "0:00");
        assert_eq!(format_ms(61_999), "1:01");
        assert_eq!(format_ms(600_000), "10:00");
    }
}
