use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use sndplay_engine::config::EngineConfig;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "sndplay", version = VERSION)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Use a specific output device by substring match
    #[arg(long, global = true)]
    pub device: Option<String>,

    /// Frames decoded per producer iteration
    #[arg(long, default_value_t = 1024)]
    pub block_frames: usize,

    /// Upper bound (ms) on each producer wait; also bounds stop latency
    #[arg(long, default_value_t = 50)]
    pub wait_timeout_ms: u64,

    /// Output buffer size in seconds
    #[arg(long, default_value_t = 2.0)]
    pub buffer_seconds: f32,

    /// Playback callback refill cap (frames). Larger reduces lock churn but can add latency.
    #[arg(long, default_value_t = 4096)]
    pub refill_max_frames: usize,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play a file; reads `p`, `s <ms>` and `q` commands from stdin
    Play {
        /// Path or file:// uri of the audio file
        path: String,

        /// Start position in milliseconds
        #[arg(long)]
        seek_ms: Option<u64>,
    },

    /// Print title and length of a file
    Info {
        path: String,
    },

    /// List output devices and exit
    ListDevices,
}

impl Args {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            block_frames: self.block_frames,
            wait_timeout: Duration::from_millis(self.wait_timeout_ms.max(1)),
            buffer_seconds: self.buffer_seconds,
            refill_max_frames: self.refill_max_frames,
            device: self.device.clone(),
        }
    }
}

/// Turn a command-line path into a uri the engine accepts.
pub fn to_uri(path: &str) -> String {
    if path.contains("://") {
        return path.to_string();
    }
    let path = PathBuf::from(path);
    std::fs::canonicalize(&path)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_maps_flags() {
        let args = Args::parse_from([
            "sndplay",
            "--device",
            "usb",
            "--block-frames",
            "512",
            "--wait-timeout-ms",
            "20",
            "play",
            "a.wav",
        ]);
        let cfg = args.engine_config();
        assert_eq!(cfg.block_frames, 512);
        assert_eq!(cfg.wait_timeout, Duration::from_millis(20));
        assert_eq!(cfg.device.as_deref(), Some("usb"));
    }

    #[test]
    fn uris_pass_through() {
        assert_eq!(to_uri("file:///a.wav"), "file:///a.wav");
    }
}
