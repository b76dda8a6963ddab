use std::time::Duration;

/// Engine tuning parameters shared by the producer and the device sink.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Maximum frames read from the source per producer iteration.
    pub block_frames: usize,
    /// Upper bound on every producer wait; also the worst-case stop latency.
    pub wait_timeout: Duration,
    /// Device sink buffer size in seconds of audio.
    pub buffer_seconds: f32,
    /// Max frames pulled per output callback refill.
    pub refill_max_frames: usize,
    /// Output device substring match; `None` selects the host default.
    pub device: Option<String>,
}

impl Default for EngineConfig {
    /// Defaults tuned for low-risk playback across common devices.
    fn default() -> Self {
        Self {
            block_frames: 1024,
            wait_timeout: Duration::from_millis(50),
            buffer_seconds: 2.0,
            refill_max_frames: 4096,
            device: None,
        }
    }
}
