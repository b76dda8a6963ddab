//! Errors reported by the transport control API.

use thiserror::Error;

/// Failure of a transport control call.
///
/// Every variant leaves the transport without a partially started session.
#[derive(Error, Debug)]
pub enum TransportError {
    /// A session is still producing audio; stop it first.
    #[error("playback already active")]
    AlreadyActive,

    /// The uri does not name a local file.
    #[error("unsupported uri: {0}")]
    InvalidUri(String),

    /// The source could not be opened or probed.
    #[error("failed to open source {uri}: {reason:#}")]
    SourceOpen { uri: String, reason: anyhow::Error },

    /// The output sink could not be configured for the source format.
    #[error("failed to open output for {uri}: {reason:#}")]
    SinkOpen { uri: String, reason: anyhow::Error },

    /// The producer thread could not be spawned.
    #[error("failed to spawn playback thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Convenience result alias for transport calls.
pub type Result<T> = std::result::Result<T, TransportError>;
