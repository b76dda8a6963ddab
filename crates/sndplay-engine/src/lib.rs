//! Decode/playback engine.
//!
//! A [`transport::Transport`] opens a [`source::Source`], configures an
//! [`sink::OutputSink`] for it and spawns one producer thread that reads fixed-size
//! blocks, paces them against the sink's free buffer space and reacts to
//! stop/seek requests made concurrently from the control side.

pub mod config;
pub mod cpal_sink;
pub mod device;
pub mod error;
pub mod output;
pub mod producer;
pub mod queue;
pub mod session;
pub mod sink;
pub mod source;
pub mod symphonia_source;
pub mod transport;
pub mod uri;

#[cfg(test)]
pub(crate) mod testing;
