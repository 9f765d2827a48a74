//! Response playback
//!
//! Streamed assistant audio is decoded into a strictly ordered queue and fed
//! to an [`AudioSink`] a little ahead of the play head. Playback can be cut
//! off at any point with [`ResponsePlayer::stop`].

#[cfg(feature = "audio-io")]
mod cpal_sink;
mod player;
mod sink;

use thiserror::Error;

#[cfg(feature = "audio-io")]
pub use cpal_sink::CpalAudioSink;
pub use player::{
    DEFAULT_LEAD_MS, DrainedHandler, PlayerStats, ResponsePlayer, ResponseStream, decode_pcm16,
};
pub use sink::{AudioSink, MemorySink};

/// Playback failures. None of them end the session on their own.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("Failed to decode response audio: {0}")]
    Decode(String),

    #[error("Audio output error: {0}")]
    Device(String),
}
