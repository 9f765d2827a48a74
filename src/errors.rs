//! Top-level error type.
//!
//! Each component owns a `thiserror` enum; [`ConverseError`] wraps them so
//! callers can use `?` across component boundaries.

use thiserror::Error;

use crate::core::audio::{AudioSourceError, EncodeError};
use crate::core::player::PlaybackError;
use crate::core::transport::TransportError;

/// Errors surfaced by the conversation engine.
#[derive(Debug, Error)]
pub enum ConverseError {
    /// Microphone acquisition failed
    #[error(transparent)]
    AudioSource(#[from] AudioSourceError),

    /// A frame could not be encoded
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// Transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Response audio could not be played
    #[error(transparent)]
    Playback(#[from] PlaybackError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Operation not allowed in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The controller task has exited
    #[error("Conversation controller is no longer running")]
    ControllerGone,
}

impl ConverseError {
    /// Whether this error ends the session.
    pub fn is_fatal(&self) -> bool {
        match self {
            ConverseError::AudioSource(_) => true,
            ConverseError::Transport(e) => !e.is_transient(),
            ConverseError::Encode(_) | ConverseError::Playback(_) => false,
            ConverseError::InvalidConfiguration(_)
            | ConverseError::InvalidState(_)
            | ConverseError::ControllerGone => true,
        }
    }
}

/// Result type for engine operations.
pub type ConverseResult<T> = Result<T, ConverseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wraps_component_errors() {
        let err: ConverseError = AudioSourceError::DeviceUnavailable("no mic".to_string()).into();
        assert_eq!(err.to_string(), "Audio device unavailable: no mic");
        assert!(err.is_fatal());

        let err: ConverseError = TransportError::Backpressure.into();
        assert!(!err.is_fatal());

        let err: ConverseError = PlaybackError::Decode("odd length".to_string()).into();
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_config_error_display() {
        let err = ConverseError::InvalidConfiguration("bad threshold".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: bad threshold");
    }
}
