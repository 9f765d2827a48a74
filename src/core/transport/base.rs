//! Base traits and types for the duplex channel to the turn-processing
//! endpoint.
//!
//! A [`Transport`] carries encoded audio and control messages out, and delivers
//! everything the endpoint says (plus its own lifecycle changes) through a
//! single [`TransportEvent`] channel.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::core::audio::{AudioChunk, AudioFormat};

/// Capacity of the transport event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur on the transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Initial connection to the endpoint failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid endpoint configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Outbound queue is full
    #[error("Outbound queue full")]
    Backpressure,

    /// Audio chunk sent out of sequence order
    #[error("Audio chunk {seq} sent out of order (last sent {last})")]
    OutOfOrder { seq: u64, last: u64 },

    /// Reconnection budget exhausted
    #[error("Connection lost after {0} reconnection attempts")]
    RetriesExhausted(u32),
}

impl TransportError {
    /// Whether the failure may clear up on its own (retry or drop the message).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::WebSocketError(_) | TransportError::Backpressure
        )
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

// =============================================================================
// Configuration Types
// =============================================================================

/// Retry policy applied when an open connection drops unexpectedly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectionConfig {
    /// Retry at all (default: true)
    pub enabled: bool,

    /// Attempts before the transport gives up; 0 retries forever (default: 5)
    pub max_attempts: u32,

    /// Delay before the first retry, in ms (default: 500)
    pub initial_delay_ms: u64,

    /// Upper bound on any single delay, in ms (default: 8000)
    pub max_delay_ms: u64,

    /// Growth factor between consecutive delays (default: 2.0)
    pub backoff_multiplier: f32,

    /// Spread delays by up to 25% either way (default: true)
    pub jitter: bool,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            initial_delay_ms: 500,
            max_delay_ms: 8000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ReconnectionConfig {
    /// Never retry.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Backoff delay in ms before retry number `attempt` (1-based).
    pub fn calculate_delay(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay = (self.initial_delay_ms as f64 * (self.backoff_multiplier as f64).powi(exponent))
            .min(self.max_delay_ms as f64);

        if self.jitter {
            // Up to 25% either way
            let jitter = rand_jitter(delay * 0.25);
            (delay + jitter).max(0.0) as u64
        } else {
            delay as u64
        }
    }

    /// Whether retry number `attempt + 1` may still be made.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.enabled && (self.max_attempts == 0 || attempt < self.max_attempts)
    }
}

/// Pseudo-random jitter in `[-range, range]` from a simple LCG over the clock.
fn rand_jitter(range: f64) -> f64 {
    use std::time::SystemTime;
    let seed = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let random = ((seed.wrapping_mul(1103515245).wrapping_add(12345)) % (1 << 31)) as f64;
    let normalized = random / (1u64 << 31) as f64;
    (normalized - 0.5) * 2.0 * range
}

// =============================================================================
// Transport State
// =============================================================================

/// Lifecycle state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    /// Connection in progress
    Connecting,
    /// Connected, session announced
    Ready,
    /// Audio is flowing
    Streaming,
    /// Transient failure, reconnecting with backoff
    Degraded,
    /// Local teardown in progress
    Closing,
    /// Not connected
    #[default]
    Closed,
}

impl TransportState {
    /// Whether outbound messages are accepted in this state.
    pub fn accepts_messages(&self) -> bool {
        matches!(
            self,
            TransportState::Ready | TransportState::Streaming | TransportState::Degraded
        )
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportState::Connecting => write!(f, "connecting"),
            TransportState::Ready => write!(f, "ready"),
            TransportState::Streaming => write!(f, "streaming"),
            TransportState::Degraded => write!(f, "degraded"),
            TransportState::Closing => write!(f, "closing"),
            TransportState::Closed => write!(f, "closed"),
        }
    }
}

// =============================================================================
// Messages & Events
// =============================================================================

/// Role of the speaker in a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    /// User speech transcript
    User,
    /// Assistant speech transcript
    Assistant,
}

impl fmt::Display for TranscriptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptRole::User => write!(f, "user"),
            TranscriptRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// What the endpoint needs to know about a session up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescriptor {
    pub session_id: String,
    pub format: AudioFormat,
}

/// Messages sent to the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// Announce the session and its audio format
    SessionStart(SessionDescriptor),
    /// One encoded slice of user audio
    AudioChunk(AudioChunk),
    /// The user's turn is complete
    TurnCommit,
    /// Stop generating the current response
    ResponseCancel { response_id: Option<String> },
    /// The session is ending
    SessionStop,
}

impl OutboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::SessionStart(_) => "session.start",
            OutboundMessage::AudioChunk(_) => "audio.chunk",
            OutboundMessage::TurnCommit => "turn.commit",
            OutboundMessage::ResponseCancel { .. } => "response.cancel",
            OutboundMessage::SessionStop => "session.stop",
        }
    }
}

/// Events received from the endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    SessionReady,
    SpeechStarted,
    SpeechStopped,
    Transcript {
        role: TranscriptRole,
        text: String,
    },
    ResponseAudioChunk {
        data: Bytes,
        response_id: Option<String>,
    },
    ResponseDone {
        response_id: Option<String>,
    },
    Error {
        reason: String,
        fatal: bool,
    },
}

/// Everything a transport reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Event from the endpoint
    Inbound(InboundEvent),
    /// Lifecycle change
    StateChanged(TransportState),
    /// Connection restored after a transient failure
    Reconnected { attempt: u32 },
    /// The transport is gone and will not come back
    Closed { reason: String, fatal: bool },
}

/// Receiving half of a transport's event channel.
pub type TransportEventReceiver = mpsc::Receiver<TransportEvent>;

// =============================================================================
// Ordering Guard
// =============================================================================

/// Rejects audio chunks whose sequence number does not strictly increase.
#[derive(Debug, Default, Clone)]
pub struct SequenceGuard {
    last: Option<u64>,
}

impl SequenceGuard {
    pub fn check(&mut self, seq: u64) -> TransportResult<()> {
        if let Some(last) = self.last
            && seq <= last
        {
            return Err(TransportError::OutOfOrder { seq, last });
        }
        self.last = Some(seq);
        Ok(())
    }

    pub fn reset(&mut self) {
        self.last = None;
    }

    pub fn last(&self) -> Option<u64> {
        self.last
    }
}

// =============================================================================
// Base Trait
// =============================================================================

/// Duplex channel to the remote turn-processing endpoint.
///
/// `send` and `close` never block so they can be called from synchronous
/// event handlers; implementations queue outbound messages internally.
#[async_trait]
pub trait Transport: Send {
    /// Connect and announce the session. Returns the event channel.
    async fn open(&mut self, session: &SessionDescriptor) -> TransportResult<TransportEventReceiver>;

    /// Queue a message for delivery.
    fn send(&mut self, message: OutboundMessage) -> TransportResult<()>;

    /// Send `session.stop` best-effort and tear down. Idempotent.
    fn close(&mut self);

    /// Current lifecycle state.
    fn state(&self) -> TransportState;
}

/// Boxed trait object for transports.
pub type BoxedTransport = Box<dyn Transport>;
