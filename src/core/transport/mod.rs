//! Duplex transport to the remote turn-processing endpoint.
//!
//! # Architecture
//!
//! - [`Transport`] trait for the channel abstraction
//! - [`WebSocketTransport`] for the JSON-over-WebSocket protocol
//! - [`MockTransport`] for tests and offline runs
//!
//! Outbound traffic is queued without blocking; inbound traffic and lifecycle
//! changes arrive on one [`TransportEvent`] channel.
//!
//! # Lifecycle
//!
//! `connecting → ready → streaming → closing → closed`, plus `degraded` while
//! an automatic reconnect is in progress.

mod base;
pub mod messages;
mod mock;
mod websocket;

pub use base::{
    BoxedTransport, EVENT_CHANNEL_CAPACITY, InboundEvent, OutboundMessage, ReconnectionConfig,
    SequenceGuard, SessionDescriptor, TranscriptRole, Transport, TransportError, TransportEvent,
    TransportEventReceiver, TransportResult, TransportState,
};
pub use messages::{ClientMessage, ServerMessage};
pub use mock::{MockTransport, MockTransportHandle};
pub use websocket::{DEFAULT_CONNECT_TIMEOUT_MS, WebSocketConfig, WebSocketTransport};
