//! WebSocket transport implementation.
//!
//! # Protocol
//!
//! - Endpoint: any `ws://` or `wss://` URL
//! - Messages: JSON text frames (see [`super::messages`])
//! - Audio: PCM 16-bit little-endian, base64 encoded
//! - Auth: optional `Authorization: Bearer <token>` header, forwarded as-is
//!
//! # Example
//!
//! ```rust,ignore
//! use waav_converse::core::transport::{Transport, WebSocketConfig, WebSocketTransport};
//!
//! let mut transport = WebSocketTransport::new(WebSocketConfig {
//!     url: "wss://voice.example.com/converse".to_string(),
//!     auth_token: Some("token".to_string().into()),
//!     ..Default::default()
//! });
//! let mut events = transport.open(&session).await?;
//! transport.send(OutboundMessage::TurnCommit)?;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;
use zeroize::Zeroizing;

use super::base::{
    EVENT_CHANNEL_CAPACITY, OutboundMessage, ReconnectionConfig, SequenceGuard,
    SessionDescriptor, Transport, TransportError, TransportEvent, TransportEventReceiver,
    TransportResult, TransportState,
};
use super::messages::{ClientMessage, parse_server_frame};

/// Channel capacity for WebSocket message sending.
const WS_CHANNEL_CAPACITY: usize = 256;

/// Default connection timeout.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Work items for the connection task.
#[derive(Debug)]
enum Outgoing {
    Message(ClientMessage),
    Close,
}

// =============================================================================
// Configuration
// =============================================================================

/// Endpoint configuration for [`WebSocketTransport`].
#[derive(Clone)]
pub struct WebSocketConfig {
    /// Endpoint URL (`ws://` or `wss://`)
    pub url: String,
    /// Bearer token forwarded to the endpoint, wiped on drop
    pub auth_token: Option<Zeroizing<String>>,
    /// Timeout for each connection attempt (milliseconds)
    pub connect_timeout_ms: u64,
    /// Reconnection policy for transient failures
    pub reconnection: ReconnectionConfig,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            auth_token: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            reconnection: ReconnectionConfig::default(),
        }
    }
}

impl std::fmt::Debug for WebSocketConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConfig")
            .field("url", &self.url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "***"))
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("reconnection", &self.reconnection)
            .finish()
    }
}

/// Build the upgrade request, validating the URL.
fn build_request(url: &str, auth_token: Option<&str>) -> TransportResult<http::Request<()>> {
    let parsed = Url::parse(url)
        .map_err(|e| TransportError::InvalidConfiguration(format!("Invalid URL '{url}': {e}")))?;

    match parsed.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(TransportError::InvalidConfiguration(format!(
                "Unsupported URL scheme '{other}', expected ws or wss"
            )));
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| TransportError::InvalidConfiguration(format!("URL '{url}' has no host")))?;
    let host = match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let mut builder = http::Request::builder()
        .uri(url)
        .header(
            "Sec-WebSocket-Key",
            tungstenite::handshake::client::generate_key(),
        )
        .header("Sec-WebSocket-Version", "13")
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Host", host);

    if let Some(token) = auth_token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }

    builder
        .body(())
        .map_err(|e| TransportError::InvalidConfiguration(e.to_string()))
}

/// Connect once, honoring the configured timeout.
async fn connect(config: &WebSocketConfig) -> TransportResult<WsStream> {
    let request = build_request(&config.url, config.auth_token.as_ref().map(|t| t.as_str()))?;
    let timeout = Duration::from_millis(config.connect_timeout_ms);

    match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request)).await {
        Ok(Ok((ws_stream, _response))) => Ok(ws_stream),
        Ok(Err(e)) => Err(TransportError::ConnectionFailed(e.to_string())),
        Err(_) => Err(TransportError::ConnectionFailed(format!(
            "Timed out after {}ms",
            config.connect_timeout_ms
        ))),
    }
}

// =============================================================================
// WebSocket Transport
// =============================================================================

/// Transport over a single WebSocket connection.
///
/// A spawned connection task owns the socket. Outbound messages are queued on
/// a bounded channel; inbound frames and lifecycle changes are delivered on
/// the event channel returned by [`Transport::open`].
///
/// # Automatic Reconnection
///
/// When the connection drops unexpectedly the transport reports `Degraded`,
/// retries with exponential backoff, re-sends `session.start` on success and
/// reports `Reconnected`. Once the retry budget is spent it reports a fatal
/// `Closed` event.
pub struct WebSocketTransport {
    config: WebSocketConfig,
    /// Connection state (shared with connection task)
    state: Arc<RwLock<TransportState>>,
    /// Outbound channel into the connection task
    ws_sender: Option<mpsc::Sender<Outgoing>>,
    /// Connection task handle
    connection_handle: Option<JoinHandle<()>>,
    /// Suppresses reconnection once a local close was requested
    intentional_disconnect: Arc<AtomicBool>,
    sequence: SequenceGuard,
}

impl WebSocketTransport {
    pub fn new(config: WebSocketConfig) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(TransportState::Closed)),
            ws_sender: None,
            connection_handle: None,
            intentional_disconnect: Arc::new(AtomicBool::new(false)),
            sequence: SequenceGuard::default(),
        }
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }

    /// Drive one connection until it is closed for good.
    async fn run_connection(
        ws_stream: WsStream,
        mut rx: mpsc::Receiver<Outgoing>,
        event_tx: mpsc::Sender<TransportEvent>,
        state: Arc<RwLock<TransportState>>,
        intentional_disconnect: Arc<AtomicBool>,
        config: WebSocketConfig,
        session_start: ClientMessage,
    ) {
        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        'outer: loop {
            // Main message processing loop
            loop {
                tokio::select! {
                    outgoing = rx.recv() => match outgoing {
                        Some(Outgoing::Message(message)) => {
                            let json = match serde_json::to_string(&message) {
                                Ok(j) => j,
                                Err(e) => {
                                    tracing::error!("Failed to serialize message: {}", e);
                                    continue;
                                }
                            };

                            if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                                tracing::error!("Failed to send WebSocket message: {}", e);
                                break;
                            }

                            if matches!(message, ClientMessage::AudioChunk { .. }) {
                                let mut current = state.write();
                                if *current == TransportState::Ready {
                                    *current = TransportState::Streaming;
                                }
                            }
                        }
                        Some(Outgoing::Close) | None => {
                            intentional_disconnect.store(true, Ordering::SeqCst);
                            if let Err(e) = ws_sink.send(Message::Close(None)).await {
                                tracing::debug!("Failed to send close frame: {}", e);
                            }
                            break;
                        }
                    },

                    incoming = ws_stream.next() => match incoming {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(event) = parse_server_frame(&text)
                                && event_tx.send(TransportEvent::Inbound(event)).await.is_err()
                            {
                                tracing::debug!("Transport event receiver dropped");
                                intentional_disconnect.store(true, Ordering::SeqCst);
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!("WebSocket closed by server");
                            break;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                tracing::error!("Failed to send pong: {}", e);
                            }
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::error!("WebSocket error: {}", e);
                            break;
                        }
                        None => break,
                    },
                }
            }

            if intentional_disconnect.load(Ordering::SeqCst) {
                tracing::info!("Intentional disconnect, not attempting reconnection");
                break 'outer;
            }

            // Every outage is reported and gets its own retry budget
            let mut reconnect_attempt: u32 = 0;
            if config.reconnection.should_retry(reconnect_attempt) {
                *state.write() = TransportState::Degraded;
                let _ = event_tx
                    .send(TransportEvent::StateChanged(TransportState::Degraded))
                    .await;
            }

            // Reconnect with backoff until it works or the budget is spent
            loop {
                if !config.reconnection.should_retry(reconnect_attempt) {
                    tracing::warn!(
                        "Reconnection disabled or max attempts ({}) reached",
                        config.reconnection.max_attempts
                    );
                    *state.write() = TransportState::Closed;
                    let _ = event_tx
                        .send(TransportEvent::Closed {
                            reason: TransportError::RetriesExhausted(reconnect_attempt).to_string(),
                            fatal: true,
                        })
                        .await;
                    break 'outer;
                }

                reconnect_attempt += 1;
                let delay_ms = config.reconnection.calculate_delay(reconnect_attempt);
                tracing::info!(
                    "Attempting reconnection {}/{} in {}ms",
                    reconnect_attempt,
                    if config.reconnection.max_attempts == 0 {
                        "∞".to_string()
                    } else {
                        config.reconnection.max_attempts.to_string()
                    },
                    delay_ms
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;

                if intentional_disconnect.load(Ordering::SeqCst) {
                    tracing::info!("Disconnect requested during reconnection delay");
                    break 'outer;
                }

                match connect(&config).await {
                    Ok(new_ws_stream) => {
                        tracing::info!("Reconnected to {}", config.url);
                        let (new_sink, new_stream) = new_ws_stream.split();
                        ws_sink = new_sink;
                        ws_stream = new_stream;

                        // The endpoint needs the session announced again
                        match serde_json::to_string(&session_start) {
                            Ok(json) => {
                                if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                                    tracing::error!(
                                        "Failed to restore session after reconnection: {}",
                                        e
                                    );
                                    continue;
                                }
                            }
                            Err(e) => tracing::error!("Failed to serialize session start: {}", e),
                        }

                        *state.write() = TransportState::Streaming;
                        let _ = event_tx
                            .send(TransportEvent::Reconnected {
                                attempt: reconnect_attempt,
                            })
                            .await;
                        continue 'outer;
                    }
                    Err(e) => {
                        tracing::error!("Reconnection attempt {} failed: {}", reconnect_attempt, e);
                    }
                }
            }
        }

        *state.write() = TransportState::Closed;
        tracing::info!("WebSocket connection task ended");
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&mut self, session: &SessionDescriptor) -> TransportResult<TransportEventReceiver> {
        if self.ws_sender.is_some() {
            return Err(TransportError::ConnectionFailed(
                "Transport is already open".to_string(),
            ));
        }

        self.intentional_disconnect.store(false, Ordering::SeqCst);
        self.sequence.reset();
        *self.state.write() = TransportState::Connecting;

        let ws_stream = match connect(&self.config).await {
            Ok(ws_stream) => ws_stream,
            Err(e) => {
                *self.state.write() = TransportState::Closed;
                return Err(e);
            }
        };
        tracing::info!(session_id = %session.session_id, "Connected to {}", self.config.url);

        let (tx, rx) = mpsc::channel::<Outgoing>(WS_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(EVENT_CHANNEL_CAPACITY);

        let session_start = ClientMessage::from(&OutboundMessage::SessionStart(session.clone()));

        // First thing on the wire
        tx.try_send(Outgoing::Message(session_start.clone()))
            .map_err(|_| TransportError::Backpressure)?;

        *self.state.write() = TransportState::Ready;
        event_tx
            .try_send(TransportEvent::StateChanged(TransportState::Ready))
            .map_err(|_| TransportError::Backpressure)?;

        let handle = tokio::spawn(Self::run_connection(
            ws_stream,
            rx,
            event_tx,
            self.state.clone(),
            self.intentional_disconnect.clone(),
            self.config.clone(),
            session_start,
        ));

        self.ws_sender = Some(tx);
        self.connection_handle = Some(handle);
        Ok(event_rx)
    }

    fn send(&mut self, message: OutboundMessage) -> TransportResult<()> {
        let sender = self.ws_sender.as_ref().ok_or(TransportError::NotConnected)?;
        if !self.state.read().accepts_messages() {
            return Err(TransportError::NotConnected);
        }

        match &message {
            OutboundMessage::AudioChunk(chunk) => self.sequence.check(chunk.seq)?,
            OutboundMessage::SessionStart(_) => self.sequence.reset(),
            _ => {}
        }

        sender
            .try_send(Outgoing::Message(ClientMessage::from(&message)))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => TransportError::Backpressure,
                mpsc::error::TrySendError::Closed(_) => TransportError::NotConnected,
            })
    }

    fn close(&mut self) {
        let Some(sender) = self.ws_sender.take() else {
            return;
        };

        self.intentional_disconnect.store(true, Ordering::SeqCst);
        *self.state.write() = TransportState::Closing;

        // Best-effort: the stop message is not retried
        if let Err(e) = sender.try_send(Outgoing::Message(ClientMessage::SessionStop)) {
            tracing::warn!("Failed to queue session.stop: {}", e);
        }
        if sender.try_send(Outgoing::Close).is_err() {
            // Dropping the sender ends the task loop as well
            tracing::debug!("Close request not queued, relying on channel shutdown");
        }

        // The task is left to flush the stop message and exit on its own
        self.connection_handle = None;
        tracing::info!("WebSocket transport closing");
    }

    fn state(&self) -> TransportState {
        *self.state.read()
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.close();
    }
}
