//! In-memory transport for tests and offline runs.
//!
//! Records every outbound message and lets the owner inject inbound events
//! through a cloneable [`MockTransportHandle`].

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::base::{
    EVENT_CHANNEL_CAPACITY, InboundEvent, OutboundMessage, SequenceGuard, SessionDescriptor,
    Transport, TransportError, TransportEvent, TransportEventReceiver, TransportResult,
    TransportState,
};

#[derive(Debug, Default)]
struct MockState {
    state: TransportState,
    sent: Vec<OutboundMessage>,
    event_tx: Option<mpsc::Sender<TransportEvent>>,
    fail_open: bool,
    fail_send: bool,
    close_count: u32,
}

/// Transport that never touches the network.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockState>>,
    sequence: SequenceGuard,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `open` with `ConnectionFailed`.
    pub fn with_open_failure(self) -> Self {
        self.inner.lock().fail_open = true;
        self
    }

    /// Fail every `send` with a transient WebSocket error.
    pub fn with_send_failure(self) -> Self {
        self.inner.lock().fail_send = true;
        self
    }

    /// Handle for inspecting and driving this transport from the outside.
    pub fn handle(&self) -> MockTransportHandle {
        MockTransportHandle {
            inner: self.inner.clone(),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&mut self, session: &SessionDescriptor) -> TransportResult<TransportEventReceiver> {
        let mut inner = self.inner.lock();
        if inner.fail_open {
            inner.state = TransportState::Closed;
            return Err(TransportError::ConnectionFailed(
                "mock endpoint refused connection".to_string(),
            ));
        }

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let _ = event_tx.try_send(TransportEvent::StateChanged(TransportState::Ready));

        self.sequence.reset();
        inner.sent.push(OutboundMessage::SessionStart(session.clone()));
        inner.state = TransportState::Ready;
        inner.event_tx = Some(event_tx);
        Ok(event_rx)
    }

    fn send(&mut self, message: OutboundMessage) -> TransportResult<()> {
        let mut inner = self.inner.lock();
        if !inner.state.accepts_messages() {
            return Err(TransportError::NotConnected);
        }
        if inner.fail_send {
            return Err(TransportError::WebSocketError("mock send failure".to_string()));
        }

        if let OutboundMessage::AudioChunk(chunk) = &message {
            self.sequence.check(chunk.seq)?;
            if inner.state == TransportState::Ready {
                inner.state = TransportState::Streaming;
            }
        }
        inner.sent.push(message);
        Ok(())
    }

    fn close(&mut self) {
        let mut inner = self.inner.lock();
        if inner.event_tx.is_none() {
            return;
        }
        if inner.state.accepts_messages() {
            inner.sent.push(OutboundMessage::SessionStop);
        }
        inner.state = TransportState::Closed;
        inner.event_tx = None;
        inner.close_count += 1;
    }

    fn state(&self) -> TransportState {
        self.inner.lock().state
    }
}

/// Cloneable view of a [`MockTransport`].
#[derive(Debug, Clone)]
pub struct MockTransportHandle {
    inner: Arc<Mutex<MockState>>,
}

impl MockTransportHandle {
    /// Every message sent so far, in order.
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.inner.lock().sent.clone()
    }

    /// Wire names of every message sent so far.
    pub fn sent_kinds(&self) -> Vec<&'static str> {
        self.inner.lock().sent.iter().map(OutboundMessage::kind).collect()
    }

    /// Number of sent messages of the given wire name.
    pub fn count(&self, kind: &str) -> usize {
        self.inner
            .lock()
            .sent
            .iter()
            .filter(|m| m.kind() == kind)
            .count()
    }

    /// Sequence numbers of every audio chunk sent so far.
    pub fn chunk_seqs(&self) -> Vec<u64> {
        self.inner
            .lock()
            .sent
            .iter()
            .filter_map(|m| match m {
                OutboundMessage::AudioChunk(chunk) => Some(chunk.seq),
                _ => None,
            })
            .collect()
    }

    /// Deliver an endpoint event. Returns false when nobody is listening.
    pub fn inject(&self, event: InboundEvent) -> bool {
        self.inject_event(TransportEvent::Inbound(event))
    }

    /// Deliver any transport event. Returns false when nobody is listening.
    pub fn inject_event(&self, event: TransportEvent) -> bool {
        let inner = self.inner.lock();
        match inner.event_tx.as_ref() {
            Some(tx) => tx.try_send(event).is_ok(),
            None => false,
        }
    }

    /// Force the lifecycle state, e.g. to simulate degradation.
    pub fn set_state(&self, state: TransportState) {
        self.inner.lock().state = state;
    }

    pub fn state(&self) -> TransportState {
        self.inner.lock().state
    }

    pub fn close_count(&self) -> u32 {
        self.inner.lock().close_count
    }
}
