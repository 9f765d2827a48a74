//! WebSocket transport against a local endpoint.
//!
//! Each test binds a loopback listener, accepts a single connection with
//! `tokio_tungstenite::accept_async` and records every text frame the client
//! sends.

use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};

use waav_converse::core::audio::{AudioChunk, AudioFormat};
use waav_converse::core::transport::{
    InboundEvent, OutboundMessage, ReconnectionConfig, SessionDescriptor, TranscriptRole,
    Transport, TransportError, TransportEvent, TransportEventReceiver, TransportState,
    WebSocketConfig, WebSocketTransport,
};

const TIMEOUT: Duration = Duration::from_secs(5);

/// What the endpoint does once `session.start` has arrived.
enum Script {
    /// Reply with the given frames and keep reading until the client closes
    Reply(Vec<Value>),
    /// Hang up immediately
    HangUp,
}

/// Start a one-connection endpoint. Returns its URL and a stream of the JSON
/// frames it received.
async fn spawn_endpoint(script: Script) -> (String, mpsc::UnboundedReceiver<Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws_stream = accept_async(stream).await.unwrap();
        let (mut write, mut read) = ws_stream.split();
        let mut script = Some(script);

        while let Some(Ok(message)) = read.next().await {
            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            let value: Value = serde_json::from_str(&text).unwrap();
            let is_start = value["type"] == "session.start";
            let _ = tx.send(value);

            if is_start {
                match script.take() {
                    Some(Script::Reply(frames)) => {
                        for frame in frames {
                            write.send(Message::Text(frame.to_string().into())).await.unwrap();
                        }
                    }
                    Some(Script::HangUp) => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                    None => {}
                }
            }
        }
    });

    (format!("ws://{addr}/converse"), rx)
}

/// Accept `connections` connections one after another, hanging up on the
/// first `hang_ups` of them as soon as `session.start` arrives. The listener
/// is dropped after the last connection, so later connects are refused.
/// Received frames are tagged with the connection index.
async fn spawn_flaky_endpoint(
    connections: usize,
    hang_ups: usize,
) -> (String, mpsc::UnboundedReceiver<(usize, Value)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        for index in 0..connections {
            let (stream, _) = listener.accept().await.unwrap();
            let ws_stream = accept_async(stream).await.unwrap();
            let (mut write, mut read) = ws_stream.split();

            while let Some(Ok(message)) = read.next().await {
                let Message::Text(text) = message else {
                    continue;
                };
                let value: Value = serde_json::from_str(&text).unwrap();
                let is_start = value["type"] == "session.start";
                let _ = tx.send((index, value));

                if is_start && index < hang_ups {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    (format!("ws://{addr}/converse"), rx)
}

fn reconnecting(max_attempts: u32, initial_delay_ms: u64) -> ReconnectionConfig {
    ReconnectionConfig {
        enabled: true,
        max_attempts,
        initial_delay_ms,
        max_delay_ms: initial_delay_ms * 4,
        jitter: false,
        ..Default::default()
    }
}

fn config_for(url: String) -> WebSocketConfig {
    WebSocketConfig {
        url,
        auth_token: Some("test-token".to_string().into()),
        connect_timeout_ms: 2_000,
        reconnection: ReconnectionConfig::disabled(),
    }
}

fn transport_for(url: String) -> WebSocketTransport {
    WebSocketTransport::new(config_for(url))
}

fn descriptor() -> SessionDescriptor {
    SessionDescriptor {
        session_id: "session-1".to_string(),
        format: AudioFormat::new(16000, 1),
    }
}

fn chunk(seq: u64) -> OutboundMessage {
    OutboundMessage::AudioChunk(AudioChunk {
        seq,
        captured_at_ms: seq * 100,
        data: Bytes::from(vec![0u8; 320]),
        format: AudioFormat::new(16000, 1),
    })
}

async fn next_frame<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(TIMEOUT, rx.recv())
        .await
        .expect("endpoint frame timed out")
        .expect("endpoint stopped")
}

async fn next_event(events: &mut TransportEventReceiver) -> TransportEvent {
    tokio::time::timeout(TIMEOUT, events.recv())
        .await
        .expect("transport event timed out")
        .expect("transport event channel closed")
}

#[tokio::test]
async fn test_session_start_is_first_and_chunks_arrive_in_order() {
    let (url, mut frames) = spawn_endpoint(Script::Reply(vec![])).await;
    let mut transport = transport_for(url);

    let mut events = transport.open(&descriptor()).await.unwrap();
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::StateChanged(TransportState::Ready)
    );

    for seq in 0..4 {
        transport.send(chunk(seq)).unwrap();
    }
    transport.send(OutboundMessage::TurnCommit).unwrap();

    let start = next_frame(&mut frames).await;
    assert_eq!(start["type"], "session.start");
    assert_eq!(start["session_id"], "session-1");
    assert_eq!(start["audio"]["encoding"], "pcm16");
    assert_eq!(start["audio"]["sample_rate"], 16000);

    for expected in 0..4u64 {
        let frame = next_frame(&mut frames).await;
        assert_eq!(frame["type"], "audio.chunk");
        assert_eq!(frame["seq"], expected);
        assert_eq!(frame["captured_at_ms"], expected * 100);
    }
    assert_eq!(next_frame(&mut frames).await["type"], "turn.commit");

    transport.close();
}

#[tokio::test]
async fn test_out_of_order_chunk_is_rejected_locally() {
    let (url, _frames) = spawn_endpoint(Script::Reply(vec![])).await;
    let mut transport = transport_for(url);
    let _events = transport.open(&descriptor()).await.unwrap();

    transport.send(chunk(3)).unwrap();
    assert!(matches!(
        transport.send(chunk(2)),
        Err(TransportError::OutOfOrder { seq: 2, last: 3 })
    ));
    assert!(transport.send(chunk(4)).is_ok());

    transport.close();
}

#[tokio::test]
async fn test_inbound_messages_become_events() {
    let (url, _frames) = spawn_endpoint(Script::Reply(vec![
        json!({"type": "session.ready", "session_id": "session-1"}),
        json!({"type": "transcript", "role": "user", "text": "hello there"}),
        json!({"type": "unknown.message"}),
        json!({"type": "response.audio", "audio": "AQACAA==", "response_id": "r1"}),
        json!({"type": "response.done", "response_id": "r1"}),
    ]))
    .await;
    let mut transport = transport_for(url);
    let mut events = transport.open(&descriptor()).await.unwrap();

    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::StateChanged(TransportState::Ready)
    );
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Inbound(InboundEvent::SessionReady)
    );
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Inbound(InboundEvent::Transcript {
            role: TranscriptRole::User,
            text: "hello there".to_string(),
        })
    );
    // The unknown message is skipped
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Inbound(InboundEvent::ResponseAudioChunk {
            data: Bytes::from_static(&[1, 0, 2, 0]),
            response_id: Some("r1".to_string()),
        })
    );
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Inbound(InboundEvent::ResponseDone {
            response_id: Some("r1".to_string()),
        })
    );

    transport.close();
}

#[tokio::test]
async fn test_close_sends_session_stop() {
    let (url, mut frames) = spawn_endpoint(Script::Reply(vec![])).await;
    let mut transport = transport_for(url);
    let _events = transport.open(&descriptor()).await.unwrap();

    assert_eq!(next_frame(&mut frames).await["type"], "session.start");

    transport.close();
    assert_eq!(next_frame(&mut frames).await["type"], "session.stop");
    assert!(matches!(
        transport.state(),
        TransportState::Closing | TransportState::Closed
    ));

    // Idempotent, and nothing can be queued afterwards
    transport.close();
    assert!(matches!(
        transport.send(OutboundMessage::TurnCommit),
        Err(TransportError::NotConnected)
    ));
}

#[tokio::test]
async fn test_server_hang_up_without_reconnection_is_fatal() {
    let (url, _frames) = spawn_endpoint(Script::HangUp).await;
    let mut transport = transport_for(url);
    let mut events = transport.open(&descriptor()).await.unwrap();

    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::StateChanged(TransportState::Ready)
    );
    match next_event(&mut events).await {
        TransportEvent::Closed { fatal, .. } => assert!(fatal),
        other => panic!("expected Closed, got {other:?}"),
    }
    assert_eq!(transport.state(), TransportState::Closed);
}

#[tokio::test]
async fn test_unreachable_endpoint_fails_open() {
    // Bind and drop to get a port nothing listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut transport = transport_for(format!("ws://{addr}/converse"));
    let result = transport.open(&descriptor()).await;

    assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
    assert_eq!(transport.state(), TransportState::Closed);
}

#[tokio::test]
async fn test_reconnects_after_each_outage_and_restores_session() {
    // Two outages in a row, the second before the endpoint ever replies
    let (url, mut frames) = spawn_flaky_endpoint(3, 2).await;
    let mut transport = WebSocketTransport::new(WebSocketConfig {
        reconnection: reconnecting(3, 100),
        ..config_for(url)
    });
    let mut events = transport.open(&descriptor()).await.unwrap();

    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::StateChanged(TransportState::Ready)
    );

    for _ in 0..2 {
        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::StateChanged(TransportState::Degraded)
        );
        let dropped_at = Instant::now();
        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Reconnected { attempt: 1 }
        );
        // Backoff before the first retry
        assert!(dropped_at.elapsed() >= Duration::from_millis(90));
    }
    assert_eq!(transport.state(), TransportState::Streaming);

    // Every connection opened with session.start
    for expected in 0..3 {
        let (index, frame) = next_frame(&mut frames).await;
        assert_eq!(index, expected);
        assert_eq!(frame["type"], "session.start");
        assert_eq!(frame["session_id"], "session-1");
    }

    transport.send(chunk(0)).unwrap();
    let (index, frame) = next_frame(&mut frames).await;
    assert_eq!(index, 2);
    assert_eq!(frame["type"], "audio.chunk");
    assert_eq!(frame["seq"], 0);

    transport.close();
}

#[tokio::test]
async fn test_exhausted_retries_close_fatally() {
    let (url, mut frames) = spawn_flaky_endpoint(1, 1).await;
    let mut transport = WebSocketTransport::new(WebSocketConfig {
        reconnection: reconnecting(2, 50),
        ..config_for(url)
    });
    let mut events = transport.open(&descriptor()).await.unwrap();

    assert_eq!(next_frame(&mut frames).await.1["type"], "session.start");
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::StateChanged(TransportState::Ready)
    );
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::StateChanged(TransportState::Degraded)
    );

    match next_event(&mut events).await {
        TransportEvent::Closed { reason, fatal } => {
            assert!(fatal);
            assert!(reason.contains("after 2"), "unexpected reason: {reason}");
        }
        other => panic!("expected Closed, got {other:?}"),
    }
    assert_eq!(transport.state(), TransportState::Closed);
}
