//! End-to-end conversation runs through the public controller API.
//!
//! Each test drives a real `ConversationController::run` loop with a paced
//! scripted microphone, the in-memory transport and an in-memory speaker.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use waav_converse::core::audio::{AudioConstraints, AudioFormat, ScriptedAudioSource};
use waav_converse::core::player::MemorySink;
use waav_converse::core::transport::{
    InboundEvent, MockTransport, MockTransportHandle, TranscriptRole,
};
use waav_converse::{
    ControllerConfig, ControllerEvent, ControllerHandle, ConversationController, ConverseError,
    SessionStats, Status, TurnDetectorConfig, TurnStrategyKind,
};

const FRAME_MS: u32 = 20;
const TIMEOUT: Duration = Duration::from_secs(10);

fn format() -> AudioFormat {
    AudioFormat::new(16000, 1)
}

fn config() -> ControllerConfig {
    ControllerConfig {
        audio: AudioConstraints {
            sample_rate: 16000,
            channels: 1,
            frame_ms: FRAME_MS,
            device: None,
        },
        chunk_interval_ms: 100,
        turn_detection: TurnDetectorConfig {
            silence_threshold_ms: 600,
            min_speech_ms: 300,
            ..Default::default()
        },
        playback_lead_ms: 200,
        poll_interval_ms: 20,
    }
}

struct Running {
    handle: ControllerHandle,
    transport: MockTransportHandle,
    events: broadcast::Receiver<ControllerEvent>,
    task: JoinHandle<SessionStats>,
}

/// Spawn a controller over a paced script and send `start`.
async fn launch(source: ScriptedAudioSource) -> Running {
    launch_with(config(), source).await
}

async fn launch_with(config: ControllerConfig, source: ScriptedAudioSource) -> Running {
    let transport = MockTransport::new();
    let transport_handle = transport.handle();
    let controller = ConversationController::new(
        config,
        Box::new(source.paced(Duration::from_millis(FRAME_MS as u64))),
        Box::new(transport),
        Box::new(MemorySink::new(format())),
    );
    let events = controller.subscribe();

    let (handle, commands) = ControllerHandle::channel();
    let task = tokio::spawn(controller.run(commands));
    handle.start().await.unwrap();

    Running {
        handle,
        transport: transport_handle,
        events,
        task,
    }
}

/// Collect events until `done` matches one, failing on timeout.
async fn wait_for(
    events: &mut broadcast::Receiver<ControllerEvent>,
    done: impl Fn(&ControllerEvent) -> bool,
) -> Vec<ControllerEvent> {
    let mut seen = Vec::new();
    tokio::time::timeout(TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let finished = done(&event);
                    seen.push(event);
                    if finished {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("controller dropped"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out; saw {seen:?}"));
    seen
}

/// Answer the first `turn.commit` with transcripts, audio and `response.done`.
fn spawn_responder(transport: MockTransportHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        while transport.count("turn.commit") == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        transport.inject(InboundEvent::Transcript {
            role: TranscriptRole::User,
            text: "what time is it".to_string(),
        });
        transport.inject(InboundEvent::Transcript {
            role: TranscriptRole::Assistant,
            text: "It is noon.".to_string(),
        });
        let pcm = Bytes::from(vec![0u8; format().samples_for_ms(100) * 2]);
        for _ in 0..3 {
            transport.inject(InboundEvent::ResponseAudioChunk {
                data: pcm.clone(),
                response_id: Some("r1".to_string()),
            });
        }
        transport.inject(InboundEvent::ResponseDone {
            response_id: Some("r1".to_string()),
        });
    })
}

#[tokio::test]
async fn test_user_turn_and_response_round_trip() {
    let source = ScriptedAudioSource::from_levels(
        format(),
        FRAME_MS,
        &[(0.0, 200), (0.4, 600), (0.0, 2000)],
    );
    let mut running = launch(source).await;
    let responder = spawn_responder(running.transport.clone());

    let seen = wait_for(&mut running.events, |e| {
        matches!(e, ControllerEvent::AssistantSpeaking { speaking: false })
    })
    .await;

    assert!(seen.contains(&ControllerEvent::StatusChanged { status: Status::Listening }));
    assert!(seen.contains(&ControllerEvent::UserSpeaking { speaking: true }));
    assert!(seen.contains(&ControllerEvent::UserSpeaking { speaking: false }));
    assert!(seen.contains(&ControllerEvent::StatusChanged { status: Status::Responding }));
    assert!(seen.contains(&ControllerEvent::TranscriptUpdated {
        role: TranscriptRole::Assistant,
        text: "It is noon.".to_string(),
    }));
    assert!(seen.contains(&ControllerEvent::TurnCountChanged { count: 2 }));

    running.handle.stop().await.unwrap();
    let stats = running.task.await.unwrap();
    responder.await.unwrap();

    assert_eq!(stats.user_turns, 1);
    assert_eq!(stats.assistant_turns, 1);
    assert_eq!(stats.barge_ins, 0);
    assert!(stats.chunks_sent > 0);

    let kinds = running.transport.sent_kinds();
    assert_eq!(kinds.first(), Some(&"session.start"));
    assert_eq!(kinds.last(), Some(&"session.stop"));
    assert_eq!(running.transport.count("turn.commit"), 1);
    assert_eq!(running.transport.count("response.cancel"), 0);

    // Chunk numbering is contiguous from zero
    let seqs = running.transport.chunk_seqs();
    assert_eq!(seqs, (0..seqs.len() as u64).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_short_noise_produces_no_turn() {
    let source = ScriptedAudioSource::from_levels(
        format(),
        FRAME_MS,
        &[(0.0, 200), (0.4, 160), (0.0, 1200)],
    );
    let mut running = launch(source).await;

    wait_for(&mut running.events, |e| {
        matches!(e, ControllerEvent::StatusChanged { status: Status::Listening })
    })
    .await;
    tokio::time::sleep(Duration::from_millis(1800)).await;

    running.handle.stop().await.unwrap();
    let stats = running.task.await.unwrap();

    assert_eq!(stats.user_turns, 0);
    assert_eq!(running.transport.count("turn.commit"), 0);
}

#[tokio::test]
async fn test_push_to_talk_commits_on_release() {
    let source = ScriptedAudioSource::from_levels(format(), FRAME_MS, &[(0.0, 5000)]);
    let mut running = launch(source).await;

    wait_for(&mut running.events, |e| {
        matches!(e, ControllerEvent::StatusChanged { status: Status::Listening })
    })
    .await;

    running.handle.force_turn_start().await.unwrap();
    wait_for(&mut running.events, |e| {
        matches!(e, ControllerEvent::UserSpeaking { speaking: true })
    })
    .await;

    // Silence longer than the threshold does not end a held turn
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(running.transport.count("turn.commit"), 0);

    running.handle.force_turn_stop().await.unwrap();
    wait_for(&mut running.events, |e| {
        matches!(e, ControllerEvent::TurnCountChanged { count: 1 })
    })
    .await;
    assert_eq!(running.transport.count("turn.commit"), 1);

    running.handle.stop().await.unwrap();
    let stats = running.task.await.unwrap();
    assert_eq!(stats.user_turns, 1);
}

#[tokio::test]
async fn test_fatal_endpoint_error_ends_the_run() {
    let source = ScriptedAudioSource::from_levels(format(), FRAME_MS, &[(0.0, 5000)]);
    let mut running = launch(source).await;

    wait_for(&mut running.events, |e| {
        matches!(e, ControllerEvent::StatusChanged { status: Status::Listening })
    })
    .await;

    running.transport.inject(InboundEvent::Error {
        reason: "quota exceeded".to_string(),
        fatal: true,
    });

    let seen = wait_for(&mut running.events, |e| {
        matches!(e, ControllerEvent::SessionEnded { .. })
    })
    .await;
    assert!(seen.contains(&ControllerEvent::StatusChanged { status: Status::Ended }));

    // The loop exits on its own
    tokio::time::timeout(TIMEOUT, &mut running.task)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        running.handle.start().await,
        Err(ConverseError::ControllerGone)
    ));
}

#[tokio::test]
async fn test_denied_microphone_ends_before_connecting() {
    let source = ScriptedAudioSource::new(format(), vec![]).with_permission_denied();
    let mut running = launch(source).await;

    let seen = wait_for(&mut running.events, |e| {
        matches!(e, ControllerEvent::SessionEnded { .. })
    })
    .await;
    assert!(seen.contains(&ControllerEvent::StatusChanged { status: Status::Connecting }));

    let stats = tokio::time::timeout(TIMEOUT, running.task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stats.chunks_sent, 0);
    assert!(running.transport.sent().is_empty());
}

#[tokio::test]
async fn test_server_detected_turn_reply_and_barge_in() {
    let mut config = config();
    config.turn_detection.strategy = TurnStrategyKind::Server;
    let source = ScriptedAudioSource::from_levels(format(), FRAME_MS, &[(0.0, 8000)]);
    let mut running = launch_with(config, source).await;

    wait_for(&mut running.events, |e| {
        matches!(e, ControllerEvent::StatusChanged { status: Status::Listening })
    })
    .await;

    running.transport.inject(InboundEvent::SpeechStarted);
    wait_for(&mut running.events, |e| {
        matches!(e, ControllerEvent::UserSpeaking { speaking: true })
    })
    .await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    // The turn ends when the endpoint says so, not after local silence
    running.transport.inject(InboundEvent::SpeechStopped);
    wait_for(&mut running.events, |e| {
        matches!(e, ControllerEvent::TurnCountChanged { count: 1 })
    })
    .await;

    let pcm = Bytes::from(vec![0u8; format().samples_for_ms(100) * 2]);
    for _ in 0..3 {
        running.transport.inject(InboundEvent::ResponseAudioChunk {
            data: pcm.clone(),
            response_id: Some("r1".to_string()),
        });
    }
    wait_for(&mut running.events, |e| {
        matches!(e, ControllerEvent::StatusChanged { status: Status::Responding })
    })
    .await;

    // The user talks over the reply
    running.transport.inject(InboundEvent::SpeechStarted);
    let seen = wait_for(&mut running.events, |e| {
        matches!(e, ControllerEvent::AssistantSpeaking { speaking: false })
    })
    .await;
    assert!(seen.contains(&ControllerEvent::StatusChanged { status: Status::Listening }));

    running.handle.stop().await.unwrap();
    let stats = running.task.await.unwrap();

    assert_eq!(stats.user_turns, 1);
    assert_eq!(stats.barge_ins, 1);
    assert_eq!(running.transport.count("turn.commit"), 0);
    assert_eq!(running.transport.count("response.cancel"), 1);
}
