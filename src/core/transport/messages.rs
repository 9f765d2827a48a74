//! WebSocket wire messages.
//!
//! All messages are JSON text frames tagged by `"type"`. Audio is PCM 16-bit
//! little-endian, base64 encoded.
//!
//! # Protocol Overview
//!
//! Client messages (sent to endpoint):
//! - session.start - Announce the session and audio format
//! - audio.chunk - Append captured audio
//! - turn.commit - The user's turn is complete
//! - response.cancel - Stop generating the current response
//! - session.stop - The session is ending
//!
//! Server messages (received from endpoint):
//! - session.ready - Session accepted
//! - speech.started - Server VAD detected speech
//! - speech.stopped - Server VAD detected silence
//! - transcript - Transcript for a user or assistant turn
//! - response.audio - Response audio chunk
//! - response.done - Response complete
//! - error - Error occurred

use base64::prelude::*;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::base::{InboundEvent, OutboundMessage, TranscriptRole};

/// Audio encoding announced in `session.start`.
pub const AUDIO_ENCODING_PCM16: &str = "pcm16";

// =============================================================================
// Client Messages (sent to endpoint)
// =============================================================================

/// Audio format block of `session.start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireAudioFormat {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Client messages sent to the endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "session.start")]
    SessionStart {
        session_id: String,
        audio: WireAudioFormat,
    },

    #[serde(rename = "audio.chunk")]
    AudioChunk {
        seq: u64,
        /// Base64-encoded PCM16 audio
        audio: String,
        captured_at_ms: u64,
    },

    #[serde(rename = "turn.commit")]
    TurnCommit,

    #[serde(rename = "response.cancel")]
    ResponseCancel {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        response_id: Option<String>,
    },

    #[serde(rename = "session.stop")]
    SessionStop,
}

impl From<&OutboundMessage> for ClientMessage {
    fn from(message: &OutboundMessage) -> Self {
        match message {
            OutboundMessage::SessionStart(session) => ClientMessage::SessionStart {
                session_id: session.session_id.clone(),
                audio: WireAudioFormat {
                    encoding: AUDIO_ENCODING_PCM16.to_string(),
                    sample_rate: session.format.sample_rate,
                    channels: session.format.channels,
                },
            },
            OutboundMessage::AudioChunk(chunk) => ClientMessage::AudioChunk {
                seq: chunk.seq,
                audio: BASE64_STANDARD.encode(&chunk.data),
                captured_at_ms: chunk.captured_at_ms,
            },
            OutboundMessage::TurnCommit => ClientMessage::TurnCommit,
            OutboundMessage::ResponseCancel { response_id } => ClientMessage::ResponseCancel {
                response_id: response_id.clone(),
            },
            OutboundMessage::SessionStop => ClientMessage::SessionStop,
        }
    }
}

// =============================================================================
// Server Messages (received from endpoint)
// =============================================================================

/// Server messages received from the endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "session.ready")]
    SessionReady {
        #[serde(default)]
        session_id: Option<String>,
    },

    #[serde(rename = "speech.started")]
    SpeechStarted,

    #[serde(rename = "speech.stopped")]
    SpeechStopped,

    #[serde(rename = "transcript")]
    Transcript { role: TranscriptRole, text: String },

    #[serde(rename = "response.audio")]
    ResponseAudio {
        /// Base64-encoded PCM16 audio
        audio: String,
        #[serde(default)]
        response_id: Option<String>,
    },

    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response_id: Option<String>,
    },

    #[serde(rename = "error")]
    Error {
        reason: String,
        #[serde(default)]
        fatal: bool,
    },
}

impl ServerMessage {
    /// Convert into an engine event, decoding any audio payload.
    pub fn into_event(self) -> Result<InboundEvent, base64::DecodeError> {
        Ok(match self {
            ServerMessage::SessionReady { .. } => InboundEvent::SessionReady,
            ServerMessage::SpeechStarted => InboundEvent::SpeechStarted,
            ServerMessage::SpeechStopped => InboundEvent::SpeechStopped,
            ServerMessage::Transcript { role, text } => InboundEvent::Transcript { role, text },
            ServerMessage::ResponseAudio { audio, response_id } => {
                InboundEvent::ResponseAudioChunk {
                    data: Bytes::from(BASE64_STANDARD.decode(audio)?),
                    response_id,
                }
            }
            ServerMessage::ResponseDone { response_id } => InboundEvent::ResponseDone { response_id },
            ServerMessage::Error { reason, fatal } => InboundEvent::Error { reason, fatal },
        })
    }
}

/// Parse one inbound text frame.
///
/// Returns `None` (after logging) for anything that is not a well-formed
/// server message.
pub fn parse_server_frame(text: &str) -> Option<InboundEvent> {
    let message = match serde_json::from_str::<ServerMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!("Failed to parse server message: {} - {}", e, text);
            return None;
        }
    };

    match message.into_event() {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!("Failed to decode response audio: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::{AudioChunk, AudioFormat};
    use crate::core::transport::base::SessionDescriptor;

    #[test]
    fn test_session_start_serialization() {
        let message = ClientMessage::from(&OutboundMessage::SessionStart(SessionDescriptor {
            session_id: "abc".to_string(),
            format: AudioFormat::new(24000, 1),
        }));
        let json = serde_json::to_value(&message).unwrap();

        assert_eq!(json["type"], "session.start");
        assert_eq!(json["session_id"], "abc");
        assert_eq!(json["audio"]["encoding"], "pcm16");
        assert_eq!(json["audio"]["sample_rate"], 24000);
        assert_eq!(json["audio"]["channels"], 1);
    }

    #[test]
    fn test_audio_chunk_serialization() {
        let chunk = AudioChunk {
            seq: 7,
            captured_at_ms: 140,
            data: Bytes::from_static(&[0, 1, 2, 3]),
            format: AudioFormat::new(24000, 1),
        };
        let message = ClientMessage::from(&OutboundMessage::AudioChunk(chunk));
        let json = serde_json::to_value(&message).unwrap();

        assert_eq!(json["type"], "audio.chunk");
        assert_eq!(json["seq"], 7);
        assert_eq!(json["captured_at_ms"], 140);
        let audio = json["audio"].as_str().unwrap();
        assert_eq!(BASE64_STANDARD.decode(audio).unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_control_message_serialization() {
        let json = serde_json::to_string(&ClientMessage::TurnCommit).unwrap();
        assert_eq!(json, r#"{"type":"turn.commit"}"#);

        let json = serde_json::to_string(&ClientMessage::SessionStop).unwrap();
        assert_eq!(json, r#"{"type":"session.stop"}"#);

        let json = serde_json::to_string(&ClientMessage::ResponseCancel { response_id: None })
            .unwrap();
        assert_eq!(json, r#"{"type":"response.cancel"}"#);

        let json = serde_json::to_string(&ClientMessage::ResponseCancel {
            response_id: Some("r1".to_string()),
        })
        .unwrap();
        assert!(json.contains(r#""response_id":"r1""#));
    }

    #[test]
    fn test_parse_response_audio() {
        let text = format!(
            r#"{{"type":"response.audio","audio":"{}","response_id":"r1"}}"#,
            BASE64_STANDARD.encode([1u8, 0, 2, 0])
        );
        let event = parse_server_frame(&text).unwrap();
        assert_eq!(
            event,
            InboundEvent::ResponseAudioChunk {
                data: Bytes::from_static(&[1, 0, 2, 0]),
                response_id: Some("r1".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_status_events() {
        assert_eq!(
            parse_server_frame(r#"{"type":"session.ready","session_id":"s"}"#),
            Some(InboundEvent::SessionReady)
        );
        assert_eq!(
            parse_server_frame(r#"{"type":"speech.started"}"#),
            Some(InboundEvent::SpeechStarted)
        );
        assert_eq!(
            parse_server_frame(r#"{"type":"speech.stopped"}"#),
            Some(InboundEvent::SpeechStopped)
        );
        assert_eq!(
            parse_server_frame(r#"{"type":"response.done"}"#),
            Some(InboundEvent::ResponseDone { response_id: None })
        );
    }

    #[test]
    fn test_parse_transcript_and_error() {
        assert_eq!(
            parse_server_frame(r#"{"type":"transcript","role":"assistant","text":"Hi there"}"#),
            Some(InboundEvent::Transcript {
                role: TranscriptRole::Assistant,
                text: "Hi there".to_string(),
            })
        );
        assert_eq!(
            parse_server_frame(r#"{"type":"error","reason":"quota"}"#),
            Some(InboundEvent::Error {
                reason: "quota".to_string(),
                fatal: false,
            })
        );
        assert_eq!(
            parse_server_frame(r#"{"type":"error","reason":"bye","fatal":true}"#),
            Some(InboundEvent::Error {
                reason: "bye".to_string(),
                fatal: true,
            })
        );
    }

    #[test]
    fn test_malformed_frames_are_ignored() {
        assert_eq!(parse_server_frame("not json"), None);
        assert_eq!(parse_server_frame(r#"{"type":"unknown.event"}"#), None);
        assert_eq!(parse_server_frame(r#"{"type":"transcript","role":"robot","text":"x"}"#), None);
        assert_eq!(
            parse_server_frame(r#"{"type":"response.audio","audio":"%%%"}"#),
            None
        );
    }
}
