//! Command and event surface of the conversation controller.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::core::transport::TranscriptRole;
use crate::errors::{ConverseError, ConverseResult};

/// Capacity of the controller's broadcast event channel.
pub const CONTROLLER_EVENT_CAPACITY: usize = 64;

/// Capacity of the command channel.
pub const COMMAND_CHANNEL_CAPACITY: usize = 16;

/// Top-level controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerState {
    #[default]
    Idle,
    Connecting,
    Listening,
    Responding,
    Ended,
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerState::Idle => write!(f, "idle"),
            ControllerState::Connecting => write!(f, "connecting"),
            ControllerState::Listening => write!(f, "listening"),
            ControllerState::Responding => write!(f, "responding"),
            ControllerState::Ended => write!(f, "ended"),
        }
    }
}

/// What the UI shows: the controller state, or `Reconnecting` while the
/// transport is recovering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Idle,
    Connecting,
    Listening,
    Responding,
    Reconnecting,
    Ended,
}

impl From<ControllerState> for Status {
    fn from(state: ControllerState) -> Self {
        match state {
            ControllerState::Idle => Status::Idle,
            ControllerState::Connecting => Status::Connecting,
            ControllerState::Listening => Status::Listening,
            ControllerState::Responding => Status::Responding,
            ControllerState::Ended => Status::Ended,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Idle => write!(f, "idle"),
            Status::Connecting => write!(f, "connecting"),
            Status::Listening => write!(f, "listening"),
            Status::Responding => write!(f, "responding"),
            Status::Reconnecting => write!(f, "reconnecting"),
            Status::Ended => write!(f, "ended"),
        }
    }
}

/// Commands accepted from the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    /// Push-to-talk press
    ForceTurnStart,
    /// Push-to-talk release
    ForceTurnStop,
}

/// Events published to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerEvent {
    StatusChanged { status: Status },
    UserSpeaking { speaking: bool },
    AssistantSpeaking { speaking: bool },
    TranscriptUpdated { role: TranscriptRole, text: String },
    TurnCountChanged { count: u64 },
    SessionEnded { reason: String },
}

/// Cloneable sender for controller commands.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<Command>,
}

impl ControllerHandle {
    /// Create a handle and the receiver to pass to
    /// [`ConversationController::run`](super::ConversationController::run).
    pub fn channel() -> (Self, mpsc::Receiver<Command>) {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        (Self { tx }, rx)
    }

    pub async fn send(&self, command: Command) -> ConverseResult<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| ConverseError::ControllerGone)
    }

    pub async fn start(&self) -> ConverseResult<()> {
        self.send(Command::Start).await
    }

    pub async fn stop(&self) -> ConverseResult<()> {
        self.send(Command::Stop).await
    }

    pub async fn force_turn_start(&self) -> ConverseResult<()> {
        self.send(Command::ForceTurnStart).await
    }

    pub async fn force_turn_stop(&self) -> ConverseResult<()> {
        self.send(Command::ForceTurnStop).await
    }

    /// Non-blocking send, usable from signal handlers.
    pub fn try_stop(&self) -> ConverseResult<()> {
        self.tx
            .try_send(Command::Stop)
            .map_err(|_| ConverseError::ControllerGone)
    }
}
