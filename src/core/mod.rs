pub mod audio;
pub mod controller;
pub mod player;
pub mod session;
pub mod transport;
pub mod turn;

// Re-export commonly used types for convenience
pub use audio::{AudioFormat, AudioFrame, AudioSource, AudioSourceError, FrameEncoder};
pub use controller::{
    Command, ControllerConfig, ControllerEvent, ControllerHandle, ControllerState,
    ConversationController, Status,
};
pub use player::{AudioSink, MemorySink, PlaybackError, ResponsePlayer};
pub use session::{ConversationTurn, Session, SessionState, SessionStats};
pub use transport::{
    BoxedTransport, MockTransport, Transport, TransportError, TransportEvent, WebSocketConfig,
    WebSocketTransport,
};
pub use turn::{TurnDetector, TurnDetectorConfig, TurnStrategyKind};
