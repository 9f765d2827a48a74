//! Conversation controller
//!
//! Owns the [`Session`] and every component of the engine, and drives them
//! from one cooperative event loop:
//!
//! ```text
//! idle → connecting → listening ⇄ responding → ended
//! ```
//!
//! Every input handler is a plain synchronous method taking the session
//! generation it was produced for, so inputs that outlive their session are
//! ignored. [`ConversationController::run`] wires the handlers to the frame
//! channel, the transport event channel, the command channel and two timers
//! (chunk flush and silence poll).

mod events;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

pub use events::{
    COMMAND_CHANNEL_CAPACITY, CONTROLLER_EVENT_CAPACITY, Command, ControllerEvent,
    ControllerHandle, ControllerState, Status,
};

use crate::core::audio::{
    AudioChunk, AudioConstraints, AudioFrame, AudioSource, FrameEncoder, FrameReceiver,
};
use crate::core::player::{AudioSink, DEFAULT_LEAD_MS, ResponsePlayer};
use crate::core::session::{ConversationTurn, Session, SessionState, SessionStats};
use crate::core::transport::{
    BoxedTransport, InboundEvent, OutboundMessage, SessionDescriptor, TranscriptRole,
    TransportEvent, TransportEventReceiver, TransportState,
};
use crate::core::turn::{TurnDetector, TurnDetectorConfig, TurnEvent, TurnStrategy, create_strategy};
use crate::errors::{ConverseError, ConverseResult};

/// Default chunk cadence.
pub const DEFAULT_CHUNK_INTERVAL_MS: u32 = 100;

/// Default silence poll period.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// Settings for one controller.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub audio: AudioConstraints,
    pub chunk_interval_ms: u32,
    pub turn_detection: TurnDetectorConfig,
    pub playback_lead_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            audio: AudioConstraints::default(),
            chunk_interval_ms: DEFAULT_CHUNK_INTERVAL_MS,
            turn_detection: TurnDetectorConfig::default(),
            playback_lead_ms: DEFAULT_LEAD_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

/// Response whose remaining audio is dropped after a barge-in.
#[derive(Debug, Clone)]
struct DiscardedResponse {
    response_id: Option<String>,
}

impl ActiveResponse {
    /// Whether audio tagged `response_id` belongs to a newer response than
    /// this finished one.
    fn superseded_by(&self, response_id: Option<&str>) -> bool {
        self.done && (self.response_id.is_none() || self.response_id.as_deref() != response_id)
    }
}

impl DiscardedResponse {
    fn matches(&self, response_id: Option<&str>) -> bool {
        match (self.response_id.as_deref(), response_id) {
            (Some(discarded), Some(id)) => discarded == id,
            // Without ids there is no telling responses apart
            _ => true,
        }
    }
}

/// Bookkeeping for the response currently streaming.
#[derive(Debug, Clone, Default)]
struct ActiveResponse {
    response_id: Option<String>,
    chunks: usize,
    /// `responseDone` received and the turn logged
    done: bool,
}

/// Top-level orchestrator of one conversation.
pub struct ConversationController {
    config: ControllerConfig,
    session: Session,
    state: ControllerState,
    status: Status,
    reconnecting: bool,

    source: Box<dyn AudioSource>,
    transport: BoxedTransport,
    encoder: FrameEncoder,
    strategy: Box<dyn TurnStrategy>,
    detector: TurnDetector,
    player: ResponsePlayer,

    frames: Option<FrameReceiver>,
    transport_events: Option<TransportEventReceiver>,
    events_tx: broadcast::Sender<ControllerEvent>,

    drained: Arc<AtomicBool>,
    response: Option<ActiveResponse>,
    discarding: Option<DiscardedResponse>,
    user_first_seq: Option<u64>,
    started_at: Instant,
}

impl ConversationController {
    pub fn new(
        config: ControllerConfig,
        source: Box<dyn AudioSource>,
        transport: BoxedTransport,
        sink: Box<dyn AudioSink>,
    ) -> Self {
        let format = config.audio.format();
        let drained = Arc::new(AtomicBool::new(false));
        let mut player = ResponsePlayer::new(sink, config.playback_lead_ms);
        let flag = drained.clone();
        player.on_drained(Box::new(move |_| flag.store(true, Ordering::SeqCst)));

        let (events_tx, _) = broadcast::channel(CONTROLLER_EVENT_CAPACITY);

        Self {
            encoder: FrameEncoder::new(format, config.chunk_interval_ms),
            strategy: create_strategy(&config.turn_detection),
            detector: TurnDetector::new(config.turn_detection.clone()),
            config,
            session: Session::new(),
            state: ControllerState::Idle,
            status: Status::Idle,
            reconnecting: false,
            source,
            transport,
            player,
            frames: None,
            transport_events: None,
            events_tx,
            drained,
            response: None,
            discarding: None,
            user_first_seq: None,
            started_at: Instant::now(),
        }
    }

    /// Subscribe to UI events.
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events_tx.subscribe()
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn generation(&self) -> u64 {
        self.session.generation()
    }

    pub fn stats(&self) -> SessionStats {
        self.session.stats()
    }

    pub fn player(&self) -> &ResponsePlayer {
        &self.player
    }

    pub fn detector(&self) -> &TurnDetector {
        &self.detector
    }

    /// Milliseconds since the session started, on the capture clock.
    pub fn now_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Acquire the microphone and connect. Device failures end the session.
    pub async fn start(&mut self) -> ConverseResult<()> {
        if self.state != ControllerState::Idle {
            return Err(ConverseError::InvalidState(format!(
                "cannot start from {}",
                self.state
            )));
        }

        let session_id = self.session.id().to_string();
        info!(session_id = %session_id, "Starting conversation");
        self.session.set_state(SessionState::Starting);
        self.set_state(ControllerState::Connecting);
        self.started_at = Instant::now();

        let frames = match self.source.open(&self.config.audio) {
            Ok(frames) => frames,
            Err(e) => {
                error!("Failed to open audio source: {}", e);
                self.end_session(&e.to_string());
                return Err(e.into());
            }
        };
        self.frames = Some(frames);

        let descriptor = SessionDescriptor {
            session_id,
            format: self.config.audio.format(),
        };
        let events = match self.transport.open(&descriptor).await {
            Ok(events) => events,
            Err(e) => {
                error!("Failed to open transport: {}", e);
                self.end_session(&e.to_string());
                return Err(e.into());
            }
        };
        self.transport_events = Some(events);

        Ok(())
    }

    /// End the session. Idempotent.
    pub fn stop(&mut self) {
        self.end_session("stopped");
    }

    fn end_session(&mut self, reason: &str) {
        if self.state == ControllerState::Ended {
            return;
        }
        info!(session_id = %self.session.id(), reason, "Ending conversation");
        self.session.set_state(SessionState::Ending);

        self.source.close();
        self.frames = None;
        // Sends session.stop best-effort
        self.transport.close();
        self.transport_events = None;

        self.player.stop();
        self.drained.store(false, Ordering::SeqCst);
        let was_speaking = self.detector.is_speaking();
        self.detector.reset();
        self.encoder.reset();
        self.response = None;
        self.discarding = None;
        self.user_first_seq = None;

        self.session.close();
        self.reconnecting = false;
        self.set_state(ControllerState::Ended);
        if was_speaking {
            self.emit(ControllerEvent::UserSpeaking { speaking: false });
        }
        self.emit(ControllerEvent::SessionEnded {
            reason: reason.to_string(),
        });
        info!("Session stats: {}", self.session.stats());
    }

    // =========================================================================
    // Input handlers
    // =========================================================================

    /// Handle one UI command.
    pub async fn handle_command(&mut self, command: Command) {
        debug!(?command, "Controller command");
        match command {
            Command::Start => {
                if let Err(e) = self.start().await {
                    warn!("Start failed: {}", e);
                }
            }
            Command::Stop => self.stop(),
            Command::ForceTurnStart => {
                if !self.is_live() {
                    return;
                }
                let now = self.now_ms();
                if let Some(event) = self.detector.force_start(now) {
                    self.handle_turn_event(event);
                }
            }
            Command::ForceTurnStop => {
                if !self.is_live() {
                    return;
                }
                let now = self.now_ms();
                if let Some(event) = self.detector.force_complete(now) {
                    self.handle_turn_event(event);
                }
            }
        }
    }

    /// Handle one captured frame.
    pub fn handle_frame(&mut self, generation: u64, frame: AudioFrame) {
        if !self.accepts(generation) || !self.is_live() {
            trace!("Ignoring frame in state {}", self.state);
            return;
        }

        let score = self.strategy.evaluate(&frame);
        let at_ms = frame.captured_at_ms;
        let duration_ms = frame.duration_ms();

        // Turn events first: a completed turn flushes audio buffered before
        // this frame, and a new segment starts in the chunk this frame joins.
        if let Some(score) = score
            && let Some(event) = self.detector.observe(score, at_ms, duration_ms)
        {
            self.handle_turn_event(event);
        }
        if !self.is_live() {
            return;
        }

        match self.encoder.push(frame) {
            Ok(Some(chunk)) => self.send_chunk(chunk),
            Ok(None) => {}
            Err(e) => {
                self.session.stats_mut().chunks_dropped += 1;
                warn!("Dropping frame: {}", e);
            }
        }

        self.pump_player();
    }

    /// Handle one event from the transport.
    pub fn handle_transport_event(&mut self, generation: u64, event: TransportEvent) {
        if !self.accepts(generation) {
            trace!("Ignoring stale transport event");
            return;
        }

        match event {
            TransportEvent::StateChanged(state) => self.on_transport_state(state),
            TransportEvent::Reconnected { attempt } => {
                info!(attempt, "Transport reconnected");
                self.session.stats_mut().reconnects += 1;
                self.set_reconnecting(false);
            }
            TransportEvent::Closed { reason, fatal } => {
                if fatal {
                    error!("Transport closed: {}", reason);
                } else {
                    info!("Transport closed: {}", reason);
                }
                self.end_session(&reason);
            }
            TransportEvent::Inbound(event) => self.on_inbound(event),
        }
    }

    /// Chunk-flush timer.
    pub fn flush_tick(&mut self, generation: u64) {
        if !self.accepts(generation) || !self.is_live() {
            return;
        }
        if let Some(chunk) = self.encoder.flush() {
            self.send_chunk(chunk);
        }
        self.pump_player();
    }

    /// Silence-poll timer. Completes a turn even when frames stop arriving.
    pub fn poll_tick(&mut self, generation: u64, now_ms: u64) {
        if !self.accepts(generation) || !self.is_live() {
            return;
        }
        if let Some(event) = self.detector.poll(now_ms) {
            self.handle_turn_event(event);
        }
        self.pump_player();
    }

    /// Handle everything already queued on the frame and event channels,
    /// one frame at a time with events drained in between. Returns the
    /// number of inputs handled.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let generation = self.generation();
            let mut progressed = false;

            while let Some(event) = self.transport_events.as_mut().and_then(|rx| rx.try_recv().ok()) {
                self.handle_transport_event(generation, event);
                handled += 1;
                progressed = true;
            }

            if let Some(frame) = self.frames.as_mut().and_then(|rx| rx.try_recv().ok()) {
                self.handle_frame(generation, frame);
                handled += 1;
                progressed = true;
            }

            if !progressed {
                return handled;
            }
        }
    }

    /// Run the event loop until the session ends or the command channel
    /// closes. Returns the session counters.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> SessionStats {
        let mut flush =
            tokio::time::interval(Duration::from_millis(self.config.chunk_interval_ms.max(1) as u64));
        flush.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut poll = tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms.max(1)));
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if self.state == ControllerState::Ended {
                break;
            }
            let generation = self.generation();

            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("Command channel closed");
                        self.end_session("controller dropped");
                    }
                },
                frame = recv_opt(&mut self.frames) => match frame {
                    Some(frame) => self.handle_frame(generation, frame),
                    None => {
                        debug!("Audio source finished");
                        self.frames = None;
                    }
                },
                event = recv_opt(&mut self.transport_events) => match event {
                    Some(event) => self.handle_transport_event(generation, event),
                    None => {
                        self.transport_events = None;
                        self.end_session("transport event channel closed");
                    }
                },
                _ = flush.tick() => self.flush_tick(generation),
                _ = poll.tick() => {
                    let now = self.now_ms();
                    self.poll_tick(generation, now);
                }
            }
        }

        self.session.stats()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn accepts(&self, generation: u64) -> bool {
        self.session.is_current(generation)
    }

    fn is_live(&self) -> bool {
        matches!(
            self.state,
            ControllerState::Listening | ControllerState::Responding
        )
    }

    fn emit(&self, event: ControllerEvent) {
        // No subscribers is fine
        let _ = self.events_tx.send(event);
    }

    fn set_state(&mut self, state: ControllerState) {
        if self.state != state {
            debug!("Controller state: {} -> {}", self.state, state);
            self.state = state;
        }
        self.publish_status();
    }

    fn set_reconnecting(&mut self, reconnecting: bool) {
        self.reconnecting = reconnecting;
        self.publish_status();
    }

    fn publish_status(&mut self) {
        let status = if self.reconnecting && self.state != ControllerState::Ended {
            Status::Reconnecting
        } else {
            Status::from(self.state)
        };
        if status != self.status {
            self.status = status;
            self.emit(ControllerEvent::StatusChanged { status });
        }
    }

    fn send_chunk(&mut self, chunk: AudioChunk) {
        let seq = chunk.seq;
        match self.transport.send(OutboundMessage::AudioChunk(chunk)) {
            Ok(()) => {
                self.session.stats_mut().chunks_sent += 1;
                trace!(seq, "Audio chunk sent");
            }
            Err(e) => {
                self.session.stats_mut().chunks_dropped += 1;
                warn!(seq, "Failed to send audio chunk: {}", e);
            }
        }
    }

    fn send_control(&mut self, message: OutboundMessage) {
        let kind = message.kind();
        if let Err(e) = self.transport.send(message) {
            warn!("Failed to send {}: {}", kind, e);
        }
    }

    fn on_transport_state(&mut self, state: TransportState) {
        match state {
            TransportState::Ready | TransportState::Streaming => {
                if self.state == ControllerState::Connecting {
                    self.session.set_state(SessionState::Active);
                    self.set_state(ControllerState::Listening);
                    info!(session_id = %self.session.id(), "Conversation ready");
                }
                if self.reconnecting {
                    self.set_reconnecting(false);
                }
            }
            TransportState::Degraded => {
                warn!("Transport degraded, reconnecting");
                self.set_reconnecting(true);
            }
            TransportState::Connecting | TransportState::Closing | TransportState::Closed => {
                debug!("Transport state: {}", state);
            }
        }
    }

    fn on_inbound(&mut self, event: InboundEvent) {
        if let Some(score) = self.strategy.interpret(&event) {
            trace!(score, "Endpoint speech status");
        }

        match event {
            InboundEvent::SessionReady => {
                debug!("Endpoint session ready");
                self.on_transport_state(TransportState::Ready);
            }
            InboundEvent::SpeechStarted => {}
            InboundEvent::SpeechStopped => {
                // The endpoint owns the turn boundary; no local silence wait
                if !self.strategy.commits_turns() && self.is_live() {
                    let now = self.now_ms();
                    if let Some(event) = self.detector.end_speech(now) {
                        self.handle_turn_event(event);
                    }
                }
            }
            InboundEvent::Transcript { role, text } => {
                self.session.turns_mut().fill_transcript(role, text.clone());
                self.emit(ControllerEvent::TranscriptUpdated { role, text });
            }
            InboundEvent::ResponseAudioChunk { data, response_id } => {
                self.on_response_audio(&data, response_id)
            }
            InboundEvent::ResponseDone { response_id } => self.on_response_done(response_id),
            InboundEvent::Error { reason, fatal } => {
                if fatal {
                    error!("Endpoint error: {}", reason);
                    self.end_session(&reason);
                } else {
                    warn!("Endpoint error: {}", reason);
                }
            }
        }
    }

    fn on_response_audio(&mut self, data: &bytes::Bytes, response_id: Option<String>) {
        if !self.is_live() {
            return;
        }
        if let Some(discarded) = self.discarding.as_ref()
            && discarded.matches(response_id.as_deref())
        {
            trace!("Dropping late chunk of interrupted response");
            return;
        }

        if self.state == ControllerState::Listening {
            if self.detector.is_speaking() {
                // The user holds the floor
                info!("Response arrived while user is speaking, cancelling it");
                self.send_control(OutboundMessage::ResponseCancel {
                    response_id: response_id.clone(),
                });
                self.session.stats_mut().barge_ins += 1;
                self.discarding = Some(DiscardedResponse { response_id });
                return;
            }

            self.player.begin(response_id.clone());
            self.drained.store(false, Ordering::SeqCst);
            self.response = Some(ActiveResponse {
                response_id,
                ..Default::default()
            });
            self.set_state(ControllerState::Responding);
            self.emit(ControllerEvent::AssistantSpeaking { speaking: true });
        } else if let Some(current) = self.response.as_ref().filter(|r| r.done) {
            if !current.superseded_by(response_id.as_deref()) {
                trace!("Dropping chunk of finished response");
                return;
            }
            // Next reply queues behind the tail of the previous one
            debug!(response_id = ?response_id, "Response follows a draining one");
            self.player.chain(response_id.clone());
            self.drained.store(false, Ordering::SeqCst);
            self.response = Some(ActiveResponse {
                response_id,
                ..Default::default()
            });
        }

        if self.player.enqueue(data).is_ok()
            && let Some(response) = self.response.as_mut()
        {
            response.chunks += 1;
        }
        self.pump_player();
    }

    fn on_response_done(&mut self, response_id: Option<String>) {
        if let Some(discarded) = self.discarding.as_ref()
            && discarded.matches(response_id.as_deref())
        {
            debug!("Interrupted response finished on the endpoint");
            self.discarding = None;
            return;
        }

        let Some(response) = self.response.as_mut().filter(|r| !r.done) else {
            debug!("Response done without audio");
            return;
        };
        response.done = true;
        let turn = ConversationTurn::assistant(response.response_id.clone(), response.chunks, false);

        self.session.turns_mut().append(turn);
        self.session.stats_mut().assistant_turns += 1;
        self.emit_turn_count();

        self.player.finish();
        self.check_drained();
    }

    fn handle_turn_event(&mut self, event: TurnEvent) {
        match event {
            TurnEvent::SpeechStarted { start_ms } => {
                debug!(start_ms, "User speech started");
                self.user_first_seq = Some(self.encoder.next_seq());
                self.emit(ControllerEvent::UserSpeaking { speaking: true });
                if self.state == ControllerState::Responding {
                    self.barge_in();
                }
            }
            TurnEvent::TurnCompleted(segment) => {
                if let Some(chunk) = self.encoder.flush() {
                    self.send_chunk(chunk);
                }
                if self.strategy.commits_turns() {
                    self.send_control(OutboundMessage::TurnCommit);
                }

                let next = self.encoder.next_seq();
                let first = self.user_first_seq.take().filter(|&first| first < next);
                let last = first.map(|_| next - 1);
                self.session.turns_mut().append(ConversationTurn::user(first, last));
                self.session.stats_mut().user_turns += 1;

                info!(
                    start_ms = segment.start_ms,
                    duration_ms = segment.duration_ms,
                    "User turn complete"
                );
                self.emit(ControllerEvent::UserSpeaking { speaking: false });
                self.emit_turn_count();
            }
            TurnEvent::SegmentDiscarded(segment) => {
                debug!(duration_ms = segment.duration_ms, "Short segment discarded");
                self.session.stats_mut().discarded_segments += 1;
                self.user_first_seq = None;
                self.session.turns_mut().clear_pending(TranscriptRole::User);
                self.emit(ControllerEvent::UserSpeaking { speaking: false });
            }
            TurnEvent::Misfire { .. } => {
                self.session.stats_mut().misfires += 1;
            }
        }
    }

    /// Confirmed user speech during a reply: cut the reply off at once.
    fn barge_in(&mut self) {
        info!("Barge-in, stopping response playback");
        self.player.stop();
        self.drained.store(false, Ordering::SeqCst);

        if let Some(response) = self.response.take()
            && !response.done
        {
            self.send_control(OutboundMessage::ResponseCancel {
                response_id: response.response_id.clone(),
            });
            self.discarding = Some(DiscardedResponse {
                response_id: response.response_id.clone(),
            });
            self.session.turns_mut().append(ConversationTurn::assistant(
                response.response_id,
                response.chunks,
                true,
            ));
            self.session.stats_mut().assistant_turns += 1;
            self.emit_turn_count();
        }

        self.session.stats_mut().barge_ins += 1;
        self.set_state(ControllerState::Listening);
        self.emit(ControllerEvent::AssistantSpeaking { speaking: false });
    }

    fn pump_player(&mut self) {
        if self.state == ControllerState::Responding {
            self.player.pump();
            self.check_drained();
        }
    }

    fn check_drained(&mut self) {
        if !self.drained.swap(false, Ordering::SeqCst) {
            return;
        }
        self.response = None;
        if self.state == ControllerState::Responding {
            debug!("Response playback finished");
            self.set_state(ControllerState::Listening);
            self.emit(ControllerEvent::AssistantSpeaking { speaking: false });
        }
    }

    fn emit_turn_count(&self) {
        self.emit(ControllerEvent::TurnCountChanged {
            count: self.session.turns().len() as u64,
        });
    }
}

/// Receive from an optional channel; pending forever when absent.
async fn recv_opt<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
