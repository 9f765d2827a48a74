//! Per-conversation state owned by the controller.

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::core::transport::TranscriptRole;

/// Lifecycle of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Starting,
    Active,
    Ending,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Starting => write!(f, "starting"),
            SessionState::Active => write!(f, "active"),
            SessionState::Ending => write!(f, "ending"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Counters accumulated over a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub chunks_sent: u64,
    pub chunks_dropped: u64,
    pub user_turns: u64,
    pub assistant_turns: u64,
    pub barge_ins: u64,
    pub misfires: u64,
    pub discarded_segments: u64,
    pub reconnects: u64,
}

impl std::fmt::Display for SessionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} chunks sent ({} dropped), {} user turns, {} assistant turns, {} barge-ins, {} misfires, {} discarded segments, {} reconnects",
            self.chunks_sent,
            self.chunks_dropped,
            self.user_turns,
            self.assistant_turns,
            self.barge_ins,
            self.misfires,
            self.discarded_segments,
            self.reconnects
        )
    }
}

/// Audio references kept for a finalized turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TurnArtifacts {
    /// Range of outbound chunk sequence numbers carrying the user's speech
    User {
        first_seq: Option<u64>,
        last_seq: Option<u64>,
    },
    /// Streamed response audio
    Assistant {
        response_id: Option<String>,
        chunks: usize,
        interrupted: bool,
    },
}

/// One entry in the turn log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationTurn {
    pub role: TranscriptRole,
    pub transcript: Option<String>,
    pub artifacts: TurnArtifacts,
}

impl ConversationTurn {
    pub fn user(first_seq: Option<u64>, last_seq: Option<u64>) -> Self {
        Self {
            role: TranscriptRole::User,
            transcript: None,
            artifacts: TurnArtifacts::User {
                first_seq,
                last_seq,
            },
        }
    }

    pub fn assistant(response_id: Option<String>, chunks: usize, interrupted: bool) -> Self {
        Self {
            role: TranscriptRole::Assistant,
            transcript: None,
            artifacts: TurnArtifacts::Assistant {
                response_id,
                chunks,
                interrupted,
            },
        }
    }
}

/// Append-only log of finalized turns.
///
/// Turns are never changed after being appended, except that a transcript
/// arriving late fills the latest turn of its role that has none. A
/// transcript arriving before its turn is held until that turn is appended.
#[derive(Debug, Clone, Default)]
pub struct TurnLog {
    turns: Vec<ConversationTurn>,
    pending: Vec<(TranscriptRole, String)>,
}

impl TurnLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a finalized turn and return its index.
    pub fn append(&mut self, mut turn: ConversationTurn) -> usize {
        if turn.transcript.is_none()
            && let Some(pos) = self.pending.iter().position(|(role, _)| *role == turn.role)
        {
            turn.transcript = Some(self.pending.remove(pos).1);
        }
        self.turns.push(turn);
        self.turns.len() - 1
    }

    /// Attach a transcript. Returns `true` if an existing turn was filled,
    /// `false` if the text is held for the next turn of that role.
    pub fn fill_transcript(&mut self, role: TranscriptRole, text: String) -> bool {
        // Only the latest turn of the role is eligible; it need not be the
        // last turn overall (a user transcript can land mid-reply).
        if let Some(turn) = self
            .turns
            .iter_mut()
            .rev()
            .find(|t| t.role == role)
            .filter(|t| t.transcript.is_none())
        {
            turn.transcript = Some(text);
            return true;
        }

        debug!("Holding early {} transcript", role);
        self.pending.push((role, text));
        false
    }

    /// Forget held transcripts of `role`. Returns how many were dropped.
    pub fn clear_pending(&mut self, role: TranscriptRole) -> usize {
        let before = self.pending.len();
        self.pending.retain(|(r, _)| *r != role);
        before - self.pending.len()
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// All mutable state of one conversation.
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    state: SessionState,
    generation: u64,
    stats: SessionStats,
    turns: TurnLog,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Idle,
            generation: 0,
            stats: SessionStats::default(),
            turns: TurnLog::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!(session_id = %self.id, "Session state: {} -> {}", self.state, state);
            self.state = state;
        }
    }

    /// Token carried by every handler input. Bumped when the session ends so
    /// late inputs are recognizable.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.state != SessionState::Closed
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn stats_mut(&mut self) -> &mut SessionStats {
        &mut self.stats
    }

    pub fn turns(&self) -> &TurnLog {
        &self.turns
    }

    pub fn turns_mut(&mut self) -> &mut TurnLog {
        &mut self.turns
    }

    /// Close the session and invalidate outstanding inputs.
    pub fn close(&mut self) {
        self.set_state(SessionState::Closed);
        self.generation += 1;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
