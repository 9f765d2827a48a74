//! Turn detection state machine

use tracing::{debug, trace};

use super::config::TurnDetectorConfig;

/// State machine for turn transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnState {
    /// No speech
    #[default]
    Silent,
    /// Score crossed the positive threshold, waiting for confirmation
    SpeechCandidate,
    /// Confirmed speech in progress
    SpeechConfirmed,
    /// Speech fell below the negative threshold, waiting for the silence
    /// threshold to complete the turn
    TrailingSilence,
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnState::Silent => write!(f, "silent"),
            TurnState::SpeechCandidate => write!(f, "speech-candidate"),
            TurnState::SpeechConfirmed => write!(f, "speech-confirmed"),
            TurnState::TrailingSilence => write!(f, "trailing-silence"),
        }
    }
}

/// One span of confirmed user speech.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechSegment {
    /// When the score first crossed the positive threshold (ms)
    pub start_ms: u64,
    /// When trailing silence began; `None` while ongoing
    pub end_ms: Option<u64>,
    /// `end_ms - start_ms` once finalized
    pub duration_ms: u64,
    /// Met the minimum speech duration (or was forced)
    pub valid: bool,
}

impl SpeechSegment {
    fn open(start_ms: u64) -> Self {
        Self {
            start_ms,
            end_ms: None,
            duration_ms: 0,
            valid: false,
        }
    }
}

/// Transitions reported to the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnEvent {
    /// Speech confirmed; a segment is now open
    SpeechStarted { start_ms: u64 },
    /// A valid segment was finalized: the user's turn is complete
    TurnCompleted(SpeechSegment),
    /// A confirmed segment ended shorter than the minimum speech duration
    SegmentDiscarded(SpeechSegment),
    /// A burst that never confirmed
    Misfire { start_ms: u64, duration_ms: u64 },
}

/// Counters kept by the detector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnStats {
    pub frames: u64,
    pub speech_frames: u64,
    pub turns: u64,
    pub discarded: u64,
    pub misfires: u64,
}

impl std::fmt::Display for TurnStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Turn Stats: {} frames ({} speech), {} turns, {} discarded, {} misfires",
            self.frames, self.speech_frames, self.turns, self.discarded, self.misfires
        )
    }
}

/// Hysteresis state machine deciding when a user turn begins and ends.
///
/// Time comes from the frames themselves (`at_ms` on the capture clock);
/// [`TurnDetector::poll`] advances it when frames stop arriving.
#[derive(Debug, Clone)]
pub struct TurnDetector {
    config: TurnDetectorConfig,
    state: TurnState,
    /// Start of the current candidate run
    candidate_start_ms: u64,
    /// Open segment, if any
    segment: Option<SpeechSegment>,
    /// Start of the current trailing silence
    silence_since_ms: Option<u64>,
    /// Latest time observed
    last_ms: u64,
    /// Held open by push-to-talk
    forced: bool,
    stats: TurnStats,
}

impl TurnDetector {
    pub fn new(config: TurnDetectorConfig) -> Self {
        debug!(
            "Turn detector initialized: positive={:.2}, negative={:.2}, confirm={}ms, silence={}ms, min_speech={}ms",
            config.positive_threshold,
            config.negative_threshold,
            config.min_confirm_ms,
            config.silence_threshold_ms,
            config.min_speech_ms
        );
        Self {
            config,
            state: TurnState::Silent,
            candidate_start_ms: 0,
            segment: None,
            silence_since_ms: None,
            last_ms: 0,
            forced: false,
            stats: TurnStats::default(),
        }
    }

    pub fn config(&self) -> &TurnDetectorConfig {
        &self.config
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Whether a segment is open.
    pub fn is_speaking(&self) -> bool {
        matches!(
            self.state,
            TurnState::SpeechConfirmed | TurnState::TrailingSilence
        )
    }

    /// The open segment, if any.
    pub fn segment(&self) -> Option<&SpeechSegment> {
        self.segment.as_ref()
    }

    /// Whether push-to-talk is holding the turn open.
    pub fn is_forced(&self) -> bool {
        self.forced
    }

    pub fn stats(&self) -> TurnStats {
        self.stats
    }

    /// Feed the score for a frame covering `[at_ms, at_ms + duration_ms)`.
    pub fn observe(&mut self, score: f32, at_ms: u64, duration_ms: u64) -> Option<TurnEvent> {
        let end_ms = at_ms + duration_ms;
        self.last_ms = self.last_ms.max(end_ms);
        self.stats.frames += 1;

        let is_speech = score >= self.config.positive_threshold;
        if is_speech {
            self.stats.speech_frames += 1;
        }

        if self.forced {
            return None;
        }

        let prev_state = self.state;
        let event = match self.state {
            TurnState::Silent => {
                if is_speech {
                    self.candidate_start_ms = at_ms;
                    self.state = TurnState::SpeechCandidate;
                    self.try_confirm(end_ms)
                } else {
                    None
                }
            }
            TurnState::SpeechCandidate => {
                if is_speech {
                    self.try_confirm(end_ms)
                } else {
                    // Never confirmed: the whole burst is dropped
                    let duration_ms = at_ms.saturating_sub(self.candidate_start_ms);
                    self.state = TurnState::Silent;
                    self.stats.misfires += 1;
                    debug!(
                        "Misfire suppressed: {}ms burst at {}ms",
                        duration_ms, self.candidate_start_ms
                    );
                    Some(TurnEvent::Misfire {
                        start_ms: self.candidate_start_ms,
                        duration_ms,
                    })
                }
            }
            TurnState::SpeechConfirmed => {
                if score < self.config.negative_threshold {
                    self.silence_since_ms = Some(at_ms);
                    self.state = TurnState::TrailingSilence;
                    self.check_completion(end_ms)
                } else {
                    None
                }
            }
            TurnState::TrailingSilence => {
                if is_speech {
                    // Speaker resumed, pending completion is cancelled
                    self.silence_since_ms = None;
                    self.state = TurnState::SpeechConfirmed;
                    debug!("Speech resumed at {}ms", at_ms);
                    None
                } else {
                    self.check_completion(end_ms)
                }
            }
        };

        if prev_state != self.state {
            trace!(
                "Turn frame at {}ms: score={:.3}, state={}->{}",
                at_ms, score, prev_state, self.state
            );
        }

        event
    }

    /// Advance the clock without a frame. Completes a turn whose trailing
    /// silence has lasted long enough.
    pub fn poll(&mut self, now_ms: u64) -> Option<TurnEvent> {
        let now_ms = now_ms.max(self.last_ms);
        if self.forced || self.state != TurnState::TrailingSilence {
            return None;
        }
        self.last_ms = now_ms;
        self.check_completion(now_ms)
    }

    /// Push-to-talk press: open a confirmed segment immediately and hold it
    /// open until [`TurnDetector::force_complete`].
    pub fn force_start(&mut self, now_ms: u64) -> Option<TurnEvent> {
        let now_ms = now_ms.max(self.last_ms);
        self.forced = true;

        match self.state {
            TurnState::Silent | TurnState::SpeechCandidate => {
                let start_ms = if self.state == TurnState::SpeechCandidate {
                    self.candidate_start_ms
                } else {
                    now_ms
                };
                self.segment = Some(SpeechSegment::open(start_ms));
                self.silence_since_ms = None;
                self.state = TurnState::SpeechConfirmed;
                debug!("Speech forced at {}ms", start_ms);
                Some(TurnEvent::SpeechStarted { start_ms })
            }
            TurnState::SpeechConfirmed | TurnState::TrailingSilence => {
                self.silence_since_ms = None;
                self.state = TurnState::SpeechConfirmed;
                None
            }
        }
    }

    /// Push-to-talk release: finalize the open segment now, skipping both the
    /// silence wait and the minimum duration check.
    pub fn force_complete(&mut self, now_ms: u64) -> Option<TurnEvent> {
        let now_ms = now_ms.max(self.last_ms);
        self.forced = false;

        match self.state {
            TurnState::SpeechConfirmed | TurnState::TrailingSilence => {
                let end_ms = self.silence_since_ms.unwrap_or(now_ms);
                self.finalize(end_ms, true)
            }
            TurnState::Silent | TurnState::SpeechCandidate => {
                self.state = TurnState::Silent;
                None
            }
        }
    }

    /// The endpoint reported end of speech: finalize the open segment now
    /// instead of waiting out the silence threshold. The minimum duration
    /// still applies, and push-to-talk keeps the segment open.
    pub fn end_speech(&mut self, now_ms: u64) -> Option<TurnEvent> {
        let now_ms = now_ms.max(self.last_ms);
        if self.forced {
            return None;
        }
        self.last_ms = now_ms;

        match self.state {
            TurnState::SpeechConfirmed | TurnState::TrailingSilence => {
                let end_ms = self.silence_since_ms.unwrap_or(now_ms);
                self.finalize(end_ms, false)
            }
            TurnState::SpeechCandidate => {
                let duration_ms = now_ms.saturating_sub(self.candidate_start_ms);
                self.state = TurnState::Silent;
                self.stats.misfires += 1;
                Some(TurnEvent::Misfire {
                    start_ms: self.candidate_start_ms,
                    duration_ms,
                })
            }
            TurnState::Silent => None,
        }
    }

    /// Return to silent, dropping any open segment.
    pub fn reset(&mut self) {
        self.state = TurnState::Silent;
        self.segment = None;
        self.silence_since_ms = None;
        self.candidate_start_ms = 0;
        self.forced = false;
        debug!("Turn detector reset");
    }

    fn try_confirm(&mut self, end_ms: u64) -> Option<TurnEvent> {
        let run_ms = end_ms.saturating_sub(self.candidate_start_ms);
        if run_ms < self.config.min_confirm_ms as u64 {
            return None;
        }

        let start_ms = self.candidate_start_ms;
        self.segment = Some(SpeechSegment::open(start_ms));
        self.silence_since_ms = None;
        self.state = TurnState::SpeechConfirmed;
        debug!("Speech confirmed after {}ms (started at {}ms)", run_ms, start_ms);
        Some(TurnEvent::SpeechStarted { start_ms })
    }

    fn check_completion(&mut self, now_ms: u64) -> Option<TurnEvent> {
        let since = self.silence_since_ms?;
        if now_ms.saturating_sub(since) < self.config.silence_threshold_ms as u64 {
            return None;
        }
        self.finalize(since, false)
    }

    fn finalize(&mut self, end_ms: u64, forced: bool) -> Option<TurnEvent> {
        let mut segment = self.segment.take()?;
        segment.end_ms = Some(end_ms);
        segment.duration_ms = end_ms.saturating_sub(segment.start_ms);
        segment.valid = forced || segment.duration_ms >= self.config.min_speech_ms as u64;

        self.state = TurnState::Silent;
        self.silence_since_ms = None;

        if segment.valid {
            self.stats.turns += 1;
            debug!(
                "Turn complete: {}ms of speech ({}ms - {}ms)",
                segment.duration_ms, segment.start_ms, end_ms
            );
            Some(TurnEvent::TurnCompleted(segment))
        } else {
            self.stats.discarded += 1;
            debug!(
                "Discarding {}ms segment (minimum {}ms)",
                segment.duration_ms, self.config.min_speech_ms
            );
            Some(TurnEvent::SegmentDiscarded(segment))
        }
    }
}
