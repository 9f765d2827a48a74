//! Speech score sources for the turn detector.
//!
//! A strategy turns either captured frames or endpoint status events into a
//! speech score in `[0, 1]`. The state machine consuming the scores is the
//! same for every strategy.

use crate::core::audio::AudioFrame;
use crate::core::transport::InboundEvent;

use super::config::{TurnDetectorConfig, TurnStrategyKind};

/// Floor for dBFS computations on digital silence.
const MIN_DBFS: f32 = -120.0;

/// Pluggable speech score source.
pub trait TurnStrategy: Send {
    /// Score one captured frame.
    fn evaluate(&mut self, frame: &AudioFrame) -> Option<f32>;

    /// React to an endpoint event. Returns the new score if the event changed it.
    fn interpret(&mut self, event: &InboundEvent) -> Option<f32>;

    /// Whether completed turns must be committed to the endpoint explicitly.
    fn commits_turns(&self) -> bool;

    fn kind(&self) -> TurnStrategyKind;
}

/// Root mean square of a block of samples.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// RMS level in dBFS, floored at -120.
pub fn rms_dbfs(samples: &[f32]) -> f32 {
    let level = rms(samples);
    if level <= 0.0 || !level.is_finite() {
        return MIN_DBFS;
    }
    (20.0 * level.log10()).max(MIN_DBFS)
}

// =============================================================================
// Energy Strategy
// =============================================================================

/// Local strategy: maps frame energy linearly (in dB) between the noise floor
/// and the speech level.
#[derive(Debug, Clone)]
pub struct EnergyStrategy {
    noise_floor_db: f32,
    speech_level_db: f32,
}

impl EnergyStrategy {
    pub fn new(noise_floor_db: f32, speech_level_db: f32) -> Self {
        Self {
            noise_floor_db,
            speech_level_db,
        }
    }

    /// Score for a level in dBFS.
    pub fn score_db(&self, level_db: f32) -> f32 {
        let span = self.speech_level_db - self.noise_floor_db;
        if span <= 0.0 {
            return if level_db >= self.speech_level_db { 1.0 } else { 0.0 };
        }
        ((level_db - self.noise_floor_db) / span).clamp(0.0, 1.0)
    }
}

impl TurnStrategy for EnergyStrategy {
    fn evaluate(&mut self, frame: &AudioFrame) -> Option<f32> {
        if frame.samples.is_empty() {
            return None;
        }
        Some(self.score_db(rms_dbfs(&frame.samples)))
    }

    fn interpret(&mut self, _event: &InboundEvent) -> Option<f32> {
        None
    }

    fn commits_turns(&self) -> bool {
        true
    }

    fn kind(&self) -> TurnStrategyKind {
        TurnStrategyKind::Local
    }
}

// =============================================================================
// Server Strategy
// =============================================================================

/// Remote strategy: latches the endpoint's speech status and reports it on
/// every frame, so durations are measured on the capture clock.
#[derive(Debug, Clone, Default)]
pub struct ServerStrategy {
    latched: f32,
}

impl ServerStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latched(&self) -> f32 {
        self.latched
    }
}

impl TurnStrategy for ServerStrategy {
    fn evaluate(&mut self, _frame: &AudioFrame) -> Option<f32> {
        Some(self.latched)
    }

    fn interpret(&mut self, event: &InboundEvent) -> Option<f32> {
        match event {
            InboundEvent::SpeechStarted => self.latched = 1.0,
            InboundEvent::SpeechStopped => self.latched = 0.0,
            _ => return None,
        }
        Some(self.latched)
    }

    fn commits_turns(&self) -> bool {
        // The endpoint decided the turn boundary itself
        false
    }

    fn kind(&self) -> TurnStrategyKind {
        TurnStrategyKind::Server
    }
}

/// Create the strategy selected by `config`.
pub fn create_strategy(config: &TurnDetectorConfig) -> Box<dyn TurnStrategy> {
    match config.strategy {
        TurnStrategyKind::Local => Box::new(EnergyStrategy::new(
            config.noise_floor_db,
            config.speech_level_db,
        )),
        TurnStrategyKind::Server => Box::new(ServerStrategy::new()),
    }
}
