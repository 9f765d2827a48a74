//! Turn detection configuration types

use serde::{Deserialize, Serialize};

use crate::errors::{ConverseError, ConverseResult};

/// Where speech scores come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TurnStrategyKind {
    /// Energy scores computed from captured frames
    #[default]
    Local,
    /// Speech status reported by the endpoint
    Server,
}

impl TurnStrategyKind {
    /// Parse a strategy name (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "local" | "energy" | "client" => Some(TurnStrategyKind::Local),
            "server" | "remote" => Some(TurnStrategyKind::Server),
            _ => None,
        }
    }
}

impl std::fmt::Display for TurnStrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnStrategyKind::Local => write!(f, "local"),
            TurnStrategyKind::Server => write!(f, "server"),
        }
    }
}

/// Configuration for the turn detection state machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnDetectorConfig {
    /// Score source
    pub strategy: TurnStrategyKind,

    /// Score at or above which a frame counts as speech (0.0 - 1.0)
    pub positive_threshold: f32,

    /// Score below which confirmed speech starts trailing off (0.0 - 1.0)
    /// Must not exceed the positive threshold
    pub negative_threshold: f32,

    /// How long scores must stay above the positive threshold before speech
    /// is confirmed (ms). Shorter bursts are misfires.
    pub min_confirm_ms: u32,

    /// Trailing silence that completes a turn (ms)
    pub silence_threshold_ms: u32,

    /// Confirmed segments shorter than this are discarded as noise (ms)
    pub min_speech_ms: u32,

    /// Level mapped to score 0.0 by the energy strategy (dBFS)
    pub noise_floor_db: f32,

    /// Level mapped to score 1.0 by the energy strategy (dBFS)
    pub speech_level_db: f32,
}

impl Default for TurnDetectorConfig {
    fn default() -> Self {
        Self {
            strategy: TurnStrategyKind::Local,
            positive_threshold: 0.5,
            negative_threshold: 0.35,
            min_confirm_ms: 100,
            silence_threshold_ms: 1000,
            min_speech_ms: 300,
            noise_floor_db: -50.0,
            speech_level_db: -20.0,
        }
    }
}

impl TurnDetectorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config tuned for quick turn-taking
    pub fn low_latency() -> Self {
        Self {
            min_confirm_ms: 60,
            silence_threshold_ms: 500,
            min_speech_ms: 200,
            ..Default::default()
        }
    }

    /// Create a config tuned for noisy rooms (fewer false turns)
    pub fn high_accuracy() -> Self {
        Self {
            positive_threshold: 0.7,
            negative_threshold: 0.45,
            min_confirm_ms: 200,
            silence_threshold_ms: 1500,
            min_speech_ms: 500,
            ..Default::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConverseResult<()> {
        let invalid = |msg: &str| Err(ConverseError::InvalidConfiguration(msg.to_string()));

        if !(0.0..=1.0).contains(&self.positive_threshold) {
            return invalid("turn_detection.positive_threshold must be between 0.0 and 1.0");
        }
        if !(0.0..=1.0).contains(&self.negative_threshold) {
            return invalid("turn_detection.negative_threshold must be between 0.0 and 1.0");
        }
        if self.negative_threshold > self.positive_threshold {
            return invalid(
                "turn_detection.negative_threshold must not exceed positive_threshold",
            );
        }
        if self.silence_threshold_ms == 0 {
            return invalid("turn_detection.silence_threshold_ms must be greater than 0");
        }
        if self.noise_floor_db >= self.speech_level_db {
            return invalid("turn_detection.noise_floor_db must be below speech_level_db");
        }
        Ok(())
    }
}
