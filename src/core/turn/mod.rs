//! Turn detection
//!
//! Decides when a user turn begins and ends. A [`TurnStrategy`] produces
//! speech scores, either from captured audio ([`EnergyStrategy`]) or from the
//! endpoint's own speech status ([`ServerStrategy`]). The [`TurnDetector`]
//! runs the same hysteresis state machine over those scores either way:
//!
//! ```text
//! silent → speech-candidate → speech-confirmed → trailing-silence → silent
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use waav_converse::core::turn::{TurnDetector, TurnDetectorConfig, TurnEvent, create_strategy};
//!
//! let config = TurnDetectorConfig::default();
//! let mut strategy = create_strategy(&config);
//! let mut detector = TurnDetector::new(config);
//!
//! if let Some(score) = strategy.evaluate(&frame) {
//!     match detector.observe(score, frame.captured_at_ms, frame.duration_ms()) {
//!         Some(TurnEvent::SpeechStarted { .. }) => println!("Speech started!"),
//!         Some(TurnEvent::TurnCompleted(segment)) => println!("Turn: {}ms", segment.duration_ms),
//!         _ => {}
//!     }
//! }
//! ```

pub mod config;
pub mod detector;
pub mod strategy;

pub use config::{TurnDetectorConfig, TurnStrategyKind};
pub use detector::{SpeechSegment, TurnDetector, TurnEvent, TurnState, TurnStats};
pub use strategy::{EnergyStrategy, ServerStrategy, TurnStrategy, create_strategy, rms, rms_dbfs};
