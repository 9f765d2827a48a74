//! Base traits and types for microphone capture.
//!
//! An [`AudioSource`] owns the capture device for the lifetime of a session.
//! Opening it yields a channel of [`AudioFrame`]s; closing it releases the
//! device and must be safe to call any number of times.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Default capture sample rate (Hz). Matches the PCM16 rate most realtime
/// voice endpoints expect.
pub const DEFAULT_SAMPLE_RATE: u32 = 24000;

/// Default channel count (mono).
pub const DEFAULT_CHANNELS: u16 = 1;

/// Default capture frame duration in milliseconds.
pub const DEFAULT_FRAME_MS: u32 = 20;

/// Capacity of the frame channel between the capture callback and the
/// controller loop (~2.5s of 20ms frames).
pub const FRAME_CHANNEL_CAPACITY: usize = 128;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while acquiring the capture device.
#[derive(Debug, Error)]
pub enum AudioSourceError {
    /// The platform refused access to the microphone
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No usable capture device
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// `open` called while the device is already held
    #[error("Audio source is already open")]
    AlreadyOpen,
}

// =============================================================================
// Audio Format & Frames
// =============================================================================

/// Sample rate and channel layout declared at session start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Number of interleaved samples covering `duration_ms`.
    pub fn samples_for_ms(&self, duration_ms: u32) -> usize {
        (self.sample_rate as u64 * self.channels as u64 * duration_ms as u64 / 1000) as usize
    }

    /// Duration in milliseconds of `samples` interleaved samples.
    pub fn duration_ms(&self, samples: usize) -> u64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0;
        }
        samples as u64 * 1000 / (self.sample_rate as u64 * self.channels as u64)
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE, DEFAULT_CHANNELS)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pcm16/{}Hz/{}ch", self.sample_rate, self.channels)
    }
}

/// A block of raw captured audio.
///
/// Samples are interleaved `f32` in `[-1.0, 1.0]`. `captured_at_ms` is measured
/// from the moment the source was opened.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
    pub captured_at_ms: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, format: AudioFormat, captured_at_ms: u64) -> Self {
        Self {
            samples,
            sample_rate: format.sample_rate,
            channels: format.channels,
            captured_at_ms,
        }
    }

    /// A frame of constant amplitude, handy for synthetic input.
    pub fn constant(level: f32, duration_ms: u32, format: AudioFormat, captured_at_ms: u64) -> Self {
        let samples = vec![level; format.samples_for_ms(duration_ms)];
        Self::new(samples, format, captured_at_ms)
    }

    pub fn format(&self) -> AudioFormat {
        AudioFormat::new(self.sample_rate, self.channels)
    }

    pub fn duration_ms(&self) -> u64 {
        self.format().duration_ms(self.samples.len())
    }
}

/// Capture constraints requested by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioConstraints {
    /// Preferred sample rate (Hz)
    pub sample_rate: u32,
    /// Preferred channel count
    pub channels: u16,
    /// Duration of each delivered frame (ms)
    pub frame_ms: u32,
    /// Input device name, or the system default when `None`
    pub device: Option<String>,
}

impl AudioConstraints {
    pub fn format(&self) -> AudioFormat {
        AudioFormat::new(self.sample_rate, self.channels)
    }
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            frame_ms: DEFAULT_FRAME_MS,
            device: None,
        }
    }
}

/// Receiving half of an open capture stream.
pub type FrameReceiver = mpsc::Receiver<AudioFrame>;

// =============================================================================
// Base Trait
// =============================================================================

/// A microphone (or microphone stand-in).
///
/// Only the conversation controller opens and closes a source. Implementations
/// must also release the device when dropped.
pub trait AudioSource: Send {
    /// Acquire the device and start delivering frames.
    fn open(&mut self, constraints: &AudioConstraints) -> Result<FrameReceiver, AudioSourceError>;

    /// Release the device. Idempotent.
    fn close(&mut self);

    /// Whether the device is currently held.
    fn is_open(&self) -> bool;

    /// Format of delivered frames, known once open.
    fn format(&self) -> Option<AudioFormat>;
}
