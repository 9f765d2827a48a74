//! Playback output abstraction.

use std::sync::Arc;

use parking_lot::Mutex;

use super::PlaybackError;
use crate::core::audio::AudioFormat;

/// Where decoded response audio goes.
pub trait AudioSink: Send {
    /// Append interleaved samples to the output buffer.
    fn write(&mut self, samples: &[f32]) -> Result<(), PlaybackError>;

    /// Audio written but not yet played, in milliseconds.
    fn buffered_ms(&self) -> u64;

    /// Silence output immediately and drop everything buffered.
    fn halt(&mut self);

    /// Format samples are expected in.
    fn format(&self) -> AudioFormat;
}

#[derive(Debug, Default)]
struct MemorySinkState {
    played: Vec<f32>,
    buffered: usize,
    auto_drain: bool,
    halts: u32,
}

/// Sink that keeps audio in memory.
///
/// With auto-drain enabled every write counts as played immediately;
/// otherwise playback only advances through [`MemorySink::advance`].
/// Clones share the same buffer.
#[derive(Debug, Clone)]
pub struct MemorySink {
    format: AudioFormat,
    state: Arc<Mutex<MemorySinkState>>,
}

impl MemorySink {
    /// Sink whose writes play instantly.
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            state: Arc::new(Mutex::new(MemorySinkState {
                auto_drain: true,
                ..Default::default()
            })),
        }
    }

    /// Sink whose buffer only drains through `advance`.
    pub fn manual(format: AudioFormat) -> Self {
        Self {
            format,
            state: Arc::new(Mutex::new(MemorySinkState::default())),
        }
    }

    /// Play `duration_ms` worth of buffered audio.
    pub fn advance(&self, duration_ms: u32) {
        let mut state = self.state.lock();
        let samples = self.format.samples_for_ms(duration_ms);
        state.buffered = state.buffered.saturating_sub(samples);
    }

    /// Every sample written so far (halted audio included).
    pub fn played(&self) -> Vec<f32> {
        self.state.lock().played.clone()
    }

    /// Number of samples written so far.
    pub fn written_samples(&self) -> usize {
        self.state.lock().played.len()
    }

    pub fn halt_count(&self) -> u32 {
        self.state.lock().halts
    }
}

impl AudioSink for MemorySink {
    fn write(&mut self, samples: &[f32]) -> Result<(), PlaybackError> {
        let mut state = self.state.lock();
        state.played.extend_from_slice(samples);
        if !state.auto_drain {
            state.buffered += samples.len();
        }
        Ok(())
    }

    fn buffered_ms(&self) -> u64 {
        self.format.duration_ms(self.state.lock().buffered)
    }

    fn halt(&mut self) {
        let mut state = self.state.lock();
        state.buffered = 0;
        state.halts += 1;
    }

    fn format(&self) -> AudioFormat {
        self.format
    }
}
