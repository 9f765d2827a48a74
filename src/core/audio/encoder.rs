//! Frame-to-chunk encoder.
//!
//! Converts captured `f32` frames into PCM16 LE bytes and slices them into
//! sequence-numbered [`AudioChunk`]s on a bounded cadence.

use bytes::Bytes;
use thiserror::Error;
use tracing::trace;

use super::base::{AudioFormat, AudioFrame};

/// Errors that can occur while encoding a single frame.
///
/// Encoding failures only ever affect the offending frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    /// Frame format differs from the one declared at session start
    #[error("Frame format {actual} does not match session format {expected}")]
    FormatMismatch {
        expected: AudioFormat,
        actual: AudioFormat,
    },

    /// Sample count is not a whole number of interleaved frames
    #[error("Frame has {samples} samples, not divisible by {channels} channels")]
    Misaligned { samples: usize, channels: u16 },
}

/// An encoded, sequence-numbered slice of captured audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    /// Monotonic per-session sequence number, starting at 0
    pub seq: u64,
    /// Capture timestamp of the first sample in this chunk (ms)
    pub captured_at_ms: u64,
    /// PCM 16-bit signed little-endian samples
    pub data: Bytes,
    /// Declared session format
    pub format: AudioFormat,
}

impl AudioChunk {
    /// Duration of the chunk in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        self.format.duration_ms(self.data.len() / 2)
    }
}

/// Convert a normalized `f32` sample to PCM16, clamping out-of-range input.
#[inline]
pub fn f32_to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Buffers frames and emits [`AudioChunk`]s.
///
/// `push` emits eagerly once a full chunk interval is buffered; `flush`
/// emits whatever is buffered and is driven by the chunk-flush timer.
#[derive(Debug)]
pub struct FrameEncoder {
    format: AudioFormat,
    chunk_interval_ms: u32,
    chunk_samples: usize,
    pending: Vec<i16>,
    pending_since_ms: Option<u64>,
    next_seq: u64,
    dropped: u64,
}

impl FrameEncoder {
    pub fn new(format: AudioFormat, chunk_interval_ms: u32) -> Self {
        let chunk_samples = format.samples_for_ms(chunk_interval_ms).max(1);
        Self {
            format,
            chunk_interval_ms,
            chunk_samples,
            pending: Vec::with_capacity(chunk_samples),
            pending_since_ms: None,
            next_seq: 0,
            dropped: 0,
        }
    }

    /// Declared session format.
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn chunk_interval_ms(&self) -> u32 {
        self.chunk_interval_ms
    }

    /// Sequence number the next emitted chunk will carry.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Number of frames rejected so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Number of buffered, not yet emitted samples.
    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    /// Encode one frame. Returns a chunk once a full interval is buffered.
    ///
    /// A rejected frame leaves the buffer untouched.
    pub fn push(&mut self, frame: AudioFrame) -> Result<Option<AudioChunk>, EncodeError> {
        let actual = frame.format();
        if actual != self.format {
            self.dropped += 1;
            return Err(EncodeError::FormatMismatch {
                expected: self.format,
                actual,
            });
        }
        if frame.channels == 0 || frame.samples.len() % frame.channels as usize != 0 {
            self.dropped += 1;
            return Err(EncodeError::Misaligned {
                samples: frame.samples.len(),
                channels: frame.channels,
            });
        }
        if frame.samples.is_empty() {
            return Ok(None);
        }

        if self.pending_since_ms.is_none() {
            self.pending_since_ms = Some(frame.captured_at_ms);
        }
        self.pending
            .extend(frame.samples.iter().copied().map(f32_to_pcm16));

        if self.pending.len() >= self.chunk_samples {
            return Ok(self.emit());
        }
        Ok(None)
    }

    /// Emit all buffered audio as one chunk, if any.
    pub fn flush(&mut self) -> Option<AudioChunk> {
        self.emit()
    }

    /// Discard buffered audio and restart numbering at 0.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.pending_since_ms = None;
        self.next_seq = 0;
        self.dropped = 0;
    }

    fn emit(&mut self) -> Option<AudioChunk> {
        if self.pending.is_empty() {
            return None;
        }

        let mut data = Vec::with_capacity(self.pending.len() * 2);
        for sample in self.pending.drain(..) {
            data.extend_from_slice(&sample.to_le_bytes());
        }

        let chunk = AudioChunk {
            seq: self.next_seq,
            captured_at_ms: self.pending_since_ms.take().unwrap_or_default(),
            data: Bytes::from(data),
            format: self.format,
        };
        self.next_seq += 1;

        trace!(seq = chunk.seq, bytes = chunk.data.len(), "Encoded audio chunk");
        Some(chunk)
    }
}
