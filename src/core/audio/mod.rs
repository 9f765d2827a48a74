//! Microphone capture and chunk encoding.
//!
//! Raw capture is modelled by the [`AudioSource`] trait; frames flow out of an
//! open source over a bounded channel and are sliced into wire-ready
//! [`AudioChunk`]s by the [`FrameEncoder`].
//!
//! # Implementations
//!
//! - [`ScriptedAudioSource`] - replays a fixed list of frames (tests, dry runs)
//! - `CpalAudioSource` - system input device through `cpal` (feature `audio-io`)
//!
//! # Audio Format
//!
//! Frames carry interleaved `f32` samples. Chunks carry PCM 16-bit signed
//! little-endian samples at the format declared when the session started.
//!
//! # Example
//!
//! ```rust,ignore
//! use waav_converse::core::audio::{AudioConstraints, AudioSource, FrameEncoder, ScriptedAudioSource};
//!
//! let constraints = AudioConstraints::default();
//! let mut source = ScriptedAudioSource::from_levels(constraints.format(), 20, &[(0.4, 700), (0.0, 3000)]);
//! let mut frames = source.open(&constraints)?;
//!
//! let mut encoder = FrameEncoder::new(constraints.format(), 100);
//! while let Some(frame) = frames.recv().await {
//!     if let Some(chunk) = encoder.push(frame)? {
//!         println!("chunk #{} ({} bytes)", chunk.seq, chunk.data.len());
//!     }
//! }
//! ```

mod base;
#[cfg(feature = "audio-io")]
mod cpal_source;
mod encoder;
mod scripted;

pub use base::{
    AudioConstraints, AudioFormat, AudioFrame, AudioSource, AudioSourceError,
    DEFAULT_CHANNELS, DEFAULT_FRAME_MS, DEFAULT_SAMPLE_RATE, FRAME_CHANNEL_CAPACITY,
    FrameReceiver,
};
#[cfg(feature = "audio-io")]
pub use cpal_source::{CpalAudioSource, list_input_devices};
pub use encoder::{AudioChunk, EncodeError, FrameEncoder, f32_to_pcm16};
pub use scripted::ScriptedAudioSource;
