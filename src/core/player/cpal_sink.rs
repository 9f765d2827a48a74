//! Speaker output through the system audio host (`cpal`).

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use super::PlaybackError;
use super::sink::AudioSink;
use crate::core::audio::AudioFormat;

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is created and dropped by the owning `CpalAudioSink`
/// only, and is never shared between threads.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Plays mono response audio on the default output device. The callback
/// pulls from a shared buffer and fills with silence when it runs dry.
pub struct CpalAudioSink {
    format: AudioFormat,
    buffer: Arc<Mutex<Vec<f32>>>,
    stream: Option<SendableStream>,
}

impl CpalAudioSink {
    /// Open the default output device at the response sample rate.
    pub fn new(format: AudioFormat) -> Result<Self, PlaybackError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlaybackError::Device("No output device available".to_string()))?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

        let default_config = device
            .default_output_config()
            .map_err(|e| PlaybackError::Device(format!("Failed to get output config: {e}")))?;
        let out_channels = default_config.channels() as usize;
        let config = cpal::StreamConfig {
            channels: default_config.channels(),
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let src_channels = format.channels.max(1) as usize;
        let buffer: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));
        let shared = Arc::clone(&buffer);

        let err_fn = |err| {
            error!("Audio output stream error: {}", err);
        };

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut buf = shared.lock();
                    let frames_needed = data.len() / out_channels;
                    let frames_available = (buf.len() / src_channels).min(frames_needed);

                    for i in 0..frames_available {
                        for c in 0..out_channels {
                            data[i * out_channels + c] = buf[i * src_channels + c % src_channels];
                        }
                    }
                    buf.drain(0..frames_available * src_channels);
                    data[frames_available * out_channels..].fill(0.0);
                },
                err_fn,
                None,
            )
            .map_err(|e| PlaybackError::Device(format!("Failed to build output stream: {e}")))?;

        stream
            .play()
            .map_err(|e| PlaybackError::Device(format!("Failed to start output stream: {e}")))?;

        info!(device = %device_name, format = %format, "Speaker output started");

        Ok(Self {
            format,
            buffer,
            stream: Some(SendableStream(stream)),
        })
    }
}

impl AudioSink for CpalAudioSink {
    fn write(&mut self, samples: &[f32]) -> Result<(), PlaybackError> {
        if self.stream.is_none() {
            return Err(PlaybackError::Device("Output stream closed".to_string()));
        }
        self.buffer.lock().extend_from_slice(samples);
        Ok(())
    }

    fn buffered_ms(&self) -> u64 {
        self.format.duration_ms(self.buffer.lock().len())
    }

    fn halt(&mut self) {
        let dropped = {
            let mut buf = self.buffer.lock();
            let len = buf.len();
            buf.clear();
            len
        };
        if dropped > 0 {
            debug!(dropped, "Cleared output buffer");
        }
    }

    fn format(&self) -> AudioFormat {
        self.format
    }
}

impl Drop for CpalAudioSink {
    fn drop(&mut self) {
        self.buffer.lock().clear();
        if let Some(SendableStream(stream)) = self.stream.take() {
            drop(stream);
            info!("Speaker output stopped");
        }
    }
}
