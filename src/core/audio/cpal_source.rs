//! Microphone capture through the system audio host (`cpal`).

use std::time::Instant;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::base::{
    AudioConstraints, AudioFormat, AudioFrame, AudioSource, AudioSourceError,
    FRAME_CHANNEL_CAPACITY, FrameReceiver,
};

/// List the names of available input devices.
pub fn list_input_devices() -> Result<Vec<String>, AudioSourceError> {
    let host = cpal::default_host();
    let devices = host.input_devices().map_err(|e| {
        AudioSourceError::DeviceUnavailable(format!("Failed to enumerate input devices: {e}"))
    })?;

    Ok(devices.filter_map(|device| device.name().ok()).collect())
}

fn find_device(name: Option<&str>) -> Result<cpal::Device, AudioSourceError> {
    let host = cpal::default_host();

    match name {
        Some(name) => {
            let devices = host.input_devices().map_err(|e| {
                AudioSourceError::DeviceUnavailable(format!("Failed to enumerate devices: {e}"))
            })?;
            devices
                .into_iter()
                .find(|device| device.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| {
                    AudioSourceError::DeviceUnavailable(format!("Input device '{name}' not found"))
                })
        }
        None => host.default_input_device().ok_or_else(|| {
            AudioSourceError::DeviceUnavailable("No default input device".to_string())
        }),
    }
}

/// Map a stream build failure onto the capture error taxonomy.
fn classify_build_error(err: cpal::BuildStreamError) -> AudioSourceError {
    let message = err.to_string();
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not allowed") {
        AudioSourceError::PermissionDenied(message)
    } else {
        AudioSourceError::DeviceUnavailable(message)
    }
}

/// Accumulates callback buffers into fixed-size frames.
struct FrameAssembler {
    format: AudioFormat,
    frame_len: usize,
    buffer: Vec<f32>,
    opened_at: Instant,
    tx: mpsc::Sender<AudioFrame>,
}

impl FrameAssembler {
    fn push(&mut self, data: impl Iterator<Item = f32>) {
        for sample in data {
            self.buffer.push(sample);
            if self.buffer.len() == self.frame_len {
                let samples = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.frame_len));
                let frame_ms = self.format.duration_ms(samples.len());
                let captured_at_ms =
                    (self.opened_at.elapsed().as_millis() as u64).saturating_sub(frame_ms);
                // The callback must never block; a full channel drops the frame.
                if self.tx.try_send(AudioFrame::new(samples, self.format, captured_at_ms)).is_err() {
                    warn!("Capture frame channel full, dropping frame");
                }
            }
        }
    }
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is created, played and dropped by the owning
/// `CpalAudioSource` only, and is never shared between threads.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Microphone capture backed by the default `cpal` host.
///
/// The stream (and with it the device) is released on `close` or drop.
pub struct CpalAudioSource {
    device_name: Option<String>,
    stream: Option<SendableStream>,
    format: Option<AudioFormat>,
}

impl CpalAudioSource {
    /// Create a source for the named device, or the system default.
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            stream: None,
            format: None,
        }
    }

    fn build_stream(
        device: &cpal::Device,
        constraints: &AudioConstraints,
        tx: mpsc::Sender<AudioFrame>,
    ) -> Result<cpal::Stream, AudioSourceError> {
        let format = constraints.format();
        let config = cpal::StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let frame_len = format.samples_for_ms(constraints.frame_ms).max(1);
        let opened_at = Instant::now();

        let err_callback = |err| {
            warn!("Audio input stream error: {}", err);
        };

        // Try f32 first, then i16 with conversion
        let mut assembler = FrameAssembler {
            format,
            frame_len,
            buffer: Vec::with_capacity(frame_len),
            opened_at,
            tx: tx.clone(),
        };
        let f32_result = device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                assembler.push(data.iter().copied());
            },
            err_callback,
            None,
        );

        let first_err = match f32_result {
            Ok(stream) => return Ok(stream),
            Err(e) => e,
        };
        debug!("f32 input stream unavailable ({}), trying i16", first_err);

        let mut assembler = FrameAssembler {
            format,
            frame_len,
            buffer: Vec::with_capacity(frame_len),
            opened_at,
            tx,
        };
        device
            .build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    assembler.push(data.iter().map(|&s| s as f32 / i16::MAX as f32));
                },
                err_callback,
                None,
            )
            .map_err(|_| classify_build_error(first_err))
    }
}

impl AudioSource for CpalAudioSource {
    fn open(&mut self, constraints: &AudioConstraints) -> Result<FrameReceiver, AudioSourceError> {
        if self.stream.is_some() {
            return Err(AudioSourceError::AlreadyOpen);
        }

        let requested = constraints.device.as_deref().or(self.device_name.as_deref());
        let device = find_device(requested)?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let stream = Self::build_stream(&device, constraints, tx)?;
        stream.play().map_err(|e| {
            let message = format!("Failed to start input stream: {e}");
            if message.to_lowercase().contains("permission") {
                AudioSourceError::PermissionDenied(message)
            } else {
                AudioSourceError::DeviceUnavailable(message)
            }
        })?;

        self.stream = Some(SendableStream(stream));
        self.format = Some(constraints.format());

        info!(
            device = %device_name,
            format = %constraints.format(),
            frame_ms = constraints.frame_ms,
            "Microphone capture started"
        );
        Ok(rx)
    }

    fn close(&mut self) {
        if let Some(SendableStream(stream)) = self.stream.take() {
            if let Err(e) = stream.pause() {
                debug!("Failed to pause input stream: {}", e);
            }
            drop(stream);
            self.format = None;
            info!("Microphone capture stopped");
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn format(&self) -> Option<AudioFormat> {
        self.format
    }
}

impl Drop for CpalAudioSource {
    fn drop(&mut self) {
        self.close();
    }
}
