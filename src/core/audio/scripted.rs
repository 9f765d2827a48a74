//! Audio source that replays a fixed list of frames.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::base::{
    AudioConstraints, AudioFormat, AudioFrame, AudioSource, AudioSourceError,
    FRAME_CHANNEL_CAPACITY, FrameReceiver,
};

/// Failure to report from `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenFailure {
    PermissionDenied,
    DeviceUnavailable,
}

/// Replays pre-built frames as if they were captured live.
///
/// Without pacing every frame is queued as soon as the source opens. With
/// [`ScriptedAudioSource::paced`] frames are delivered at their real-time
/// cadence from a background task, which requires a tokio runtime.
pub struct ScriptedAudioSource {
    frames: Vec<AudioFrame>,
    format: AudioFormat,
    pace: Option<Duration>,
    open_failure: Option<OpenFailure>,
    is_open: bool,
    open_count: u32,
    close_count: u32,
    task: Option<JoinHandle<()>>,
}

impl ScriptedAudioSource {
    /// Create a source that replays `frames`.
    pub fn new(format: AudioFormat, frames: Vec<AudioFrame>) -> Self {
        Self {
            frames,
            format,
            pace: None,
            open_failure: None,
            is_open: false,
            open_count: 0,
            close_count: 0,
            task: None,
        }
    }

    /// Build a script out of `(level, duration_ms)` runs of constant amplitude,
    /// sliced into `frame_ms` frames with contiguous timestamps.
    pub fn from_levels(format: AudioFormat, frame_ms: u32, runs: &[(f32, u32)]) -> Self {
        let mut frames = Vec::new();
        let mut at_ms = 0u64;
        let frame_ms = frame_ms.max(1);

        for &(level, duration_ms) in runs {
            let count = duration_ms / frame_ms;
            for _ in 0..count {
                frames.push(AudioFrame::constant(level, frame_ms, format, at_ms));
                at_ms += frame_ms as u64;
            }
        }

        Self::new(format, frames)
    }

    /// Deliver frames in real time, one per `interval`.
    pub fn paced(mut self, interval: Duration) -> Self {
        self.pace = Some(interval);
        self
    }

    /// Fail `open` with `PermissionDenied`.
    pub fn with_permission_denied(mut self) -> Self {
        self.open_failure = Some(OpenFailure::PermissionDenied);
        self
    }

    /// Fail `open` with `DeviceUnavailable`.
    pub fn with_device_unavailable(mut self) -> Self {
        self.open_failure = Some(OpenFailure::DeviceUnavailable);
        self
    }

    /// Total scripted duration in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        self.frames.iter().map(AudioFrame::duration_ms).sum()
    }

    /// Number of successful `open` calls.
    pub fn open_count(&self) -> u32 {
        self.open_count
    }

    /// Number of `close` calls that actually released the source.
    pub fn close_count(&self) -> u32 {
        self.close_count
    }
}

impl AudioSource for ScriptedAudioSource {
    fn open(&mut self, _constraints: &AudioConstraints) -> Result<FrameReceiver, AudioSourceError> {
        match self.open_failure {
            Some(OpenFailure::PermissionDenied) => {
                return Err(AudioSourceError::PermissionDenied(
                    "scripted source refused access".to_string(),
                ));
            }
            Some(OpenFailure::DeviceUnavailable) => {
                return Err(AudioSourceError::DeviceUnavailable(
                    "scripted source has no device".to_string(),
                ));
            }
            None => {}
        }

        if self.is_open {
            return Err(AudioSourceError::AlreadyOpen);
        }

        let frames = self.frames.clone();
        let (task, rx) = match self.pace {
            None => {
                let (tx, rx) = mpsc::channel(frames.len().max(FRAME_CHANNEL_CAPACITY));
                for frame in frames {
                    // Capacity covers the whole script
                    let _ = tx.try_send(frame);
                }
                (None, rx)
            }
            Some(interval) => {
                let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
                let task = tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(interval);
                    for frame in frames {
                        ticker.tick().await;
                        if tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                });
                (Some(task), rx)
            }
        };

        self.task = task;
        self.is_open = true;
        self.open_count += 1;
        debug!(
            frames = self.frames.len(),
            format = %self.format,
            "Scripted audio source opened"
        );
        Ok(rx)
    }

    fn close(&mut self) {
        if !self.is_open {
            return;
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.is_open = false;
        self.close_count += 1;
        debug!("Scripted audio source closed");
    }

    fn is_open(&self) -> bool {
        self.is_open
    }

    fn format(&self) -> Option<AudioFormat> {
        self.is_open.then_some(self.format)
    }
}

impl Drop for ScriptedAudioSource {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format() -> AudioFormat {
        AudioFormat::new(16000, 1)
    }

    #[test]
    fn test_from_levels_builds_contiguous_frames() {
        let source = ScriptedAudioSource::from_levels(format(), 20, &[(0.5, 100), (0.0, 60)]);
        assert_eq!(source.frames.len(), 8);
        assert_eq!(source.frames[0].captured_at_ms, 0);
        assert_eq!(source.frames[5].captured_at_ms, 100);
        assert_eq!(source.frames[5].samples[0], 0.0);
        assert_eq!(source.duration_ms(), 160);
    }

    #[tokio::test]
    async fn test_open_delivers_all_frames() {
        let mut source = ScriptedAudioSource::from_levels(format(), 20, &[(0.5, 200)]);
        let mut rx = source.open(&AudioConstraints::default()).unwrap();

        let mut count = 0;
        while let Ok(frame) = rx.try_recv() {
            assert_eq!(frame.sample_rate, 16000);
            count += 1;
        }
        assert_eq!(count, 10);
        assert!(source.is_open());
        assert_eq!(source.format(), Some(format()));
    }

    #[test]
    fn test_open_twice_is_rejected() {
        let mut source = ScriptedAudioSource::from_levels(format(), 20, &[(0.5, 40)]);
        let _rx = source.open(&AudioConstraints::default()).unwrap();
        assert!(matches!(
            source.open(&AudioConstraints::default()),
            Err(AudioSourceError::AlreadyOpen)
        ));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut source = ScriptedAudioSource::from_levels(format(), 20, &[(0.5, 40)]);
        let _rx = source.open(&AudioConstraints::default()).unwrap();

        source.close();
        source.close();
        source.close();

        assert!(!source.is_open());
        assert_eq!(source.close_count(), 1);
        assert_eq!(source.format(), None);
    }

    #[test]
    fn test_open_failures() {
        let mut denied = ScriptedAudioSource::new(format(), vec![]).with_permission_denied();
        assert!(matches!(
            denied.open(&AudioConstraints::default()),
            Err(AudioSourceError::PermissionDenied(_))
        ));
        assert!(!denied.is_open());

        let mut missing = ScriptedAudioSource::new(format(), vec![]).with_device_unavailable();
        assert!(matches!(
            missing.open(&AudioConstraints::default()),
            Err(AudioSourceError::DeviceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_paced_delivery() {
        let mut source = ScriptedAudioSource::from_levels(format(), 20, &[(0.2, 60)])
            .paced(Duration::from_millis(1));
        let mut rx = source.open(&AudioConstraints::default()).unwrap();

        let mut received = Vec::new();
        while let Some(frame) = rx.recv().await {
            received.push(frame.captured_at_ms);
        }
        assert_eq!(received, vec![0, 20, 40]);
    }
}
