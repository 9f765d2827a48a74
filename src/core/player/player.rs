//! Interruptible response playback queue.

use std::collections::VecDeque;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use super::PlaybackError;
use super::sink::AudioSink;

/// Default amount of audio kept in the sink ahead of the play head.
pub const DEFAULT_LEAD_MS: u64 = 300;

/// Decode PCM 16-bit signed little-endian bytes into normalized samples.
pub fn decode_pcm16(data: &[u8]) -> Result<Vec<f32>, PlaybackError> {
    if data.is_empty() {
        return Err(PlaybackError::Decode("empty audio payload".to_string()));
    }
    if data.len() % 2 != 0 {
        return Err(PlaybackError::Decode(format!(
            "odd PCM16 payload length {}",
            data.len()
        )));
    }

    Ok(data
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / i16::MAX as f32)
        .collect())
}

/// Handler invoked once a completed stream has fully played out.
pub type DrainedHandler = Box<dyn FnMut(Option<&str>) + Send>;

/// Decoded chunks for one assistant turn.
#[derive(Debug)]
pub struct ResponseStream {
    response_id: Option<String>,
    queue: VecDeque<Vec<f32>>,
    /// Chunks handed to the sink
    cursor: usize,
    /// Chunks accepted into the queue
    received: usize,
    complete: bool,
}

impl ResponseStream {
    fn new(response_id: Option<String>) -> Self {
        Self {
            response_id,
            queue: VecDeque::new(),
            cursor: 0,
            received: 0,
            complete: false,
        }
    }

    pub fn response_id(&self) -> Option<&str> {
        self.response_id.as_deref()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn received(&self) -> usize {
        self.received
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }
}

/// Counters kept by the player.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayerStats {
    pub streams: u64,
    pub chunks_played: u64,
    pub chunks_skipped: u64,
    pub stops: u64,
}

/// Plays streamed response audio in strict order and can be cut off at any
/// moment.
pub struct ResponsePlayer {
    sink: Box<dyn AudioSink>,
    lead_ms: u64,
    stream: Option<ResponseStream>,
    on_drained: Option<DrainedHandler>,
    stats: PlayerStats,
}

impl ResponsePlayer {
    pub fn new(sink: Box<dyn AudioSink>, lead_ms: u64) -> Self {
        Self {
            sink,
            lead_ms,
            stream: None,
            on_drained: None,
            stats: PlayerStats::default(),
        }
    }

    /// Register the handler fired when a finished stream has played out.
    pub fn on_drained(&mut self, handler: DrainedHandler) {
        self.on_drained = Some(handler);
    }

    /// Start a new stream, replacing any current one.
    pub fn begin(&mut self, response_id: Option<String>) {
        if let Some(previous) = self.stream.as_ref() {
            debug!(
                "Replacing response stream {:?} ({} chunks queued)",
                previous.response_id,
                previous.queue.len()
            );
        }
        self.stream = Some(ResponseStream::new(response_id));
        self.stats.streams += 1;
    }

    /// Start a new stream that plays after whatever the current one still
    /// has queued. The previous stream never reports drained.
    pub fn chain(&mut self, response_id: Option<String>) {
        let carried = self.stream.take().map(|s| s.queue).unwrap_or_default();
        let mut stream = ResponseStream::new(response_id);
        stream.queue = carried;
        self.stream = Some(stream);
        self.stats.streams += 1;
    }

    /// Decode and queue one chunk. A chunk that fails to decode is skipped;
    /// the stream carries on with the next one.
    pub fn enqueue(&mut self, data: &Bytes) -> Result<(), PlaybackError> {
        let samples = match decode_pcm16(data) {
            Ok(samples) => samples,
            Err(e) => {
                self.stats.chunks_skipped += 1;
                warn!("Skipping response chunk: {}", e);
                return Err(e);
            }
        };

        if self.stream.is_none() {
            self.begin(None);
        }
        if let Some(stream) = self.stream.as_mut() {
            stream.queue.push_back(samples);
            stream.received += 1;
        }
        Ok(())
    }

    /// Move queued chunks into the sink while it holds less than the lead.
    /// Returns the number of chunks handed over.
    pub fn pump(&mut self) -> usize {
        let mut moved = 0;

        while self.sink.buffered_ms() < self.lead_ms {
            let Some(samples) = self.stream.as_mut().and_then(|s| s.queue.pop_front()) else {
                break;
            };

            match self.sink.write(&samples) {
                Ok(()) => {
                    self.stats.chunks_played += 1;
                    moved += 1;
                }
                Err(e) => {
                    self.stats.chunks_skipped += 1;
                    warn!("Failed to write response chunk to output: {}", e);
                }
            }
            if let Some(stream) = self.stream.as_mut() {
                stream.cursor += 1;
            }
        }

        if moved > 0 {
            trace!(moved, queued = self.queue_len(), "Pumped response audio");
        }
        self.check_drained();
        moved
    }

    /// No more chunks will arrive for the current stream.
    pub fn finish(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            stream.complete = true;
        }
        self.check_drained();
    }

    /// Hard stop: silence output and drop the queue. Safe to call at any time,
    /// any number of times.
    pub fn stop(&mut self) {
        let had_stream = self.stream.take().is_some();
        self.sink.halt();
        if had_stream {
            self.stats.stops += 1;
            debug!("Response playback stopped");
        }
    }

    /// Whether a stream is queued or playing.
    pub fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    /// Chunks waiting to be handed to the sink.
    pub fn queue_len(&self) -> usize {
        self.stream.as_ref().map(|s| s.queue.len()).unwrap_or(0)
    }

    pub fn stream(&self) -> Option<&ResponseStream> {
        self.stream.as_ref()
    }

    pub fn response_id(&self) -> Option<&str> {
        self.stream.as_ref().and_then(|s| s.response_id())
    }

    pub fn stats(&self) -> PlayerStats {
        self.stats
    }

    fn check_drained(&mut self) {
        let drained = self
            .stream
            .as_ref()
            .is_some_and(|s| s.complete && s.queue.is_empty())
            && self.sink.buffered_ms() == 0;
        if !drained {
            return;
        }

        if let Some(stream) = self.stream.take() {
            debug!(
                "Response stream {:?} drained after {} chunks",
                stream.response_id, stream.cursor
            );
            if let Some(handler) = self.on_drained.as_mut() {
                handler(stream.response_id.as_deref());
            }
        }
    }
}
