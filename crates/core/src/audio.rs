//! Audio values exchanged with the session and the device seams the coordinator
//! drives. Concrete devices live outside this crate.

use crate::error::CaptureError;
use async_trait::async_trait;
use std::time::Duration;

/// Sample rate of audio streamed to the hosted service.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;
/// Sample rate of audio the hosted service streams back, unless it says otherwise.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// One tick of outbound audio: PCM16 little-endian mono bytes plus their rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    data: Vec<u8>,
    sample_rate: u32,
}

impl AudioFrame {
    pub fn new(data: Vec<u8>, sample_rate: u32) -> Self {
        Self { data, sample_rate }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The encoding tag sent alongside the bytes.
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Inbound audio exactly as received: base64 PCM16 at `sample_rate`.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedAudio {
    pub data: String,
    pub sample_rate: u32,
}

impl EncodedAudio {
    pub fn new(data: String, sample_rate: u32) -> Self {
        Self { data, sample_rate }
    }
}

/// Decoded, playable mono audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSegment {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioSegment {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn empty(sample_rate: u32) -> Self {
        Self::new(Vec::new(), sample_rate)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        frames_to_duration(self.samples.len() as u64, self.sample_rate)
    }
}

/// Exact playback time of `frames` samples at `sample_rate`.
pub fn frames_to_duration(frames: u64, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let rate = u64::from(sample_rate);
    let nanos = (frames % rate) * 1_000_000_000 / rate;
    Duration::new(frames / rate, nanos as u32)
}

/// An open microphone stream.
pub trait CaptureStream: Send {
    fn sample_rate(&self) -> u32;

    /// Returns every sample captured since the previous call, mono f32 in [-1, 1].
    fn take_samples(&mut self) -> Vec<f32>;

    /// Stops capturing and releases the device.
    fn release(&mut self);
}

/// Grants access to the microphone.
#[async_trait]
pub trait Microphone: Send + Sync {
    async fn open(&self) -> Result<Box<dyn CaptureStream>, CaptureError>;
}

/// Owns a capture stream and releases it exactly once, on `release` or on drop.
pub struct CaptureGuard {
    stream: Option<Box<dyn CaptureStream>>,
}

impl CaptureGuard {
    pub fn new(stream: Box<dyn CaptureStream>) -> Self {
        Self {
            stream: Some(stream),
        }
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.stream.as_ref().map(|stream| stream.sample_rate())
    }

    pub fn take_samples(&mut self) -> Vec<f32> {
        self.stream
            .as_mut()
            .map(|stream| stream.take_samples())
            .unwrap_or_default()
    }

    pub fn is_released(&self) -> bool {
        self.stream.is_none()
    }

    pub fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.release();
            tracing::debug!("microphone released");
        }
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Identifies one scheduled segment on an [`AudioOutput`].
pub type SegmentId = u64;

/// A playback device with its own monotonic clock.
pub trait AudioOutput: Send {
    fn sample_rate(&self) -> u32;

    /// The device clock. Start times passed to `start` are on this clock.
    fn now(&self) -> Duration;

    /// Plays `segment` beginning at `at`.
    fn start(&mut self, id: SegmentId, segment: AudioSegment, at: Duration);

    /// Stops a segment immediately, whether or not it has begun.
    fn stop(&mut self, id: SegmentId);

    /// Closes the device. Called once during teardown.
    fn release(&mut self) {}
}

/// Opens the playback device for a session.
#[async_trait]
pub trait Speaker: Send + Sync {
    async fn open(&self) -> Result<Box<dyn AudioOutput>, CaptureError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStream {
        releases: Arc<AtomicUsize>,
    }

    impl CaptureStream for CountingStream {
        fn sample_rate(&self) -> u32 {
            INPUT_SAMPLE_RATE
        }

        fn take_samples(&mut self) -> Vec<f32> {
            vec![0.5]
        }

        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_capture_guard_releases_once() {
        let releases = Arc::new(AtomicUsize::new(0));
        let mut guard = CaptureGuard::new(Box::new(CountingStream {
            releases: releases.clone(),
        }));

        assert_eq!(guard.take_samples(), vec![0.5]);
        guard.release();
        guard.release();
        assert!(guard.is_released());
        assert!(guard.take_samples().is_empty());
        drop(guard);

        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_capture_guard_releases_on_drop() {
        let releases = Arc::new(AtomicUsize::new(0));
        {
            let _guard = CaptureGuard::new(Box::new(CountingStream {
                releases: releases.clone(),
            }));
        }
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_segment_duration_and_frame_mime_type() {
        let segment = AudioSegment::new(vec![0.0; 12_000], OUTPUT_SAMPLE_RATE);
        assert_eq!(segment.duration(), Duration::from_millis(500));
        assert_eq!(AudioSegment::empty(0).duration(), Duration::ZERO);

        let frame = AudioFrame::new(vec![0, 0], INPUT_SAMPLE_RATE);
        assert_eq!(frame.mime_type(), "audio/pcm;rate=16000");
    }
}
