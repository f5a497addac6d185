//! cpal-backed implementations of the core device traits.

use async_trait::async_trait;
use std::thread::JoinHandle;
use std::time::Duration;
use voicenav_core::audio::{
    AudioOutput, AudioSegment, CaptureStream, Microphone, SegmentId, Speaker,
};
use voicenav_core::CaptureError;
use voicenav_native_utils::capture::InputCapture;
use voicenav_native_utils::output::ScheduledOutput;

/// Opens the named input device, or the default one, for each session.
pub struct CpalMicrophone {
    device: Option<String>,
}

impl CpalMicrophone {
    pub fn new(device: Option<String>) -> Self {
        Self { device }
    }
}

#[async_trait]
impl Microphone for CpalMicrophone {
    async fn open(&self) -> Result<Box<dyn CaptureStream>, CaptureError> {
        let device = self.device.clone();
        // Device setup blocks until the capture thread reports back.
        let capture = tokio::task::spawn_blocking(move || InputCapture::start(device))
            .await
            .map_err(|e| CaptureError::Device(e.to_string()))?
            .map_err(classify)?;
        tracing::info!("Microphone open at {} Hz", capture.sample_rate());
        Ok(Box::new(CpalCapture { inner: capture }))
    }
}

struct CpalCapture {
    inner: InputCapture,
}

impl CaptureStream for CpalCapture {
    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn take_samples(&mut self) -> Vec<f32> {
        self.inner.drain()
    }

    fn release(&mut self) {
        join_stream_thread(self.inner.stop(), "capture");
    }
}

/// Opens the named output device, or the default one, for each session.
pub struct CpalSpeaker {
    device: Option<String>,
}

impl CpalSpeaker {
    pub fn new(device: Option<String>) -> Self {
        Self { device }
    }
}

#[async_trait]
impl Speaker for CpalSpeaker {
    async fn open(&self) -> Result<Box<dyn AudioOutput>, CaptureError> {
        let device = self.device.clone();
        let output = tokio::task::spawn_blocking(move || ScheduledOutput::start(device))
            .await
            .map_err(|e| CaptureError::Device(e.to_string()))?
            .map_err(classify)?;
        tracing::info!("Speaker open at {} Hz", output.sample_rate());
        Ok(Box::new(CpalOutput { inner: output }))
    }
}

struct CpalOutput {
    inner: ScheduledOutput,
}

impl AudioOutput for CpalOutput {
    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn now(&self) -> Duration {
        self.inner.now()
    }

    fn start(&mut self, id: SegmentId, segment: AudioSegment, at: Duration) {
        self.inner.schedule(id, segment.into_samples(), at);
    }

    fn stop(&mut self, id: SegmentId) {
        self.inner.cancel(id);
    }

    fn release(&mut self) {
        join_stream_thread(self.inner.stop(), "playback");
    }
}

/// Waits for a stopped device thread to finish dropping its stream. On a
/// runtime the wait moves to the blocking pool so no worker is held up.
fn join_stream_thread(thread: Option<JoinHandle<()>>, label: &'static str) {
    let Some(thread) = thread else {
        return;
    };
    let join = move || {
        if thread.join().is_err() {
            tracing::warn!("{} thread panicked", label);
        }
    };
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn_blocking(join);
        }
        Err(_) => join(),
    }
}

/// Host audio APIs report a refused microphone as an ordinary backend error;
/// the message is the only signal.
fn classify(err: anyhow::Error) -> CaptureError {
    let message = format!("{:#}", err);
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("access denied") || lower.contains("not authorized") {
        CaptureError::PermissionDenied(message)
    } else {
        CaptureError::Device(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_release_does_not_wait_on_the_device_thread() {
        let (finish_tx, finish_rx) = std::sync::mpsc::channel::<()>();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let thread = std::thread::spawn(move || {
            let _ = finish_rx.recv();
            let _ = done_tx.send(());
        });

        // The thread only finishes after this returns.
        join_stream_thread(Some(thread), "test");
        finish_tx.send(()).unwrap();

        done_rx.await.unwrap();
        join_stream_thread(None, "test");
    }

    #[test]
    fn test_classify_permission_errors() {
        let denied = anyhow::anyhow!("Permission denied (os error 13)")
            .context("Failed to build input stream");
        assert!(matches!(classify(denied), CaptureError::PermissionDenied(_)));

        let missing = anyhow::anyhow!("No input device named 'USB Mic'");
        match classify(missing) {
            CaptureError::Device(message) => assert!(message.contains("USB Mic")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
