use crate::device::get_or_default_output;
use crate::stream::StreamThread;
use anyhow::Context;
use cpal::traits::{DeviceTrait, StreamTrait};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

struct Voice {
    id: u64,
    start_frame: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// A sample-accurate playback clock with mono voices scheduled at absolute frames.
///
/// The clock only advances when `render` is called, so it doubles as the output
/// device's notion of "now".
pub struct Timeline {
    sample_rate: u32,
    frame: u64,
    voices: Vec<Voice>,
}

impl Timeline {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frame: 0,
            voices: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frames rendered so far.
    pub fn position(&self) -> u64 {
        self.frame
    }

    pub fn now(&self) -> Duration {
        self.time_at(self.frame)
    }

    fn time_at(&self, frame: u64) -> Duration {
        let rate = u64::from(self.sample_rate.max(1));
        let nanos = (frame % rate) * 1_000_000_000 / rate;
        Duration::new(frame / rate, nanos as u32)
    }

    /// Number of voices that have not finished playing.
    pub fn active(&self) -> usize {
        self.voices.len()
    }

    /// Schedules `samples` to start at `at`. A start time in the past plays immediately.
    pub fn schedule(&mut self, id: u64, samples: Vec<f32>, at: Duration) {
        let start_frame = (at.as_secs_f64() * self.sample_rate as f64).round() as u64;
        self.voices.push(Voice {
            id,
            start_frame: start_frame.max(self.frame),
            samples,
        });
    }

    /// Stops a voice immediately. Returns false if it already finished.
    pub fn cancel(&mut self, id: u64) -> bool {
        let before = self.voices.len();
        self.voices.retain(|voice| voice.id != id);
        self.voices.len() != before
    }

    /// Mixes every voice that overlaps the next `out.len() / channels` frames into
    /// `out`, copying the mono mix to all channels, and advances the clock.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        for (offset, frame) in out.chunks_mut(channels).enumerate() {
            let position = self.frame + offset as u64;
            let sample = self
                .voices
                .iter()
                .filter(|voice| voice.start_frame <= position && position < voice.end_frame())
                .map(|voice| voice.samples[(position - voice.start_frame) as usize])
                .sum::<f32>()
                .clamp(-1.0, 1.0);
            frame.fill(sample);
        }
        self.advance(out.len().div_ceil(channels) as u64);
    }

    /// Moves the clock forward without rendering, as if `frames` of output had
    /// been played.
    pub fn advance(&mut self, frames: u64) {
        self.frame += frames;
        let now = self.frame;
        self.voices.retain(|voice| voice.end_frame() > now);
    }
}

/// Shared handle to a [`Timeline`] that the audio callback renders from.
///
/// The callback never blocks: when the timeline is locked elsewhere it plays
/// silence and counts the frames, which are added to the clock on the next
/// render.
#[derive(Clone)]
pub struct PlaybackClock {
    timeline: Arc<Mutex<Timeline>>,
    missed: Arc<AtomicU64>,
}

impl PlaybackClock {
    pub fn new(timeline: Timeline) -> Self {
        Self {
            timeline: Arc::new(Mutex::new(timeline)),
            missed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Fills one device buffer. Called from the audio thread.
    pub fn render(&self, out: &mut [f32], channels: usize) {
        match self.timeline.try_lock() {
            Ok(mut timeline) => {
                timeline.advance(self.missed.swap(0, Ordering::AcqRel));
                timeline.render(out, channels);
            }
            Err(_) => {
                out.fill(0.0);
                let frames = out.len().div_ceil(channels.max(1)) as u64;
                self.missed.fetch_add(frames, Ordering::AcqRel);
            }
        }
    }

    /// Playback position, counting frames played while the timeline was busy.
    pub fn now(&self) -> Duration {
        let timeline = match self.timeline.lock() {
            Ok(timeline) => timeline,
            Err(poisoned) => poisoned.into_inner(),
        };
        timeline.time_at(timeline.position() + self.missed.load(Ordering::Acquire))
    }

    pub fn schedule(&self, id: u64, samples: Vec<f32>, at: Duration) {
        match self.timeline.lock() {
            Ok(mut timeline) => timeline.schedule(id, samples, at),
            Err(_) => tracing::error!("playback timeline poisoned, dropping segment {}", id),
        }
    }

    pub fn cancel(&self, id: u64) {
        if let Ok(mut timeline) = self.timeline.lock() {
            timeline.cancel(id);
        }
    }
}

/// An output device stream that plays whatever is scheduled on its [`Timeline`].
pub struct ScheduledOutput {
    clock: PlaybackClock,
    sample_rate: u32,
    stream: StreamThread,
}

impl ScheduledOutput {
    /// Opens the named (or default) output device and starts rendering silence.
    pub fn start(device_name: Option<String>) -> anyhow::Result<Self> {
        let (stream, (clock, sample_rate)) = StreamThread::spawn("voicenav-playback", move || {
            let (stream, clock, sample_rate) = build_output_stream(device_name)?;
            Ok((stream, (clock, sample_rate)))
        })?;

        Ok(Self {
            clock,
            sample_rate,
            stream,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    pub fn schedule(&self, id: u64, samples: Vec<f32>, at: Duration) {
        self.clock.schedule(id, samples, at);
    }

    pub fn cancel(&self, id: u64) {
        self.clock.cancel(id);
    }

    /// Signals the stream to stop. See [`StreamThread::stop`].
    pub fn stop(&mut self) -> Option<JoinHandle<()>> {
        self.stream.stop()
    }
}

fn build_output_stream(
    device_name: Option<String>,
) -> anyhow::Result<(cpal::Stream, PlaybackClock, u32)> {
    let output = get_or_default_output(device_name)?;
    tracing::info!("Using output device: {:?}", output.name()?);

    let output_config = output
        .default_output_config()
        .context("Failed to get default output config")?;
    let output_config = cpal::StreamConfig {
        channels: output_config.channels(),
        sample_rate: output_config.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };
    let channel_count = output_config.channels as usize;
    let sample_rate = output_config.sample_rate.0;
    tracing::info!("Output stream config: {:?}", &output_config);

    let clock = PlaybackClock::new(Timeline::new(sample_rate));
    let render_clock = clock.clone();
    let output_data_fn = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        render_clock.render(data, channel_count);
    };

    let stream = output
        .build_output_stream(
            &output_config,
            output_data_fn,
            move |err| tracing::error!("An error occurred on output stream: {}", err),
            None,
        )
        .context("Failed to build output stream")?;
    stream.play().context("Failed to start output stream")?;

    Ok((stream, clock, sample_rate))
}
