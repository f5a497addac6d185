use crate::audio::{downmix, shared_buffer};
use crate::device::get_or_default_input;
use crate::stream::StreamThread;
use anyhow::Context;
use cpal::traits::{DeviceTrait, StreamTrait};
use ringbuf::HeapCons;
use ringbuf::traits::{Consumer, Producer, Split};
use std::thread::JoinHandle;

/// Seconds of mono audio the capture buffer holds before new samples are dropped.
pub const CAPTURE_BUFFER_SECONDS: usize = 2;

/// A running microphone stream. Samples cross from the device thread through a
/// lock-free ring buffer.
pub struct InputCapture {
    consumer: HeapCons<f32>,
    sample_rate: u32,
    stream: StreamThread,
}

impl InputCapture {
    /// Opens the named (or default) input device and starts capturing mono f32 samples.
    pub fn start(device_name: Option<String>) -> anyhow::Result<Self> {
        let (stream, (consumer, sample_rate)) = StreamThread::spawn("voicenav-capture", move || {
            let (stream, consumer, sample_rate) = build_input_stream(device_name)?;
            Ok((stream, (consumer, sample_rate)))
        })?;

        Ok(Self {
            consumer,
            sample_rate,
            stream,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Takes every sample captured since the previous call.
    pub fn drain(&mut self) -> Vec<f32> {
        std::iter::from_fn(|| self.consumer.try_pop()).collect()
    }

    /// Signals the stream to stop. See [`StreamThread::stop`].
    pub fn stop(&mut self) -> Option<JoinHandle<()>> {
        self.stream.stop()
    }
}

fn build_input_stream(
    device_name: Option<String>,
) -> anyhow::Result<(cpal::Stream, HeapCons<f32>, u32)> {
    let input = get_or_default_input(device_name)?;
    tracing::info!("Using input device: {:?}", input.name()?);

    let input_config = input
        .default_input_config()
        .context("Failed to get default input config")?;
    let input_config = cpal::StreamConfig {
        channels: input_config.channels(),
        sample_rate: input_config.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };
    let channel_count = input_config.channels as usize;
    let sample_rate = input_config.sample_rate.0;
    tracing::info!("Input stream config: {:?}", &input_config);

    let buffer = shared_buffer(sample_rate as usize * CAPTURE_BUFFER_SECONDS);
    let (mut producer, consumer) = buffer.split();

    let input_data_fn = move |data: &[f32], _: &cpal::InputCallbackInfo| {
        let audio = downmix(data, channel_count);
        let pushed = producer.push_slice(&audio);
        if pushed < audio.len() {
            tracing::warn!("capture buffer full, dropped {} samples", audio.len() - pushed);
        }
    };

    let stream = input
        .build_input_stream(
            &input_config,
            input_data_fn,
            move |err| tracing::error!("An error occurred on input stream: {}", err),
            None,
        )
        .context("Failed to build input stream")?;
    stream.play().context("Failed to start input stream")?;

    Ok((stream, consumer, sample_rate))
}
