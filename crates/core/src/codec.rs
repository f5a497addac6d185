//! PCM16 codec between captured/played f32 samples and the byte stream the
//! hosted service speaks.
//!
//! The one-shot [`encode`] and [`decode`] treat their input as a complete
//! signal. An open session streams instead: [`FrameEncoder`] and
//! [`SegmentDecoder`] keep one resampler per direction and carry the samples it
//! has not consumed yet into the next call, so chunk boundaries stay seamless.

use crate::audio::{AudioFrame, AudioSegment, EncodedAudio, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use crate::error::CodecError;
use base64::Engine;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Input fed to the resampler per call, in milliseconds.
const CHUNK_MILLIS: u32 = 10;
const MIN_CHUNK_SIZE: usize = 64;
/// Copies of the first sample fed ahead of a stream, so the interpolator never
/// reaches back into silence.
const LEAD_IN: usize = 16;

/// Encodes mono samples captured at `source_rate` into a PCM16 LE frame at
/// [`INPUT_SAMPLE_RATE`]. Samples are clamped to [-1, 1] before scaling.
pub fn encode(samples: &[f32], source_rate: u32) -> Result<AudioFrame, CodecError> {
    validate_capture(samples, source_rate)?;
    let resampled = resample(samples, source_rate, INPUT_SAMPLE_RATE)
        .map_err(CodecError::InvalidInput)?;
    Ok(to_frame(&resampled))
}

/// Decodes PCM16 LE bytes produced at [`OUTPUT_SAMPLE_RATE`] into a segment at `target_rate`.
pub fn decode(bytes: &[u8], target_rate: u32) -> Result<AudioSegment, CodecError> {
    decode_at(bytes, OUTPUT_SAMPLE_RATE, target_rate)
}

/// Decodes PCM16 LE bytes produced at `source_rate` into a segment at `target_rate`.
/// Empty input yields an empty segment.
pub fn decode_at(bytes: &[u8], source_rate: u32, target_rate: u32) -> Result<AudioSegment, CodecError> {
    if source_rate == 0 || target_rate == 0 {
        return Err(CodecError::Decode("sample rate is zero".to_string()));
    }
    let samples = pcm16_samples(bytes)?;
    let samples = resample(&samples, source_rate, target_rate).map_err(CodecError::Decode)?;
    Ok(AudioSegment::new(samples, target_rate))
}

/// Decodes an inbound audio delta on its own: base64, then PCM16 at the delta's
/// own rate.
pub fn decode_delta(audio: &EncodedAudio, target_rate: u32) -> Result<AudioSegment, CodecError> {
    decode_at(&base64_bytes(audio)?, audio.sample_rate, target_rate)
}

/// Base64 form of a frame's bytes, as carried on the wire.
pub fn to_base64(frame: &AudioFrame) -> String {
    base64::engine::general_purpose::STANDARD.encode(frame.data())
}

/// Outbound half of a session's codec.
#[derive(Default)]
pub struct FrameEncoder {
    resampler: Option<StreamResampler>,
}

impl FrameEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes one tick of captured audio. Samples still inside the resampler
    /// come out with the next tick, so a frame can be shorter than its input or
    /// empty.
    pub fn encode(&mut self, samples: &[f32], source_rate: u32) -> Result<AudioFrame, CodecError> {
        validate_capture(samples, source_rate)?;
        let resampler = match self.resampler.take() {
            Some(resampler) if resampler.source_rate() == source_rate => self.resampler.insert(resampler),
            _ => self.resampler.insert(
                StreamResampler::new(source_rate, INPUT_SAMPLE_RATE).map_err(CodecError::InvalidInput)?,
            ),
        };
        let resampled = resampler.process(samples).map_err(CodecError::InvalidInput)?;
        Ok(to_frame(&resampled))
    }
}

/// Inbound half of a session's codec. Consecutive deltas of one model turn are
/// resampled as one continuous signal.
pub struct SegmentDecoder {
    target_rate: u32,
    resampler: Option<StreamResampler>,
}

impl SegmentDecoder {
    pub fn new(target_rate: u32) -> Self {
        Self {
            target_rate,
            resampler: None,
        }
    }

    /// Decodes one delta. Its last few samples are held back until the next
    /// delta or [`finish`](Self::finish).
    pub fn decode(&mut self, audio: &EncodedAudio) -> Result<AudioSegment, CodecError> {
        if audio.sample_rate == 0 || self.target_rate == 0 {
            return Err(CodecError::Decode("sample rate is zero".to_string()));
        }
        let samples = pcm16_samples(&base64_bytes(audio)?)?;

        let mut out = Vec::new();
        let resampler = match self.resampler.take() {
            Some(resampler) if resampler.source_rate() == audio.sample_rate => {
                self.resampler.insert(resampler)
            }
            previous => {
                // The service switched rates mid-turn; finish the old stream first.
                if let Some(mut previous) = previous {
                    out = previous.flush().map_err(CodecError::Decode)?;
                }
                self.resampler.insert(
                    StreamResampler::new(audio.sample_rate, self.target_rate)
                        .map_err(CodecError::Decode)?,
                )
            }
        };
        out.extend(resampler.process(&samples).map_err(CodecError::Decode)?);
        Ok(AudioSegment::new(out, self.target_rate))
    }

    /// Releases the samples held back at the end of a turn.
    pub fn finish(&mut self) -> Result<AudioSegment, CodecError> {
        let samples = match self.resampler.as_mut() {
            Some(resampler) => resampler.flush().map_err(CodecError::Decode)?,
            None => Vec::new(),
        };
        Ok(AudioSegment::new(samples, self.target_rate))
    }

    /// Drops held-back samples without playing them.
    pub fn reset(&mut self) {
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }
}

/// A mono resampler fed in arbitrary slices.
///
/// Input is buffered until a whole chunk is available. The resampler's own
/// delay is skipped at the start of a stream, and [`flush`](Self::flush) pads
/// the tail with its last sample until every input sample has come out.
pub struct StreamResampler {
    source_rate: u32,
    ratio: f64,
    chunk_size: usize,
    inner: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
    started: bool,
    skip: usize,
    fed: u64,
    emitted: u64,
    last: f32,
}

impl StreamResampler {
    pub fn new(source_rate: u32, target_rate: u32) -> Result<Self, String> {
        if source_rate == 0 || target_rate == 0 {
            return Err("sample rate is zero".to_string());
        }
        let ratio = target_rate as f64 / source_rate as f64;
        let chunk_size = ((source_rate * CHUNK_MILLIS / 1000) as usize).max(MIN_CHUNK_SIZE);
        let inner = if source_rate == target_rate {
            None
        } else {
            let resampler =
                FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, chunk_size, 1)
                    .map_err(|e| format!("failed to create resampler: {}", e))?;
            Some(resampler)
        };

        Ok(Self {
            source_rate,
            ratio,
            chunk_size,
            inner,
            pending: Vec::with_capacity(chunk_size * 2),
            started: false,
            skip: 0,
            fed: 0,
            emitted: 0,
            last: 0.0,
        })
    }

    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    /// Resamples as many whole chunks as are buffered and keeps the rest.
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>, String> {
        let Some(resampler) = self.inner.as_mut() else {
            return Ok(samples.to_vec());
        };
        let (Some(&first), Some(&last)) = (samples.first(), samples.last()) else {
            return Ok(Vec::new());
        };
        if !self.started {
            self.pending.resize(LEAD_IN, first);
            self.skip = resampler.output_delay() + (LEAD_IN as f64 * self.ratio).round() as usize;
            self.started = true;
        }
        self.pending.extend_from_slice(samples);
        self.fed += samples.len() as u64;
        self.last = last;

        let mut out = Vec::new();
        let mut consumed = 0;
        while self.pending.len() - consumed >= self.chunk_size {
            let chunk = &self.pending[consumed..consumed + self.chunk_size];
            run_chunk(resampler, chunk, &mut self.skip, &mut out)?;
            consumed += self.chunk_size;
        }
        self.pending.drain(..consumed);
        self.emitted += out.len() as u64;
        Ok(out)
    }

    /// Ends the stream: everything fed so far comes out, exactly
    /// `fed * ratio` samples in total. The resampler is then ready for a new
    /// stream.
    pub fn flush(&mut self) -> Result<Vec<f32>, String> {
        let Some(resampler) = self.inner.as_mut() else {
            return Ok(Vec::new());
        };
        if !self.started {
            return Ok(Vec::new());
        }

        let target = (self.fed as f64 * self.ratio).round() as u64;
        let mut out = Vec::new();
        let mut chunk = std::mem::take(&mut self.pending);
        while self.emitted + (out.len() as u64) < target {
            chunk.resize(self.chunk_size, self.last);
            run_chunk(resampler, &chunk, &mut self.skip, &mut out)?;
            chunk.clear();
        }
        out.truncate(target.saturating_sub(self.emitted) as usize);
        self.reset();
        Ok(out)
    }

    /// Forgets buffered input and the interpolator's history.
    pub fn reset(&mut self) {
        if let Some(resampler) = self.inner.as_mut() {
            resampler.reset();
        }
        self.pending.clear();
        self.started = false;
        self.skip = 0;
        self.fed = 0;
        self.emitted = 0;
        self.last = 0.0;
    }
}

fn run_chunk(
    resampler: &mut FastFixedIn<f32>,
    chunk: &[f32],
    skip: &mut usize,
    out: &mut Vec<f32>,
) -> Result<(), String> {
    let output = resampler
        .process(&[chunk], None)
        .map_err(|e| format!("failed to resample: {}", e))?;
    if let Some(channel) = output.first() {
        let skipped = (*skip).min(channel.len());
        *skip -= skipped;
        out.extend_from_slice(&channel[skipped..]);
    }
    Ok(())
}

/// Resamples a complete signal in one go.
fn resample(samples: &[f32], from: u32, to: u32) -> Result<Vec<f32>, String> {
    if from == to || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    let mut resampler = StreamResampler::new(from, to)?;
    let mut out = resampler.process(samples)?;
    out.extend(resampler.flush()?);
    Ok(out)
}

fn validate_capture(samples: &[f32], source_rate: u32) -> Result<(), CodecError> {
    if source_rate == 0 {
        return Err(CodecError::InvalidInput("source sample rate is zero".to_string()));
    }
    if let Some(index) = samples.iter().position(|s| !s.is_finite()) {
        return Err(CodecError::InvalidInput(format!(
            "sample {} is not a finite number",
            index
        )));
    }
    Ok(())
}

fn base64_bytes(audio: &EncodedAudio) -> Result<Vec<u8>, CodecError> {
    base64::engine::general_purpose::STANDARD
        .decode(audio.data.as_bytes())
        .map_err(|e| CodecError::Decode(format!("invalid base64: {}", e)))
}

fn pcm16_samples(bytes: &[u8]) -> Result<Vec<f32>, CodecError> {
    if bytes.len() % 2 != 0 {
        return Err(CodecError::Decode(format!(
            "truncated PCM16 stream of {} bytes",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / 32768.0)
        .collect())
}

fn to_frame(samples: &[f32]) -> AudioFrame {
    let data = samples
        .iter()
        .flat_map(|&sample| to_i16(sample).to_le_bytes())
        .collect();
    AudioFrame::new(data, INPUT_SAMPLE_RATE)
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUANTUM: f32 = 1.0 / 32768.0;

    fn pcm16(samples: &[f32]) -> Vec<u8> {
        samples
            .iter()
            .flat_map(|&sample| to_i16(sample).to_le_bytes())
            .collect()
    }

    fn delta(samples: &[f32], sample_rate: u32) -> EncodedAudio {
        let bytes = pcm16(samples);
        EncodedAudio::new(base64::engine::general_purpose::STANDARD.encode(bytes), sample_rate)
    }

    fn frame_samples(frame: &AudioFrame) -> Vec<i16> {
        frame
            .data()
            .chunks_exact(2)
            .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
            .collect()
    }

    fn worst_deviation(samples: &[f32], expected: f32) -> f32 {
        samples
            .iter()
            .map(|sample| (sample - expected).abs())
            .fold(0.0, f32::max)
    }

    #[test]
    fn test_decode_reconstructs_encoded_samples() {
        let samples: Vec<f32> = (0..2000)
            .map(|i| ((i as f32) * 0.013).sin() * 0.9)
            .chain([1.0, -1.0, 0.0, 0.999_99, -0.999_99])
            .collect();

        let frame = encode(&samples, INPUT_SAMPLE_RATE).unwrap();
        assert_eq!(frame.data().len(), samples.len() * 2);

        let segment = decode_at(frame.data(), INPUT_SAMPLE_RATE, INPUT_SAMPLE_RATE).unwrap();
        assert_eq!(segment.len(), samples.len());
        for (original, decoded) in samples.iter().zip(segment.samples()) {
            assert!(
                (original - decoded).abs() <= QUANTUM + f32::EPSILON,
                "{} decoded as {}",
                original,
                decoded
            );
        }
    }

    #[test]
    fn test_decode_keeps_segment_edges_across_rates() {
        let bytes = pcm16(&[0.5; 960]);

        let segment = decode(&bytes, 48_000).unwrap();

        assert_eq!(segment.len(), 1920);
        let worst = worst_deviation(segment.samples(), 0.5);
        assert!(worst < 1e-3, "head {:?}, worst deviation {}", &segment.samples()[..6], worst);
    }

    #[test]
    fn test_encode_keeps_frame_edges_across_rates() {
        let frame = encode(&[0.5; 4800], 48_000).unwrap();

        let samples = frame_samples(&frame);
        assert_eq!(samples.len(), 1600);
        assert!(
            samples.iter().all(|&s| (s - 16384).abs() <= 1),
            "head {:?}",
            &samples[..6]
        );
    }

    #[test]
    fn test_encode_clamps_out_of_range_samples() {
        let frame = encode(&[2.0, -3.5], INPUT_SAMPLE_RATE).unwrap();
        assert_eq!(frame.data().to_vec(), vec![0xffu8, 0x7f, 0x00, 0x80]);
    }

    #[test]
    fn test_encode_rejects_malformed_input() {
        assert!(matches!(
            encode(&[0.0, f32::NAN], INPUT_SAMPLE_RATE),
            Err(CodecError::InvalidInput(_))
        ));
        assert!(matches!(
            encode(&[0.0], 0),
            Err(CodecError::InvalidInput(_))
        ));
        assert!(matches!(
            FrameEncoder::new().encode(&[f32::INFINITY], 48_000),
            Err(CodecError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_encode_resamples_to_input_rate() {
        let samples = vec![0.25; 48_000];
        let frame = encode(&samples, 48_000).unwrap();
        assert_eq!(frame.sample_rate(), INPUT_SAMPLE_RATE);
        assert_eq!(frame.data().len(), 16_000 * 2);
    }

    #[test]
    fn test_decode_empty_and_truncated_input() {
        let segment = decode(&[], 48_000).unwrap();
        assert!(segment.is_empty());
        assert_eq!(segment.sample_rate(), 48_000);

        assert!(matches!(decode(&[0x00, 0x01, 0x02], 24_000), Err(CodecError::Decode(_))));
    }

    #[test]
    fn test_decode_resamples_to_target_rate() {
        let bytes: Vec<u8> = std::iter::repeat([0x00, 0x10]).take(24_000).flatten().collect();
        let segment = decode(&bytes, 48_000).unwrap();
        assert_eq!(segment.sample_rate(), 48_000);
        assert_eq!(segment.len(), 48_000);
        assert_eq!(segment.duration().as_millis(), 1000);
    }

    #[test]
    fn test_decode_delta_rejects_bad_base64() {
        let audio = EncodedAudio::new("%%%".to_string(), OUTPUT_SAMPLE_RATE);
        assert!(matches!(decode_delta(&audio, OUTPUT_SAMPLE_RATE), Err(CodecError::Decode(_))));
        assert!(matches!(
            SegmentDecoder::new(48_000).decode(&audio),
            Err(CodecError::Decode(_))
        ));

        let frame = encode(&[0.5, -0.5], INPUT_SAMPLE_RATE).unwrap();
        let audio = EncodedAudio::new(to_base64(&frame), INPUT_SAMPLE_RATE);
        let segment = decode_delta(&audio, INPUT_SAMPLE_RATE).unwrap();
        assert_eq!(segment.samples().to_vec(), vec![0.5f32, -0.5]);
    }

    #[test]
    fn test_frame_encoder_carries_samples_between_ticks() {
        let mut encoder = FrameEncoder::new();
        let mut encoded = Vec::new();
        for _ in 0..10 {
            let frame = encoder.encode(&[0.5; 4800], 48_000).unwrap();
            assert_eq!(frame.sample_rate(), INPUT_SAMPLE_RATE);
            encoded.extend(frame_samples(&frame));
        }

        // At most one chunk plus the interpolator's delay is still in flight.
        assert!(encoded.len() <= 16_000);
        assert!(encoded.len() >= 16_000 - 200, "only {} samples out", encoded.len());
        assert!(encoded.iter().all(|&s| (s - 16384).abs() <= 1));
    }

    #[test]
    fn test_segment_decoder_joins_deltas_without_clicks() {
        let tone: Vec<f32> = (0..9600)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 24_000.0).sin() * 0.5)
            .collect();
        let mut decoder = SegmentDecoder::new(48_000);

        let mut played = Vec::new();
        for part in tone.chunks(960) {
            let segment = decoder.decode(&delta(part, 24_000)).unwrap();
            assert_eq!(segment.sample_rate(), 48_000);
            played.extend_from_slice(segment.samples());
        }
        played.extend_from_slice(decoder.finish().unwrap().samples());

        assert_eq!(played.len(), 19_200);
        // A 440 Hz tone at half scale never moves more than ~0.03 between samples at 48 kHz.
        let largest_step = played
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).abs())
            .fold(0.0, f32::max);
        assert!(largest_step < 0.05, "step of {}", largest_step);
        assert!(worst_deviation(&played, 0.0) <= 0.5 + 0.01);
    }

    #[test]
    fn test_segment_decoder_finish_and_reset() {
        let mut decoder = SegmentDecoder::new(48_000);
        let first = decoder.decode(&delta(&[0.25; 960], 24_000)).unwrap();
        let tail = decoder.finish().unwrap();
        assert_eq!(first.len() + tail.len(), 1920);
        assert!(worst_deviation(tail.samples(), 0.25) < 1e-3);
        assert!(decoder.finish().unwrap().is_empty());

        decoder.decode(&delta(&[0.25; 960], 24_000)).unwrap();
        decoder.reset();
        assert!(decoder.finish().unwrap().is_empty());
    }

    #[test]
    fn test_segment_decoder_passes_matching_rate_through() {
        let mut decoder = SegmentDecoder::new(24_000);
        let segment = decoder.decode(&delta(&[0.5, -0.5, 0.25], 24_000)).unwrap();
        assert_eq!(segment.samples().to_vec(), vec![0.5f32, -0.5, 0.25]);
        assert!(decoder.finish().unwrap().is_empty());
    }
}
