//! Decoded PCM buffers, WAV I/O and the post-processing transforms

pub mod postprocess;
pub mod resample;

pub use postprocess::{apply_speed, apply_volume, PostProcessor};

use crate::error::SpeechError;
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

/// Planar floating point PCM audio in the -1.0..=1.0 range.
///
/// Always holds at least one channel; every channel has the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Build from planar channel data
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self, SpeechError> {
        if channels.is_empty() {
            return Err(SpeechError::Audio("Audio buffer needs at least one channel".to_string()));
        }

        if sample_rate == 0 {
            return Err(SpeechError::Audio("Sample rate must be greater than 0".to_string()));
        }

        let frames = channels[0].len();
        if channels.iter().any(|c| c.len() != frames) {
            return Err(SpeechError::Audio("All channels must have the same length".to_string()));
        }

        Ok(Self { channels, sample_rate })
    }

    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            channels: vec![samples],
            sample_rate: sample_rate.max(1),
        }
    }

    /// Split interleaved frames into planar channels
    pub fn from_interleaved(samples: &[f32], channels: u16, sample_rate: u32) -> Result<Self, SpeechError> {
        let count = channels as usize;
        if count == 0 {
            return Err(SpeechError::Audio("Channel count must be greater than 0".to_string()));
        }

        if samples.len() % count != 0 {
            return Err(SpeechError::Audio(format!(
                "Interleaved sample count {} is not a multiple of {} channels",
                samples.len(),
                count
            )));
        }

        let frames = samples.len() / count;
        let mut planar = vec![Vec::with_capacity(frames); count];
        for frame in samples.chunks_exact(count) {
            for (channel, sample) in planar.iter_mut().zip(frame) {
                channel.push(*sample);
            }
        }

        Self::new(planar, sample_rate)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel
    pub fn frames(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    /// Sample for an output channel; outputs wider than the buffer repeat its last channel
    pub fn sample_for_output(&self, frame: usize, output_channel: usize) -> f32 {
        let channel = output_channel.min(self.channels.len() - 1);
        self.channels[channel].get(frame).copied().unwrap_or(0.0)
    }

    pub fn into_channels(self) -> Vec<Vec<f32>> {
        self.channels
    }

    pub(crate) fn map_channels<F>(self, f: F) -> Self
    where
        F: FnMut(Vec<f32>) -> Vec<f32>,
    {
        Self {
            channels: self.channels.into_iter().map(f).collect(),
            sample_rate: self.sample_rate,
        }
    }

    /// Append another buffer with the same rate and channel layout
    pub fn append(&mut self, other: &AudioBuffer) -> Result<(), SpeechError> {
        if other.sample_rate != self.sample_rate {
            return Err(SpeechError::Audio(format!(
                "Cannot append {} Hz audio to {} Hz audio",
                other.sample_rate, self.sample_rate
            )));
        }

        if other.channel_count() != self.channel_count() {
            return Err(SpeechError::Audio(format!(
                "Cannot append {} channel audio to {} channel audio",
                other.channel_count(),
                self.channel_count()
            )));
        }

        for (dst, src) in self.channels.iter_mut().zip(&other.channels) {
            dst.extend_from_slice(src);
        }
        Ok(())
    }

    /// Join buffers in order
    pub fn concat<I>(buffers: I) -> Result<Self, SpeechError>
    where
        I: IntoIterator<Item = AudioBuffer>,
    {
        let mut iter = buffers.into_iter();
        let mut joined = iter
            .next()
            .ok_or_else(|| SpeechError::Audio("Nothing to concatenate".to_string()))?;
        for buffer in iter {
            joined.append(&buffer)?;
        }
        Ok(joined)
    }

    /// Decode a WAV file
    pub fn read_wav(path: impl AsRef<Path>) -> Result<Self, SpeechError> {
        let reader = hound::WavReader::open(path.as_ref())?;
        Self::decode(reader)
    }

    /// Decode an in-memory WAV file
    pub fn from_wav_bytes(bytes: &[u8]) -> Result<Self, SpeechError> {
        let reader = hound::WavReader::new(Cursor::new(bytes))?;
        Self::decode(reader)
    }

    fn decode<R: std::io::Read>(reader: hound::WavReader<R>) -> Result<Self, SpeechError> {
        let spec = reader.spec();
        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader.into_samples::<f32>().collect::<Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()?
            }
        };

        Self::from_interleaved(&samples, spec.channels, spec.sample_rate)
    }

    /// Encode as 16-bit PCM WAV
    pub fn write_wav(&self, path: impl AsRef<Path>) -> Result<(), SpeechError> {
        let spec = hound::WavSpec {
            channels: self.channel_count() as u16,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = hound::WavWriter::create(path.as_ref(), spec)?;
        for frame in 0..self.frames() {
            for channel in &self.channels {
                let sample = channel[frame].clamp(-1.0, 1.0);
                writer.write_sample((sample * i16::MAX as f32) as i16)?;
            }
        }
        writer.finalize()?;
        Ok(())
    }
}
