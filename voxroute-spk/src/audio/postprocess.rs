//! Volume and speed transforms applied once per utterance, before fan-out

use super::AudioBuffer;
use crate::config::{clamp_speed, clamp_volume};

/// Scale every sample by `volume`. Returns the input untouched at 1.0.
pub fn apply_volume(buffer: AudioBuffer, volume: f64) -> AudioBuffer {
    if volume == 1.0 {
        return buffer;
    }

    let gain = volume as f32;
    buffer.map_channels(|mut samples| {
        samples.iter_mut().for_each(|s| *s *= gain);
        samples
    })
}

/// Plain resample by `speed`: duration and pitch both change.
///
/// Each channel becomes `floor(len / speed)` samples long, read back from the
/// source by linear interpolation. Returns the input untouched at 1.0.
pub fn apply_speed(buffer: AudioBuffer, speed: f64) -> AudioBuffer {
    if speed == 1.0 || speed <= 0.0 || !speed.is_finite() {
        return buffer;
    }

    buffer.map_channels(|samples| resample_linear(&samples, speed))
}

/// Quotients that land within this of a whole number count as whole
const LENGTH_EPSILON: f64 = 1e-9;

fn resampled_len(len: usize, step: f64) -> usize {
    (len as f64 / step + LENGTH_EPSILON).floor() as usize
}

fn resample_linear(samples: &[f32], step: f64) -> Vec<f32> {
    let len = samples.len();
    if len == 0 {
        return Vec::new();
    }
    let new_len = resampled_len(len, step);

    let last = len - 1;
    (0..new_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = (pos.floor() as usize).min(last);
            let frac = (pos - idx as f64) as f32;
            let next = (idx + 1).min(last);
            samples[idx] + (samples[next] - samples[idx]) * frac
        })
        .collect()
}

/// Post-processing parameters fixed for the lifetime of an engine instance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostProcessor {
    speed: f64,
    volume: f64,
}

impl PostProcessor {
    pub fn new(speed: f64, volume: f64) -> Self {
        Self {
            speed: clamp_speed(speed),
            volume: clamp_volume(volume),
        }
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn is_identity(&self) -> bool {
        self.speed == 1.0 && self.volume == 1.0
    }

    /// Volume first, then speed
    pub fn process(&self, buffer: AudioBuffer) -> AudioBuffer {
        apply_speed(apply_volume(buffer, self.volume), self.speed)
    }
}

impl Default for PostProcessor {
    fn default() -> Self {
        Self::new(1.0, 1.0)
    }
}
