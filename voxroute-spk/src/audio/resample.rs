//! Sample rate conversion with rubato
//!
//! Used where a backend or device needs a different rate than the one audio
//! was produced at. This is not the speed transform: duration is preserved.

use super::AudioBuffer;
use crate::error::SpeechError;
use rubato::{
    calculate_cutoff, Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType,
    WindowFunction,
};

const CHUNK_SIZE: usize = 1024;

/// Convert `buffer` to `target_rate`, keeping channel layout and duration
pub fn convert_rate(buffer: &AudioBuffer, target_rate: u32) -> Result<AudioBuffer, SpeechError> {
    if target_rate == 0 {
        return Err(SpeechError::Audio("Target sample rate must be greater than 0".to_string()));
    }

    if buffer.sample_rate() == target_rate || buffer.is_empty() {
        return AudioBuffer::new(buffer.channels().to_vec(), target_rate);
    }

    let ratio = target_rate as f64 / buffer.sample_rate() as f64;
    let channels = buffer.channel_count();

    let sinc_len = 128;
    let window = WindowFunction::Blackman2;
    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff: calculate_cutoff(sinc_len, window),
        interpolation: SincInterpolationType::Quadratic,
        oversampling_factor: 256,
        window,
    };

    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, CHUNK_SIZE, channels)
        .map_err(|e| SpeechError::Audio(format!("Failed to create resampler: {}", e)))?;

    let expected = (buffer.frames() as f64 * ratio).ceil() as usize;
    let delay = resampler.output_delay();
    let mut output: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + delay); channels];

    let mut pos = 0;
    let frames = buffer.frames();
    while pos < frames {
        let needed = resampler.input_frames_next();
        let end = (pos + needed).min(frames);
        let chunk: Vec<&[f32]> = buffer.channels().iter().map(|c| &c[pos..end]).collect();

        let produced = if end - pos == needed {
            resampler.process(chunk.as_slice(), None)
        } else {
            resampler.process_partial(Some(chunk.as_slice()), None)
        }
        .map_err(|e| SpeechError::Audio(format!("Resampling failed: {}", e)))?;

        append_planar(&mut output, produced);
        pos = end;
    }

    // Drain the filter delay
    while output[0].len() < expected + delay {
        let produced = resampler
            .process_partial::<Vec<f32>>(None, None)
            .map_err(|e| SpeechError::Audio(format!("Resampling failed: {}", e)))?;
        if produced[0].is_empty() {
            break;
        }
        append_planar(&mut output, produced);
    }

    let trimmed = output
        .into_iter()
        .map(|c| c.into_iter().skip(delay).take(expected).collect())
        .collect();
    AudioBuffer::new(trimmed, target_rate)
}

fn append_planar(output: &mut [Vec<f32>], produced: Vec<Vec<f32>>) {
    for (dst, src) in output.iter_mut().zip(produced) {
        dst.extend(src);
    }
}
