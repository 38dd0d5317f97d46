//! cpal-backed audio output

use super::{AudioOutput, PlaybackStream};
use crate::audio::resample::convert_rate;
use crate::audio::AudioBuffer;
use crate::device::{DeviceHandle, OutputDevice};
use crate::error::SpeechError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SampleRate, SizedSample, StreamConfig, SupportedStreamConfig};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

/// Plays through the default cpal host
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalOutput;

impl CpalOutput {
    pub fn new() -> Self {
        Self
    }

    fn find_device(host: &cpal::Host, handle: &DeviceHandle) -> Result<cpal::Device, SpeechError> {
        let label = handle.to_string();
        match handle {
            DeviceHandle::SystemDefault => host
                .default_output_device()
                .ok_or_else(|| SpeechError::device(label, "No default output device available")),
            DeviceHandle::Index(index) => {
                let device = host
                    .devices()
                    .map_err(|e| SpeechError::device(&label, format!("Failed to enumerate devices: {}", e)))?
                    .nth(*index)
                    .ok_or_else(|| SpeechError::device(&label, format!("No device at index {}", index)))?;
                if max_output_channels(&device) == 0 {
                    return Err(SpeechError::device(label, "Device has no output channels"));
                }
                Ok(device)
            }
            DeviceHandle::Name(name) => host
                .output_devices()
                .map_err(|e| SpeechError::device(&label, format!("Failed to enumerate devices: {}", e)))?
                .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                .ok_or_else(|| SpeechError::device(label, "Output device not found")),
        }
    }

    /// Config at the buffer's own rate when the device supports it, else the device default
    fn choose_config(device: &cpal::Device, sample_rate: u32) -> Result<SupportedStreamConfig, String> {
        let preferred = device
            .supported_output_configs()
            .map_err(|e| format!("Failed to query output configs: {}", e))?
            .filter(|c| c.min_sample_rate().0 <= sample_rate && c.max_sample_rate().0 >= sample_rate)
            .filter(|c| matches!(c.sample_format(), SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16))
            .max_by_key(|c| (c.sample_format() == SampleFormat::F32, c.channels()));

        match preferred {
            Some(range) => Ok(range.with_sample_rate(SampleRate(sample_rate))),
            None => device
                .default_output_config()
                .map_err(|e| format!("Failed to get default output config: {}", e)),
        }
    }
}

fn max_output_channels(device: &cpal::Device) -> u16 {
    device
        .supported_output_configs()
        .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
        .unwrap_or(0)
}

impl AudioOutput for CpalOutput {
    fn output_devices(&self) -> Result<Vec<OutputDevice>, SpeechError> {
        let host = cpal::default_host();
        let devices = host
            .devices()
            .map_err(|e| SpeechError::Audio(format!("Failed to enumerate devices: {}", e)))?;

        let mut outputs = Vec::new();
        for (index, device) in devices.enumerate() {
            let channels = max_output_channels(&device);
            if channels == 0 {
                continue;
            }

            let name = match device.name() {
                Ok(name) => name,
                Err(e) => {
                    debug!("Skipping device {} without a name: {}", index, e);
                    continue;
                }
            };

            let default_sample_rate = device
                .default_output_config()
                .map(|c| c.sample_rate().0)
                .unwrap_or(0);

            outputs.push(OutputDevice {
                name,
                index,
                max_output_channels: channels,
                default_sample_rate,
            });
        }

        Ok(outputs)
    }

    fn default_output_name(&self) -> Option<String> {
        cpal::default_host()
            .default_output_device()
            .and_then(|d| d.name().ok())
    }

    fn start(
        &self,
        handle: &DeviceHandle,
        buffer: Arc<AudioBuffer>,
    ) -> Result<Box<dyn PlaybackStream>, SpeechError> {
        let host = cpal::default_host();
        let device = Self::find_device(&host, handle)?;
        let label = device.name().unwrap_or_else(|_| handle.to_string());

        let supported = Self::choose_config(&device, buffer.sample_rate())
            .map_err(|e| SpeechError::device(&label, e))?;
        let device_rate = supported.sample_rate().0;

        // Rate adaptation for devices that cannot run at the buffer's rate
        let buffer = if device_rate != buffer.sample_rate() {
            debug!(device = %label, from = buffer.sample_rate(), to = device_rate, "Converting buffer to device rate");
            Arc::new(convert_rate(&buffer, device_rate)?)
        } else {
            buffer
        };

        let format = supported.sample_format();
        let config: StreamConfig = supported.into();
        let state = Arc::new(StreamState::default());

        let stream = match format {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, buffer, state.clone(), label.clone()),
            SampleFormat::I16 => build_stream::<i16>(&device, &config, buffer, state.clone(), label.clone()),
            SampleFormat::U16 => build_stream::<u16>(&device, &config, buffer, state.clone(), label.clone()),
            other => Err(SpeechError::device(&label, format!("Unsupported sample format: {:?}", other))),
        }?;

        stream
            .play()
            .map_err(|e| SpeechError::device(&label, format!("Failed to start stream: {}", e)))?;

        Ok(Box::new(CpalStream {
            stream,
            state,
            label,
        }))
    }
}

#[derive(Default)]
struct StreamState {
    position: AtomicUsize,
    finished: AtomicBool,
    error: Mutex<Option<String>>,
}

struct CpalStream {
    stream: cpal::Stream,
    state: Arc<StreamState>,
    label: String,
}

impl PlaybackStream for CpalStream {
    fn is_finished(&self) -> Result<bool, SpeechError> {
        if let Some(message) = self.state.error.lock().clone() {
            return Err(SpeechError::device(&self.label, message));
        }
        Ok(self.state.finished.load(Ordering::Acquire))
    }

    fn stop(&mut self) {
        if let Err(e) = self.stream.pause() {
            debug!(device = %self.label, "Failed to pause stream: {}", e);
        }
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    buffer: Arc<AudioBuffer>,
    state: Arc<StreamState>,
    label: String,
) -> Result<cpal::Stream, SpeechError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let frames = buffer.frames();
    let error_state = state.clone();
    let error_label = label.clone();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let mut pos = state.position.load(Ordering::Relaxed);
                for frame in data.chunks_mut(channels) {
                    for (channel, out) in frame.iter_mut().enumerate() {
                        *out = T::from_sample(buffer.sample_for_output(pos, channel));
                    }
                    if pos < frames {
                        pos += 1;
                    }
                }
                state.position.store(pos, Ordering::Relaxed);
                if pos >= frames {
                    state.finished.store(true, Ordering::Release);
                }
            },
            move |err| {
                error!(device = %error_label, "Audio stream error: {}", err);
                *error_state.error.lock() = Some(err.to_string());
            },
            None,
        )
        .map_err(|e| SpeechError::device(label, format!("Failed to build output stream: {}", e)))
}
