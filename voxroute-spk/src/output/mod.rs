//! Audio output layer: device enumeration and per-device playback streams
//!
//! The fan-out only talks to [`AudioOutput`], so tests and alternative hosts
//! can stand in for real hardware.

pub mod cpal_output;

pub use cpal_output::CpalOutput;

use crate::audio::AudioBuffer;
use crate::device::{DeviceHandle, OutputDevice};
use crate::error::SpeechError;
use std::sync::Arc;

/// Source of output devices and playback streams
pub trait AudioOutput: Send + Sync {
    /// Every device with at least one output channel
    fn output_devices(&self) -> Result<Vec<OutputDevice>, SpeechError>;

    /// Name of the system default output device, if any
    fn default_output_name(&self) -> Option<String>;

    /// Open `device` and start playing `buffer` from the beginning.
    ///
    /// Called from a blocking thread; the returned stream stays on it.
    fn start(
        &self,
        device: &DeviceHandle,
        buffer: Arc<AudioBuffer>,
    ) -> Result<Box<dyn PlaybackStream>, SpeechError>;
}

/// A started playback on one device
pub trait PlaybackStream {
    /// `Ok(true)` once every frame was handed to the device, `Err` if the stream failed
    fn is_finished(&self) -> Result<bool, SpeechError>;

    /// Stop output immediately
    fn stop(&mut self);
}
