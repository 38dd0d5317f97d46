//! Error types for voxroute-spk

use thiserror::Error;

/// Speech routing errors
///
/// Cancellation is not represented here: a stopped request is a terminal
/// state of its own, reported through the status channel.
#[derive(Error, Debug)]
pub enum SpeechError {
    /// Backend construction failed (missing runtime, model file, OS facility)
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// Text to audio conversion failed for one request
    #[error("Synthesis error: {0}")]
    Synthesis(String),

    /// Playback on a single output device failed
    #[error("Device error on '{device}': {message}")]
    Device { device: String, message: String },

    /// Request rejected before any backend work
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// WAV decoding/encoding or rate conversion failure
    #[error("Audio error: {0}")]
    Audio(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpeechError {
    pub(crate) fn device(device: impl Into<String>, message: impl Into<String>) -> Self {
        SpeechError::Device {
            device: device.into(),
            message: message.into(),
        }
    }
}

impl From<hound::Error> for SpeechError {
    fn from(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(e) => SpeechError::Io(e),
            other => SpeechError::Audio(other.to_string()),
        }
    }
}
