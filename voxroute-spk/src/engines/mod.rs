//! Engine contract and synthesis backends

pub mod bark;
pub mod chunk;
pub mod native;
pub mod piper;
pub mod registry;

mod process;

pub use registry::{EngineFactory, EngineInfo, EngineRegistry, VoiceInfo};

use crate::audio::AudioBuffer;
use crate::config::EngineConfig;
use crate::error::SpeechError;
use async_trait::async_trait;
use std::path::Path;
use tempfile::TempPath;

/// Result of one synthesis call.
///
/// `file` is the backend's WAV artifact in the temp directory; it is deleted
/// when this value is dropped.
#[derive(Debug)]
pub struct SynthesizedAudio {
    pub buffer: AudioBuffer,
    pub file: TempPath,
}

impl SynthesizedAudio {
    /// Decode the WAV artifact at `file`
    pub fn from_file(file: TempPath) -> Result<Self, SpeechError> {
        let buffer = AudioBuffer::read_wav(&file).map_err(|e| {
            SpeechError::Synthesis(format!("Failed to read generated audio {}: {}", file.display(), e))
        })?;
        Ok(Self { buffer, file })
    }

    /// Native sample rate of the generated audio
    pub fn sample_rate(&self) -> u32 {
        self.buffer.sample_rate()
    }
}

/// A constructed, ready-to-use synthesis backend
#[async_trait]
pub trait TtsEngine: Send + Sync {
    /// Convert text to audio using the instance's fixed voice/model
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, SpeechError>;

    /// Settings this instance was built with
    fn describe_config(&self) -> EngineConfig;

    /// Engine identifier
    fn name(&self) -> &str;
}

/// Reserve a uniquely named `.wav` path under `temp_dir`
pub fn temp_wav_path(temp_dir: &Path) -> Result<TempPath, SpeechError> {
    std::fs::create_dir_all(temp_dir).map_err(|e| {
        SpeechError::Synthesis(format!("Failed to create temp directory {}: {}", temp_dir.display(), e))
    })?;

    let file = tempfile::Builder::new()
        .prefix("utterance-")
        .suffix(".wav")
        .rand_bytes(16)
        .tempfile_in(temp_dir)
        .map_err(|e| {
            SpeechError::Synthesis(format!("Failed to create temp file in {}: {}", temp_dir.display(), e))
        })?;

    Ok(file.into_temp_path())
}
