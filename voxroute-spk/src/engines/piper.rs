//! Piper backend: local neural TTS from an `.onnx` voice model

use super::process::{resolve_binary, run};
use super::registry::{EngineFactory, VoiceInfo};
use super::{temp_wav_path, SynthesizedAudio, TtsEngine};
use crate::config::EngineConfig;
use crate::error::SpeechError;
use crate::settings::SpeechSettings;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

pub const ENGINE_ID: &str = "piper";

/// Locate the model file for a voice id.
///
/// "Default" uses the configured model path. Other ids are an absolute path,
/// or a model name under the voices directory with or without `.onnx`.
pub fn find_model(config: &EngineConfig, settings: &SpeechSettings) -> Result<PathBuf, SpeechError> {
    let candidates: Vec<PathBuf> = if config.uses_default_voice() {
        vec![settings.piper.model_path.clone()]
    } else {
        let voice = Path::new(config.voice_id());
        if voice.is_absolute() {
            vec![voice.to_path_buf()]
        } else if voice.components().count() != 1 {
            return Err(SpeechError::Initialization(format!(
                "Invalid Piper voice '{}'",
                config.voice_id()
            )));
        } else {
            let dir = &settings.piper.voices_dir;
            vec![
                dir.join(config.voice_id()),
                dir.join(format!("{}.onnx", config.voice_id())),
            ]
        }
    };

    candidates
        .iter()
        .find(|p| p.is_file())
        .cloned()
        .ok_or_else(|| {
            SpeechError::Initialization(format!(
                "Piper model not found for voice '{}' (looked at {})",
                config.voice_id(),
                candidates
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })
}

/// Every `.onnx` model in `voices_dir`, sorted by id
pub fn list_models(voices_dir: &Path) -> Result<Vec<VoiceInfo>, SpeechError> {
    if !voices_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut voices: Vec<VoiceInfo> = std::fs::read_dir(voices_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().map_or(false, |ext| ext == "onnx"))
        .filter_map(|path| {
            let stem = path.file_stem()?.to_string_lossy().to_string();
            Some(VoiceInfo::new(stem.clone(), stem.replace(['-', '_'], " ")))
        })
        .collect();
    voices.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(voices)
}

/// Local neural synthesis through the `piper` executable
pub struct PiperTtsEngine {
    piper_path: PathBuf,
    model_path: PathBuf,
    temp_dir: PathBuf,
    timeout: Duration,
    config: EngineConfig,
}

impl PiperTtsEngine {
    /// Resolve the executable and model, failing fast if either is missing
    pub fn new(config: &EngineConfig, settings: &SpeechSettings) -> Result<Self, SpeechError> {
        let piper_path = resolve_binary(settings.piper.binary.as_deref(), "piper")?;
        let model_path = find_model(config, settings)?;

        info!(
            "Initialized Piper with binary={}, model={}",
            piper_path.display(),
            model_path.display()
        );

        Ok(Self {
            piper_path,
            model_path,
            temp_dir: settings.temp_dir.clone(),
            timeout: settings.synthesis_timeout(),
            config: config.clone(),
        })
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }
}

#[async_trait]
impl TtsEngine for PiperTtsEngine {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, SpeechError> {
        let output = temp_wav_path(&self.temp_dir)?;

        // piper reads the utterance from stdin
        let mut cmd = Command::new(&self.piper_path);
        cmd.arg("--model")
            .arg(&self.model_path)
            .arg("--output_file")
            .arg(&*output);
        debug!("Running piper for {} chars", text.chars().count());

        run(cmd, "piper", Some(text), self.timeout).await?;
        SynthesizedAudio::from_file(output)
    }

    fn describe_config(&self) -> EngineConfig {
        self.config.clone()
    }

    fn name(&self) -> &str {
        ENGINE_ID
    }
}

/// Registry entry for Piper
pub struct PiperEngineFactory;

#[async_trait]
impl EngineFactory for PiperEngineFactory {
    fn id(&self) -> &str {
        ENGINE_ID
    }

    fn display_name(&self) -> &str {
        "Piper (Local Neural)"
    }

    fn supports_sample_rate(&self) -> bool {
        false
    }

    async fn build(
        &self,
        config: &EngineConfig,
        settings: &SpeechSettings,
    ) -> Result<Box<dyn TtsEngine>, SpeechError> {
        Ok(Box::new(PiperTtsEngine::new(config, settings)?))
    }

    async fn list_voices(&self, settings: &SpeechSettings) -> Result<Vec<VoiceInfo>, SpeechError> {
        list_models(&settings.piper.voices_dir)
    }
}
