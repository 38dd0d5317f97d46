//! Generative model backend
//!
//! Long text is chunked, each chunk generated in order and the audio joined.
//! The model runtime sits behind [`GenerativeModel`]; the shipped runtime talks
//! to a local inference server over HTTP.

use super::chunk::chunk_text;
use super::registry::{EngineFactory, VoiceInfo};
use super::{temp_wav_path, SynthesizedAudio, TtsEngine};
use crate::audio::resample::convert_rate;
use crate::audio::AudioBuffer;
use crate::config::{EngineConfig, MAX_SAMPLE_RATE};
use crate::error::SpeechError;
use crate::settings::{BarkSettings, RetryConfig, SpeechSettings};
use async_trait::async_trait;
use reqwest::Client;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

pub const ENGINE_ID: &str = "bark";

/// Preset used for the "Default" voice
pub const DEFAULT_PRESET: &str = "v2/en_speaker_6";

/// Rate the model produces audio at
pub const NATIVE_SAMPLE_RATE: u32 = 24_000;

const PRESET_LANGUAGES: [(&str, &str); 13] = [
    ("en", "English"),
    ("de", "German"),
    ("es", "Spanish"),
    ("fr", "French"),
    ("hi", "Hindi"),
    ("it", "Italian"),
    ("ja", "Japanese"),
    ("ko", "Korean"),
    ("pl", "Polish"),
    ("pt", "Portuguese"),
    ("ru", "Russian"),
    ("tr", "Turkish"),
    ("zh", "Chinese"),
];

/// Every built-in speaker preset
pub fn speaker_presets() -> Vec<VoiceInfo> {
    PRESET_LANGUAGES
        .iter()
        .flat_map(|(code, language)| {
            (0..10).map(move |n| {
                VoiceInfo::new(
                    format!("v2/{}_speaker_{}", code, n),
                    format!("{} Speaker {}", language, n),
                )
            })
        })
        .collect()
}

/// A loaded text-to-audio model
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Load weights; called once when an engine instance is built
    async fn load(&self) -> Result<(), SpeechError>;

    /// Generate audio for one sub-utterance
    async fn generate(&self, text: &str, voice_preset: &str) -> Result<AudioBuffer, SpeechError>;
}

/// HTTP client for a local Bark inference server
pub struct BarkServerModel {
    client: Client,
    endpoint: Url,
    retry: RetryConfig,
}

impl BarkServerModel {
    pub fn new(settings: &BarkSettings) -> Result<Self, SpeechError> {
        let mut endpoint = Url::parse(&settings.endpoint).map_err(|e| {
            SpeechError::Initialization(format!("Invalid bark endpoint '{}': {}", settings.endpoint, e))
        })?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| SpeechError::Initialization(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            retry: settings.retry.clone(),
        })
    }

    fn url(&self, path: &str) -> Result<Url, String> {
        self.endpoint
            .join(path)
            .map_err(|e| format!("Invalid URL for {}: {}", path, e))
    }

    async fn with_retry<F, Fut, T>(&self, what: &str, mut f: F) -> Result<T, String>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, String>>,
    {
        let mut last_error = String::new();
        for attempt in 0..=self.retry.max_retries {
            match f().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    last_error = e;
                    if attempt < self.retry.max_retries {
                        let delay = self.retry.delay_for(attempt);
                        debug!(
                            "{} failed, retrying in {}ms (attempt {}/{})",
                            what,
                            delay.as_millis(),
                            attempt + 1,
                            self.retry.max_retries
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Err(last_error)
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<Vec<u8>, String> {
        let url = self.url(path)?;
        let response = self
            .client
            .post(url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("Request to {} failed: {}", url, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(format!("{} returned {}: {}", url, status, text.trim()));
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| format!("Failed to read response from {}: {}", url, e))
    }
}

#[async_trait]
impl GenerativeModel for BarkServerModel {
    async fn load(&self) -> Result<(), SpeechError> {
        self.with_retry("Bark preload", || self.post("preload", serde_json::json!({})))
            .await
            .map(|_| ())
            .map_err(|e| SpeechError::Initialization(format!("Bark model could not be loaded: {}", e)))
    }

    async fn generate(&self, text: &str, voice_preset: &str) -> Result<AudioBuffer, SpeechError> {
        let body = serde_json::json!({
            "text": text,
            "history_prompt": voice_preset,
        });

        let wav = self
            .with_retry("Bark generate", || self.post("generate", body.clone()))
            .await
            .map_err(|e| SpeechError::Synthesis(format!("Bark generation failed: {}", e)))?;

        AudioBuffer::from_wav_bytes(&wav)
            .map_err(|e| SpeechError::Synthesis(format!("Malformed audio from Bark server: {}", e)))
    }
}

fn resample_output(joined: &AudioBuffer, sample_rate: u32) -> Result<AudioBuffer, SpeechError> {
    convert_rate(joined, sample_rate)
        .map_err(|e| SpeechError::Synthesis(format!("Failed to convert to {} Hz: {}", sample_rate, e)))
}

/// Generative backend instance
pub struct BarkTtsEngine {
    model: Arc<dyn GenerativeModel>,
    preset: String,
    sample_rate: u32,
    chunk_max_chars: usize,
    temp_dir: PathBuf,
    config: EngineConfig,
}

impl BarkTtsEngine {
    /// Load the model and fix the speaker preset
    pub async fn new(
        config: &EngineConfig,
        settings: &SpeechSettings,
        model: Arc<dyn GenerativeModel>,
    ) -> Result<Self, SpeechError> {
        let sample_rate = config.sample_rate();
        if sample_rate == 0 || sample_rate > MAX_SAMPLE_RATE {
            return Err(SpeechError::Initialization(format!(
                "Bark sample rate must be between 1 and {} Hz, got {}",
                MAX_SAMPLE_RATE, sample_rate
            )));
        }

        let preset = if config.uses_default_voice() {
            DEFAULT_PRESET.to_string()
        } else {
            config.voice_id().to_string()
        };

        if !speaker_presets().iter().any(|v| v.id == preset) {
            warn!("Voice preset '{}' is not a known Bark preset; using it anyway", preset);
        }

        info!("Loading Bark model (this may take a while)");
        model.load().await?;
        info!("Bark ready with preset={}, sample_rate={}", preset, sample_rate);

        Ok(Self {
            model,
            preset,
            sample_rate,
            chunk_max_chars: settings.bark.chunk_max_chars,
            temp_dir: settings.temp_dir.clone(),
            config: config.clone(),
        })
    }

    pub fn preset(&self) -> &str {
        &self.preset
    }
}

#[async_trait]
impl TtsEngine for BarkTtsEngine {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, SpeechError> {
        let chunks = chunk_text(text, self.chunk_max_chars);
        if chunks.is_empty() {
            return Err(SpeechError::Synthesis("Nothing to synthesize".to_string()));
        }

        let total = chunks.len();
        let mut parts = Vec::with_capacity(total);
        for (i, chunk) in chunks.iter().enumerate() {
            debug!("Generating chunk {}/{} ({} chars)", i + 1, total, chunk.chars().count());
            parts.push(self.model.generate(chunk, &self.preset).await?);
        }

        let joined = AudioBuffer::concat(parts)
            .map_err(|e| SpeechError::Synthesis(format!("Malformed model output: {}", e)))?;
        let audio = resample_output(&joined, self.sample_rate)?;

        let file = temp_wav_path(&self.temp_dir)?;
        audio.write_wav(&file).map_err(|e| {
            SpeechError::Synthesis(format!("Failed to write {}: {}", file.display(), e))
        })?;

        Ok(SynthesizedAudio { buffer: audio, file })
    }

    fn describe_config(&self) -> EngineConfig {
        self.config.clone()
    }

    fn name(&self) -> &str {
        ENGINE_ID
    }
}

/// Registry entry for the generative backend.
///
/// Without an explicit model, each build connects to the configured server.
#[derive(Default)]
pub struct BarkEngineFactory {
    model: Option<Arc<dyn GenerativeModel>>,
}

impl BarkEngineFactory {
    /// Use a specific model runtime instead of the HTTP server
    pub fn with_model(model: Arc<dyn GenerativeModel>) -> Self {
        Self { model: Some(model) }
    }
}

#[async_trait]
impl EngineFactory for BarkEngineFactory {
    fn id(&self) -> &str {
        ENGINE_ID
    }

    fn display_name(&self) -> &str {
        "Bark AI (Natural)"
    }

    fn supports_sample_rate(&self) -> bool {
        true
    }

    async fn build(
        &self,
        config: &EngineConfig,
        settings: &SpeechSettings,
    ) -> Result<Box<dyn TtsEngine>, SpeechError> {
        let model: Arc<dyn GenerativeModel> = match &self.model {
            Some(model) => model.clone(),
            None => Arc::new(BarkServerModel::new(&settings.bark)?),
        };
        Ok(Box::new(BarkTtsEngine::new(config, settings, model).await?))
    }

    async fn list_voices(&self, _settings: &SpeechSettings) -> Result<Vec<VoiceInfo>, SpeechError> {
        Ok(speaker_presets())
    }
}
