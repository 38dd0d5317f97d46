//! Process-wide settings: backend locations, temp/storage paths, timeouts

use crate::config::{DEFAULT_ENGINE, DEFAULT_SAMPLE_RATE, MAX_SAMPLE_RATE};
use crate::error::SpeechError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Device name that falls back to the system default output when absent
pub const PREFERRED_DEFAULT_DEVICE: &str = "BlackHole 16ch";

/// Sample rates offered to users for backends that honour one
pub const AVAILABLE_SAMPLE_RATES: [u32; 5] = [16_000, 22_050, 24_000, 44_100, 48_000];

/// Speech routing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechSettings {
    /// Directory holding per-request audio artifacts
    pub temp_dir: PathBuf,

    /// Identifier resolved to the system default device when nothing matches it
    pub preferred_default_device: String,

    /// Engine used when the caller does not name one
    pub default_engine: String,

    pub default_sample_rate: u32,

    /// Timeout for process-based backends in seconds
    pub synthesis_timeout_secs: u64,

    /// Override for the OS speech command (`say` on macOS, `espeak-ng` on Linux)
    pub native_command: Option<PathBuf>,

    pub piper: PiperSettings,

    pub bark: BarkSettings,

    /// How often device tasks check for cancellation, in milliseconds
    pub playback_poll_interval_ms: u64,

    pub history_file: PathBuf,

    pub profiles_file: PathBuf,

    pub max_history_items: usize,

    /// Default tracing filter for front ends
    pub log_level: String,
}

/// Local neural backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PiperSettings {
    /// Path to the `piper` executable; searched on PATH when unset
    pub binary: Option<PathBuf>,

    /// Model used for the "Default" voice
    pub model_path: PathBuf,

    /// Directory scanned for `.onnx` voice models
    pub voices_dir: PathBuf,
}

/// Generative backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BarkSettings {
    /// Base URL of the inference server
    pub endpoint: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    pub retry: RetryConfig,

    /// Upper bound on characters per generated sub-utterance
    pub chunk_max_chars: usize,
}

/// Retry configuration for HTTP calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum retry attempts
    pub max_retries: u32,

    /// Initial retry delay in milliseconds
    pub initial_delay_ms: u64,

    /// Maximum retry delay in milliseconds
    pub max_delay_ms: u64,
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("voxroute")
}

impl Default for SpeechSettings {
    fn default() -> Self {
        let temp_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("voxroute")
            .join("tmp");
        let data = data_dir();

        Self {
            temp_dir,
            preferred_default_device: PREFERRED_DEFAULT_DEVICE.to_string(),
            default_engine: DEFAULT_ENGINE.to_string(),
            default_sample_rate: DEFAULT_SAMPLE_RATE,
            synthesis_timeout_secs: 30,
            native_command: None,
            piper: PiperSettings::default(),
            bark: BarkSettings::default(),
            playback_poll_interval_ms: 100,
            history_file: data.join("history.json"),
            profiles_file: data.join("profiles.json"),
            max_history_items: 50,
            log_level: "warn".to_string(),
        }
    }
}

impl Default for PiperSettings {
    fn default() -> Self {
        let voices_dir = data_dir().join("piper");
        Self {
            binary: None,
            model_path: voices_dir.join("en_US-lessac-medium.onnx"),
            voices_dir,
        }
    }
}

impl Default for BarkSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8765".to_string(),
            timeout_secs: 120,
            retry: RetryConfig::default(),
            chunk_max_chars: 150,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 250,
            max_delay_ms: 2000,
        }
    }
}

impl RetryConfig {
    /// Validate retry configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_retries > 10 {
            return Err("Max retries too large (max 10)".to_string());
        }

        if self.max_delay_ms > 60_000 {
            return Err("Max delay too large (max 60000 ms)".to_string());
        }

        if self.initial_delay_ms > self.max_delay_ms {
            return Err("Initial delay cannot be greater than max delay".to_string());
        }

        Ok(())
    }

    /// Delay before retry number `attempt` (0-based), doubling up to `max_delay_ms`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(16)).unwrap_or(u64::MAX);
        let ms = self.initial_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

impl SpeechSettings {
    /// Load settings from a JSON or TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SpeechError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SpeechError::Config(format!("Failed to read settings file {}: {}", path.display(), e))
        })?;
        Self::from_str(&content)
    }

    /// Parse settings, trying JSON first and then TOML
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, SpeechError> {
        if let Ok(settings) = serde_json::from_str::<SpeechSettings>(content) {
            return Ok(settings);
        }

        toml::from_str::<SpeechSettings>(content)
            .map_err(|e| SpeechError::Config(format!("Settings are neither valid JSON nor TOML: {}", e)))
    }

    /// Defaults overlaid with `VOXROUTE_*` environment variables
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        settings.apply_env();
        settings
    }

    /// Overlay `VOXROUTE_*` environment variables
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Overlay values from an arbitrary key lookup using the environment variable names
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("VOXROUTE_TEMP_DIR") {
            self.temp_dir = PathBuf::from(dir);
        }

        if let Some(cmd) = lookup("VOXROUTE_NATIVE_COMMAND") {
            self.native_command = Some(PathBuf::from(cmd));
        }

        if let Some(bin) = lookup("VOXROUTE_PIPER_BIN") {
            self.piper.binary = Some(PathBuf::from(bin));
        }

        if let Some(model) = lookup("VOXROUTE_PIPER_MODEL") {
            self.piper.model_path = PathBuf::from(model);
        }

        if let Some(dir) = lookup("VOXROUTE_PIPER_VOICES_DIR") {
            self.piper.voices_dir = PathBuf::from(dir);
        }

        if let Some(endpoint) = lookup("VOXROUTE_BARK_ENDPOINT") {
            self.bark.endpoint = endpoint;
        }

        if let Some(level) = lookup("VOXROUTE_LOG_LEVEL") {
            self.log_level = level;
        }
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), String> {
        if self.synthesis_timeout_secs == 0 || self.synthesis_timeout_secs > 600 {
            return Err("Synthesis timeout must be between 1 and 600 seconds".to_string());
        }

        if self.playback_poll_interval_ms == 0 || self.playback_poll_interval_ms > 1000 {
            return Err("Playback poll interval must be between 1 and 1000 ms".to_string());
        }

        if self.default_sample_rate == 0 || self.default_sample_rate > MAX_SAMPLE_RATE {
            return Err("Default sample rate must be between 1 and 192000 Hz".to_string());
        }

        if self.max_history_items == 0 {
            return Err("History must keep at least one item".to_string());
        }

        if self.bark.chunk_max_chars < 20 {
            return Err("Chunk size too small (min 20 chars)".to_string());
        }

        if self.bark.timeout_secs == 0 {
            return Err("Bark timeout must be greater than 0".to_string());
        }

        let endpoint = url::Url::parse(&self.bark.endpoint)
            .map_err(|e| format!("Invalid bark endpoint '{}': {}", self.bark.endpoint, e))?;
        if endpoint.scheme() != "http" && endpoint.scheme() != "https" {
            return Err("Bark endpoint must use http or https".to_string());
        }

        self.bark.retry.validate()?;

        Ok(())
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_secs(self.synthesis_timeout_secs)
    }

    pub fn playback_poll_interval(&self) -> Duration {
        Duration::from_millis(self.playback_poll_interval_ms)
    }
}
