//! Per-request engine configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Slowest accepted playback speed
pub const SPEED_MIN: f64 = 0.5;
/// Fastest accepted playback speed
pub const SPEED_MAX: f64 = 2.0;
pub const VOLUME_MIN: f64 = 0.0;
pub const VOLUME_MAX: f64 = 1.0;

/// Speed/volume differences at or below this do not force an engine rebuild
pub const REBUILD_TOLERANCE: f64 = 0.01;

/// Voice sentinel meaning "the backend's built-in default"
pub const DEFAULT_VOICE: &str = "Default";

pub const DEFAULT_ENGINE: &str = "say";
pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;
pub const MAX_SAMPLE_RATE: u32 = 192_000;

/// Clamp a playback speed into `[SPEED_MIN, SPEED_MAX]`. NaN maps to 1.0.
pub fn clamp_speed(speed: f64) -> f64 {
    if speed.is_nan() {
        return 1.0;
    }
    speed.clamp(SPEED_MIN, SPEED_MAX)
}

/// Clamp a volume into `[VOLUME_MIN, VOLUME_MAX]`. NaN maps to 1.0.
pub fn clamp_volume(volume: f64) -> f64 {
    if volume.is_nan() {
        return 1.0;
    }
    volume.clamp(VOLUME_MIN, VOLUME_MAX)
}

/// Settings for one synthesis request.
///
/// Fields are private so speed and volume can only be stored post-clamp,
/// including when a configuration is deserialized from a profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawEngineConfig")]
pub struct EngineConfig {
    engine_id: String,
    selected_devices: Vec<String>,
    voice_id: String,
    sample_rate: u32,
    playback_speed: f64,
    volume: f64,
}

#[derive(Deserialize)]
#[serde(default)]
struct RawEngineConfig {
    engine_id: String,
    selected_devices: Vec<String>,
    voice_id: String,
    sample_rate: u32,
    playback_speed: f64,
    volume: f64,
}

impl Default for RawEngineConfig {
    fn default() -> Self {
        Self {
            engine_id: DEFAULT_ENGINE.to_string(),
            selected_devices: Vec::new(),
            voice_id: DEFAULT_VOICE.to_string(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            playback_speed: 1.0,
            volume: 1.0,
        }
    }
}

impl From<RawEngineConfig> for EngineConfig {
    fn from(raw: RawEngineConfig) -> Self {
        EngineConfig::new(raw.engine_id)
            .with_devices(raw.selected_devices)
            .with_voice(raw.voice_id)
            .with_sample_rate(raw.sample_rate)
            .with_speed(raw.playback_speed)
            .with_volume(raw.volume)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        RawEngineConfig::default().into()
    }
}

impl EngineConfig {
    /// Configuration for `engine_id` with default voice, no devices, 1.0x speed and full volume
    pub fn new(engine_id: impl Into<String>) -> Self {
        Self {
            engine_id: engine_id.into(),
            selected_devices: Vec::new(),
            voice_id: DEFAULT_VOICE.to_string(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            playback_speed: 1.0,
            volume: 1.0,
        }
    }

    /// Replace the device list. Duplicate identifiers are dropped, first occurrence wins.
    pub fn with_devices<I, S>(mut self, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = BTreeSet::new();
        self.selected_devices = devices
            .into_iter()
            .map(Into::into)
            .filter(|d| seen.insert(d.clone()))
            .collect();
        self
    }

    pub fn with_voice(mut self, voice_id: impl Into<String>) -> Self {
        let voice = voice_id.into();
        self.voice_id = if voice.trim().is_empty() {
            DEFAULT_VOICE.to_string()
        } else {
            voice
        };
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.playback_speed = clamp_speed(speed);
        self
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = clamp_volume(volume);
        self
    }

    pub fn engine_id(&self) -> &str {
        &self.engine_id
    }

    pub fn selected_devices(&self) -> &[String] {
        &self.selected_devices
    }

    /// Device identifiers as an order-independent set
    pub fn device_set(&self) -> BTreeSet<&str> {
        self.selected_devices.iter().map(String::as_str).collect()
    }

    pub fn voice_id(&self) -> &str {
        &self.voice_id
    }

    /// True when the voice is the backend-default sentinel
    pub fn uses_default_voice(&self) -> bool {
        self.voice_id == DEFAULT_VOICE
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn playback_speed(&self) -> f64 {
        self.playback_speed
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }
}
