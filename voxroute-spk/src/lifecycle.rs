//! Ownership of the active engine instance and the rebuild decision

use crate::audio::PostProcessor;
use crate::config::{EngineConfig, REBUILD_TOLERANCE};
use crate::device::{DeviceResolver, ResolvedDevice};
use crate::engines::{EngineRegistry, TtsEngine};
use crate::error::SpeechError;
use crate::output::AudioOutput;
use crate::settings::SpeechSettings;
use std::sync::Arc;
use tracing::{info, warn};

/// Whether moving from `current` to `new` requires constructing a new engine.
///
/// Devices compare as sets. Speed and volume compare with a tolerance.
/// Sample rate only matters for engines that honour it.
pub fn config_requires_rebuild(current: &EngineConfig, new: &EngineConfig, supports_sample_rate: bool) -> bool {
    current.engine_id() != new.engine_id()
        || current.device_set() != new.device_set()
        || (current.playback_speed() - new.playback_speed()).abs() > REBUILD_TOLERANCE
        || (current.volume() - new.volume()).abs() > REBUILD_TOLERANCE
        || current.voice_id() != new.voice_id()
        || (supports_sample_rate && current.sample_rate() != new.sample_rate())
}

/// A built engine plus everything fixed at construction
pub struct EngineInstance {
    engine: Box<dyn TtsEngine>,
    display_name: String,
    supports_sample_rate: bool,
    devices: Vec<ResolvedDevice>,
    post_processor: PostProcessor,
}

impl EngineInstance {
    pub fn engine(&self) -> &dyn TtsEngine {
        self.engine.as_ref()
    }

    pub fn config(&self) -> EngineConfig {
        self.engine.describe_config()
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn supports_sample_rate(&self) -> bool {
        self.supports_sample_rate
    }

    /// Devices resolved when this instance was built
    pub fn devices(&self) -> &[ResolvedDevice] {
        &self.devices
    }

    pub fn post_processor(&self) -> PostProcessor {
        self.post_processor
    }

    /// One-line summary for status reporting
    pub fn ready_message(&self) -> String {
        let count = self.devices.len();
        let mut message = format!(
            "Ready - Using {} ({} device{})",
            self.display_name,
            count,
            if count == 1 { "" } else { "s" }
        );

        let speed = self.post_processor.speed();
        if speed != 1.0 {
            message.push_str(&format!(" @ {:.1}x", speed));
        }

        let volume = self.post_processor.volume();
        if volume != 1.0 {
            message.push_str(&format!(" (Vol: {}%)", (volume * 100.0).round() as u32));
        }
        message
    }
}

/// Owns at most one live engine instance.
///
/// The instance is shared out as an `Arc`, so a request holding it keeps it
/// alive across a rebuild; the old engine is dropped once that request ends.
pub struct EngineLifecycle {
    registry: EngineRegistry,
    output: Arc<dyn AudioOutput>,
    settings: Arc<SpeechSettings>,
    active: Option<Arc<EngineInstance>>,
}

impl EngineLifecycle {
    pub fn new(registry: EngineRegistry, output: Arc<dyn AudioOutput>, settings: Arc<SpeechSettings>) -> Self {
        Self {
            registry,
            output,
            settings,
            active: None,
        }
    }

    pub fn registry(&self) -> &EngineRegistry {
        &self.registry
    }

    pub fn active(&self) -> Option<Arc<EngineInstance>> {
        self.active.clone()
    }

    pub fn needs_rebuild(&self, config: &EngineConfig) -> bool {
        match &self.active {
            None => true,
            Some(instance) => {
                config_requires_rebuild(&instance.config(), config, instance.supports_sample_rate())
            }
        }
    }

    /// Construct a new instance from `config` and make it active.
    ///
    /// On failure the previous instance stays active.
    pub async fn rebuild(&mut self, config: &EngineConfig) -> Result<Arc<EngineInstance>, SpeechError> {
        let factory = self.registry.factory(config.engine_id())?;

        let devices = if config.selected_devices().is_empty() {
            Vec::new()
        } else {
            let available = self.output.output_devices().unwrap_or_else(|e| {
                warn!("Device enumeration failed, using identifiers as given: {}", e);
                Vec::new()
            });
            DeviceResolver::new(&available, &self.settings.preferred_default_device)
                .resolve_all(config.selected_devices())
        };

        let engine = factory.build(config, &self.settings).await?;

        let instance = Arc::new(EngineInstance {
            engine,
            display_name: factory.display_name().to_string(),
            supports_sample_rate: factory.supports_sample_rate(),
            devices,
            post_processor: PostProcessor::new(config.playback_speed(), config.volume()),
        });

        info!(
            engine = config.engine_id(),
            devices = instance.devices.len(),
            "Engine instance built"
        );
        self.active = Some(instance.clone());
        Ok(instance)
    }

    /// Active instance for `config`, rebuilding only when the diff requires it
    pub async fn ensure(&mut self, config: &EngineConfig) -> Result<Arc<EngineInstance>, SpeechError> {
        if !self.needs_rebuild(config) {
            if let Some(instance) = &self.active {
                return Ok(instance.clone());
            }
        }
        self.rebuild(config).await
    }
}
