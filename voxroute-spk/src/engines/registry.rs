//! Explicit engine registry populated at startup

use super::TtsEngine;
use crate::config::EngineConfig;
use crate::error::SpeechError;
use crate::settings::SpeechSettings;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

/// A selectable voice
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoiceInfo {
    pub id: String,
    pub display_name: String,
}

impl VoiceInfo {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Static description of a registered engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineInfo {
    pub id: String,
    pub display_name: String,
    pub supports_sample_rate: bool,
}

/// Constructs engine instances and answers class-level questions without one
#[async_trait]
pub trait EngineFactory: Send + Sync {
    fn id(&self) -> &str;

    fn display_name(&self) -> &str;

    /// Whether `sample_rate` in the configuration affects output
    fn supports_sample_rate(&self) -> bool;

    /// Perform all expensive setup now; fail with `SpeechError::Initialization`
    async fn build(
        &self,
        config: &EngineConfig,
        settings: &SpeechSettings,
    ) -> Result<Box<dyn TtsEngine>, SpeechError>;

    async fn list_voices(&self, settings: &SpeechSettings) -> Result<Vec<VoiceInfo>, SpeechError>;

    fn info(&self) -> EngineInfo {
        EngineInfo {
            id: self.id().to_string(),
            display_name: self.display_name().to_string(),
            supports_sample_rate: self.supports_sample_rate(),
        }
    }
}

/// Engine id to factory mapping, listed in registration order
#[derive(Clone, Default)]
pub struct EngineRegistry {
    factories: Vec<Arc<dyn EngineFactory>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every backend shipped in this crate
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(super::native::NativeEngineFactory));
        registry.register(Arc::new(super::bark::BarkEngineFactory::default()));
        registry.register(Arc::new(super::piper::PiperEngineFactory));
        registry
    }

    /// Add a factory, replacing any existing one with the same id
    pub fn register(&mut self, factory: Arc<dyn EngineFactory>) {
        self.factories.retain(|f| f.id() != factory.id());
        self.factories.push(factory);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn EngineFactory>> {
        self.factories.iter().find(|f| f.id() == id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn list(&self) -> Vec<EngineInfo> {
        self.factories.iter().map(|f| f.info()).collect()
    }

    /// Look up `id`, reporting unknown engines as initialization failures
    pub fn factory(&self, id: &str) -> Result<Arc<dyn EngineFactory>, SpeechError> {
        self.get(id).ok_or_else(|| {
            let known: Vec<&str> = self.factories.iter().map(|f| f.id()).collect();
            SpeechError::Initialization(format!(
                "Unknown engine '{}'. Available engines: {}",
                id,
                known.join(", ")
            ))
        })
    }
}
