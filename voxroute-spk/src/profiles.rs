//! Named engine configurations

use crate::config::EngineConfig;
use crate::error::SpeechError;
use crate::history::{load_json, save_json};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Profiles persisted as a JSON object keyed by name
pub struct JsonProfileStore {
    path: PathBuf,
    profiles: Mutex<BTreeMap<String, EngineConfig>>,
}

impl JsonProfileStore {
    /// Load profiles from `path`. Missing or corrupt files start empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let profiles = load_json(&path).unwrap_or_default();
        Self {
            path,
            profiles: Mutex::new(profiles),
        }
    }

    /// Store `config` under `name`, replacing any existing profile
    pub fn save(&self, name: &str, config: &EngineConfig) -> Result<(), SpeechError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SpeechError::Validation("Profile name cannot be empty".to_string()));
        }

        let mut profiles = self.profiles.lock();
        profiles.insert(name.to_string(), config.clone());
        save_json(&self.path, &*profiles)
    }

    pub fn load(&self, name: &str) -> Option<EngineConfig> {
        self.profiles.lock().get(name).cloned()
    }

    /// Remove a profile; false if it did not exist
    pub fn delete(&self, name: &str) -> Result<bool, SpeechError> {
        let mut profiles = self.profiles.lock();
        if profiles.remove(name).is_none() {
            return Ok(false);
        }
        save_json(&self.path, &*profiles)?;
        Ok(true)
    }

    /// Profile names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.profiles.lock().keys().cloned().collect()
    }
}
