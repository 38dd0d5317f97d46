//! Log of spoken utterances

use crate::error::SpeechError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One completed utterance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub text: String,
    pub engine: String,
    pub voice: String,
    pub speed: f64,
    pub volume: f64,
    pub devices: Vec<String>,
    /// Present only for engines that honour a sample rate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
}

/// Receiver of history records after successful requests
pub trait HistoryStore: Send + Sync {
    fn record(&self, entry: HistoryEntry) -> Result<(), SpeechError>;
}

/// Newest-first history persisted as a JSON array
pub struct JsonHistoryStore {
    path: PathBuf,
    max_items: usize,
    entries: Mutex<Vec<HistoryEntry>>,
}

impl JsonHistoryStore {
    /// Load history from `path`. Missing or unreadable files start empty.
    pub fn open(path: impl Into<PathBuf>, max_items: usize) -> Self {
        let path = path.into();
        let entries = load_json::<Vec<HistoryEntry>>(&path).unwrap_or_default();
        debug!("Loaded {} history entries from {}", entries.len(), path.display());

        Self {
            path,
            max_items: max_items.max(1),
            entries: Mutex::new(entries),
        }
    }

    /// Entries, newest first
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.lock().clone()
    }

    pub fn clear(&self) -> Result<(), SpeechError> {
        let mut entries = self.entries.lock();
        entries.clear();
        save_json(&self.path, &*entries)
    }

    /// Remove the entry at `index`; false if out of range
    pub fn delete(&self, index: usize) -> Result<bool, SpeechError> {
        let mut entries = self.entries.lock();
        if index >= entries.len() {
            return Ok(false);
        }
        entries.remove(index);
        save_json(&self.path, &*entries)?;
        Ok(true)
    }
}

impl HistoryStore for JsonHistoryStore {
    fn record(&self, entry: HistoryEntry) -> Result<(), SpeechError> {
        let mut entries = self.entries.lock();
        entries.insert(0, entry);
        entries.truncate(self.max_items);
        save_json(&self.path, &*entries)
    }
}

/// Read a JSON file, logging and discarding anything unreadable
pub(crate) fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Failed to read {}: {}", path.display(), e);
            return None;
        }
    };

    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring corrupt file {}: {}", path.display(), e);
            None
        }
    }
}

pub(crate) fn save_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), SpeechError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(value)
        .map_err(|e| SpeechError::Config(format!("Failed to serialize {}: {}", path.display(), e)))?;
    std::fs::write(path, json)?;
    Ok(())
}
