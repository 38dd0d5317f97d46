//! voxroute-spk: Speech routed to multiple audio outputs
//!
//! Provides:
//! - A common contract over text-to-speech backends (OS command, generative model, Piper)
//! - Device resolution by index, exact name or substring
//! - Volume and speed post-processing applied once per utterance
//! - Concurrent playback on every selected device with cooperative cancellation
//! - An orchestrator that rebuilds engines only when the configuration demands it

pub mod audio;
pub mod cancel;
pub mod config;
pub mod device;
pub mod engines;
pub mod error;
pub mod history;
pub mod lifecycle;
pub mod manager;
pub mod output;
pub mod playback;
pub mod profiles;
pub mod settings;

pub use audio::{AudioBuffer, PostProcessor};
pub use cancel::CancellationFlag;
pub use config::EngineConfig;
pub use device::{DeviceHandle, DeviceResolver, OutputDevice, ResolvedDevice};
pub use engines::{EngineFactory, EngineInfo, EngineRegistry, SynthesizedAudio, TtsEngine, VoiceInfo};
pub use error::SpeechError;
pub use history::{HistoryEntry, HistoryStore, JsonHistoryStore};
pub use lifecycle::{config_requires_rebuild, EngineInstance, EngineLifecycle};
pub use manager::{SpeechEvent, SpeechManager};
pub use output::{AudioOutput, CpalOutput, PlaybackStream};
pub use playback::{DeviceOutcome, DeviceStatus, FanOutReport, PlaybackFanOut};
pub use profiles::JsonProfileStore;
pub use settings::SpeechSettings;
