//! OS speech command backend
//!
//! macOS: `say`. Linux: `espeak-ng`. Other platforms are rejected at construction.

use super::process::{resolve_binary, run};
use super::registry::{EngineFactory, VoiceInfo};
use super::{temp_wav_path, SynthesizedAudio, TtsEngine};
use crate::config::EngineConfig;
use crate::error::SpeechError;
use crate::settings::SpeechSettings;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

pub const ENGINE_ID: &str = "say";

const VOICE_LIST_TIMEOUT: Duration = Duration::from_secs(5);

/// Which speech command this platform provides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeFlavor {
    /// macOS `say`
    Say,
    /// `espeak-ng`
    Espeak,
}

impl NativeFlavor {
    pub fn for_platform() -> Result<Self, SpeechError> {
        if cfg!(target_os = "macos") {
            Ok(NativeFlavor::Say)
        } else if cfg!(target_os = "linux") {
            Ok(NativeFlavor::Espeak)
        } else {
            Err(SpeechError::Initialization(
                "System speech is only available on macOS (say) and Linux (espeak-ng)".to_string(),
            ))
        }
    }

    pub fn program(&self) -> &'static str {
        match self {
            NativeFlavor::Say => "say",
            NativeFlavor::Espeak => "espeak-ng",
        }
    }

    fn synthesis_args(&self, voice: Option<&str>, output: &Path, text: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        if let Some(voice) = voice {
            args.push("-v".into());
            args.push(voice.into());
        }

        match self {
            NativeFlavor::Say => {
                args.push("-o".into());
                args.push(output.into());
                args.push("--file-format=WAVE".into());
                args.push("--data-format=LEI16@22050".into());
            }
            NativeFlavor::Espeak => {
                args.push("-w".into());
                args.push(output.into());
            }
        }

        // Text starting with '-' must not be read as an option
        args.push("--".into());
        args.push(text.into());
        args
    }

    fn voice_list_args(&self) -> Vec<&'static str> {
        match self {
            NativeFlavor::Say => vec!["-v", "?"],
            NativeFlavor::Espeak => vec!["--voices"],
        }
    }

    /// Parse the command's voice listing
    pub fn parse_voices(&self, listing: &str) -> Vec<VoiceInfo> {
        match self {
            NativeFlavor::Say => parse_say_voices(listing),
            NativeFlavor::Espeak => parse_espeak_voices(listing),
        }
    }
}

/// `Name  lang_CODE  # description`; names may contain spaces
fn parse_say_voices(listing: &str) -> Vec<VoiceInfo> {
    listing
        .lines()
        .filter_map(|line| {
            let (head, desc) = match line.split_once('#') {
                Some((head, desc)) => (head.trim(), desc.trim()),
                None => (line.trim(), ""),
            };
            let (name, lang) = head.rsplit_once(char::is_whitespace)?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }

            let mut display = format!("{} ({})", name, lang.trim());
            if !desc.is_empty() {
                display.push_str(" - ");
                display.push_str(desc);
            }
            Some(VoiceInfo::new(name, display))
        })
        .collect()
}

/// `Pty Language Age/Gender VoiceName File ...` table
fn parse_espeak_voices(listing: &str) -> Vec<VoiceInfo> {
    listing
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("Pty"))
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 4 {
                return None;
            }
            Some(VoiceInfo::new(cols[1], format!("{} ({})", cols[3].replace('_', " "), cols[1])))
        })
        .collect()
}

/// Speech via the OS command line synthesizer
pub struct NativeTtsEngine {
    command: PathBuf,
    flavor: NativeFlavor,
    voice: Option<String>,
    temp_dir: PathBuf,
    timeout: Duration,
    config: EngineConfig,
}

impl NativeTtsEngine {
    /// Check the command is available and fix the voice
    pub fn new(config: &EngineConfig, settings: &SpeechSettings) -> Result<Self, SpeechError> {
        let flavor = NativeFlavor::for_platform()?;
        let command = resolve_binary(settings.native_command.as_deref(), flavor.program())?;

        // "Default" leaves voice choice to the command
        let voice = (!config.uses_default_voice()).then(|| config.voice_id().to_string());

        info!(
            "Initialized native speech with command={}, voice={:?}, timeout={}s",
            command.display(),
            voice,
            settings.synthesis_timeout_secs
        );

        Ok(Self {
            command,
            flavor,
            voice,
            temp_dir: settings.temp_dir.clone(),
            timeout: settings.synthesis_timeout(),
            config: config.clone(),
        })
    }
}

#[async_trait]
impl TtsEngine for NativeTtsEngine {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, SpeechError> {
        let output = temp_wav_path(&self.temp_dir)?;

        let mut cmd = Command::new(&self.command);
        cmd.args(self.flavor.synthesis_args(self.voice.as_deref(), &output, text));
        debug!("Running {} for {} chars", self.flavor.program(), text.chars().count());

        run(cmd, self.flavor.program(), None, self.timeout).await?;
        SynthesizedAudio::from_file(output)
    }

    fn describe_config(&self) -> EngineConfig {
        self.config.clone()
    }

    fn name(&self) -> &str {
        ENGINE_ID
    }
}

/// Registry entry for the OS speech command
pub struct NativeEngineFactory;

#[async_trait]
impl EngineFactory for NativeEngineFactory {
    fn id(&self) -> &str {
        ENGINE_ID
    }

    fn display_name(&self) -> &str {
        "System Speech (Fast)"
    }

    fn supports_sample_rate(&self) -> bool {
        false
    }

    async fn build(
        &self,
        config: &EngineConfig,
        settings: &SpeechSettings,
    ) -> Result<Box<dyn TtsEngine>, SpeechError> {
        Ok(Box::new(NativeTtsEngine::new(config, settings)?))
    }

    async fn list_voices(&self, settings: &SpeechSettings) -> Result<Vec<VoiceInfo>, SpeechError> {
        let flavor = NativeFlavor::for_platform()?;
        let command = resolve_binary(settings.native_command.as_deref(), flavor.program())?;

        let mut cmd = Command::new(command);
        cmd.args(flavor.voice_list_args());
        let stdout = run(cmd, flavor.program(), None, VOICE_LIST_TIMEOUT).await?;

        let voices = flavor.parse_voices(&String::from_utf8_lossy(&stdout));
        info!("Found {} available voices", voices.len());
        Ok(voices)
    }
}
