//! Shared test doubles: an in-memory audio output and a scripted engine

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::cell::Cell;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use voxroute_spk::engines::temp_wav_path;
use voxroute_spk::{
    AudioBuffer, AudioOutput, DeviceHandle, EngineConfig, EngineFactory, OutputDevice, PlaybackStream,
    SpeechError, SpeechEvent, SpeechSettings, SynthesizedAudio, TtsEngine, VoiceInfo,
};

pub fn device(name: &str, index: usize) -> OutputDevice {
    OutputDevice {
        name: name.to_string(),
        index,
        max_output_channels: 2,
        default_sample_rate: 48_000,
    }
}

/// Audio output that records what each device was asked to play
pub struct FakeOutput {
    devices: Vec<OutputDevice>,
    fail_on_start: HashSet<String>,
    fail_mid_stream: HashSet<String>,
    hold: bool,
    polls_to_finish: usize,
    played: Mutex<Vec<(DeviceHandle, Arc<AudioBuffer>)>>,
    stops: Arc<AtomicUsize>,
}

impl FakeOutput {
    pub fn with_devices(names: &[&str]) -> Self {
        Self {
            devices: names.iter().enumerate().map(|(i, n)| device(n, i)).collect(),
            fail_on_start: HashSet::new(),
            fail_mid_stream: HashSet::new(),
            hold: false,
            polls_to_finish: 3,
            played: Mutex::new(Vec::new()),
            stops: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Opening this device fails
    pub fn failing_on_start(mut self, name: &str) -> Self {
        self.fail_on_start.insert(name.to_string());
        self
    }

    /// This device starts, then reports a stream error
    pub fn failing_mid_stream(mut self, name: &str) -> Self {
        self.fail_mid_stream.insert(name.to_string());
        self
    }

    /// Streams never finish on their own
    pub fn holding(mut self) -> Self {
        self.hold = true;
        self
    }

    pub fn played(&self) -> Vec<(DeviceHandle, Arc<AudioBuffer>)> {
        self.played.lock().clone()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl AudioOutput for FakeOutput {
    fn output_devices(&self) -> Result<Vec<OutputDevice>, SpeechError> {
        Ok(self.devices.clone())
    }

    fn default_output_name(&self) -> Option<String> {
        self.devices.first().map(|d| d.name.clone())
    }

    fn start(
        &self,
        handle: &DeviceHandle,
        buffer: Arc<AudioBuffer>,
    ) -> Result<Box<dyn PlaybackStream>, SpeechError> {
        let label = handle.to_string();
        if self.fail_on_start.contains(&label) {
            return Err(SpeechError::Device {
                device: label,
                message: "device disconnected".to_string(),
            });
        }

        self.played.lock().push((handle.clone(), buffer));
        Ok(Box::new(FakeStream {
            label: label.clone(),
            remaining: Cell::new(self.polls_to_finish),
            hold: self.hold,
            fail: self.fail_mid_stream.contains(&label),
            stops: self.stops.clone(),
        }))
    }
}

struct FakeStream {
    label: String,
    remaining: Cell<usize>,
    hold: bool,
    fail: bool,
    stops: Arc<AtomicUsize>,
}

impl PlaybackStream for FakeStream {
    fn is_finished(&self) -> Result<bool, SpeechError> {
        if self.fail {
            return Err(SpeechError::Device {
                device: self.label.clone(),
                message: "stream underrun".to_string(),
            });
        }
        if self.hold {
            return Ok(false);
        }
        let left = self.remaining.get();
        if left == 0 {
            return Ok(true);
        }
        self.remaining.set(left - 1);
        Ok(false)
    }

    fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Deterministic ramp used by the fake engine
pub fn ramp(frames: usize, sample_rate: u32) -> AudioBuffer {
    let samples = (0..frames).map(|i| (i % 100) as f32 / 200.0).collect();
    AudioBuffer::mono(samples, sample_rate)
}

/// Engine factory with scripted behaviour and call counters
pub struct FakeEngineFactory {
    id: String,
    supports_sample_rate: bool,
    frames: usize,
    fail_build: bool,
    fail_synthesis: bool,
    delay: Duration,
    builds: AtomicUsize,
    synth_calls: Arc<AtomicUsize>,
}

impl FakeEngineFactory {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            supports_sample_rate: false,
            frames: 2400,
            fail_build: false,
            fail_synthesis: false,
            delay: Duration::ZERO,
            builds: AtomicUsize::new(0),
            synth_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn supporting_sample_rate(mut self) -> Self {
        self.supports_sample_rate = true;
        self
    }

    pub fn failing_build(mut self) -> Self {
        self.fail_build = true;
        self
    }

    pub fn failing_synthesis(mut self) -> Self {
        self.fail_synthesis = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn synth_calls(&self) -> usize {
        self.synth_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineFactory for FakeEngineFactory {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        "Fake Engine"
    }

    fn supports_sample_rate(&self) -> bool {
        self.supports_sample_rate
    }

    async fn build(
        &self,
        config: &EngineConfig,
        settings: &SpeechSettings,
    ) -> Result<Box<dyn TtsEngine>, SpeechError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if self.fail_build {
            return Err(SpeechError::Initialization("fake runtime is not installed".to_string()));
        }

        Ok(Box::new(FakeEngine {
            id: self.id.clone(),
            config: config.clone(),
            temp_dir: settings.temp_dir.clone(),
            frames: self.frames,
            fail: self.fail_synthesis,
            delay: self.delay,
            calls: self.synth_calls.clone(),
        }))
    }

    async fn list_voices(&self, _settings: &SpeechSettings) -> Result<Vec<VoiceInfo>, SpeechError> {
        Ok(vec![VoiceInfo::new("alpha", "Alpha"), VoiceInfo::new("beta", "Beta")])
    }
}

struct FakeEngine {
    id: String,
    config: EngineConfig,
    temp_dir: std::path::PathBuf,
    frames: usize,
    fail: bool,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl TtsEngine for FakeEngine {
    async fn synthesize(&self, _text: &str) -> Result<SynthesizedAudio, SpeechError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let file = temp_wav_path(&self.temp_dir)?;
        tokio::time::sleep(self.delay).await;

        if self.fail {
            return Err(SpeechError::Synthesis("fake synthesis failed".to_string()));
        }

        let buffer = ramp(self.frames, 24_000);
        buffer.write_wav(&file)?;
        Ok(SynthesizedAudio { buffer, file })
    }

    fn describe_config(&self) -> EngineConfig {
        self.config.clone()
    }

    fn name(&self) -> &str {
        &self.id
    }
}

/// Settings rooted in a test directory with a short poll interval
pub fn test_settings(root: &Path) -> SpeechSettings {
    let mut settings = SpeechSettings::default();
    settings.temp_dir = root.join("audio");
    settings.history_file = root.join("history.json");
    settings.profiles_file = root.join("profiles.json");
    settings.playback_poll_interval_ms = 10;
    settings
}

/// Files left in a directory (missing directory counts as empty)
pub fn residual_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

/// Receive events until `done` matches one, or ten seconds pass
pub async fn collect_until<F>(rx: &mut broadcast::Receiver<SpeechEvent>, done: F) -> Vec<SpeechEvent>
where
    F: Fn(&SpeechEvent) -> bool,
{
    let mut events = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(10), async {
        while let Ok(event) = rx.recv().await {
            let finished = done(&event);
            events.push(event);
            if finished {
                break;
            }
        }
    })
    .await;
    events
}

pub fn statuses(events: &[SpeechEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            SpeechEvent::Status(s) => Some(s.clone()),
            _ => None,
        })
        .collect()
}

pub fn is_ended(event: &SpeechEvent) -> bool {
    matches!(event, SpeechEvent::ProcessingEnded)
}

/// Write an executable shell script standing in for a speech command
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
