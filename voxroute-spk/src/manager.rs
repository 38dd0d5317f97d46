//! Request orchestration: one request at a time, synthesis off the worker,
//! post-processing once, fan-out to every device, status via broadcast events.

use crate::cancel::CancellationFlag;
use crate::config::EngineConfig;
use crate::device::OutputDevice;
use crate::engines::{EngineInfo, EngineRegistry, SynthesizedAudio, VoiceInfo};
use crate::error::SpeechError;
use crate::history::{HistoryEntry, HistoryStore, JsonHistoryStore};
use crate::lifecycle::{EngineInstance, EngineLifecycle};
use crate::output::{AudioOutput, CpalOutput};
use crate::playback::{DeviceStatus, PlaybackFanOut};
use crate::settings::SpeechSettings;
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 256;
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Notifications fired from the worker
#[derive(Debug, Clone, PartialEq)]
pub enum SpeechEvent {
    ProcessingStarted,
    ProcessingEnded,
    Status(String),
    HistoryUpdated,
}

struct SpeechRequest {
    text: String,
    config: EngineConfig,
    output_path: Option<PathBuf>,
    play_audio: bool,
}

impl SpeechRequest {
    fn export_only(&self) -> bool {
        self.output_path.is_some() && !self.play_audio
    }
}

/// How a request that got past engine preparation ended
enum Completion {
    Stopped,
    Finished { warning: Option<String> },
}

struct Shared {
    settings: Arc<SpeechSettings>,
    registry: EngineRegistry,
    output: Arc<dyn AudioOutput>,
    lifecycle: tokio::sync::Mutex<EngineLifecycle>,
    fanout: PlaybackFanOut,
    history: Option<Arc<dyn HistoryStore>>,
    events: broadcast::Sender<SpeechEvent>,
    processing: AtomicBool,
    cancel: CancellationFlag,
}

/// Front door for callers: speak/export text, manage the engine, list resources.
///
/// Must be created inside a tokio runtime; a single worker task handles
/// requests in order and a second request while one is active is rejected.
pub struct SpeechManager {
    shared: Arc<Shared>,
    requests: Mutex<Option<mpsc::UnboundedSender<SpeechRequest>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SpeechManager {
    pub fn new(
        settings: SpeechSettings,
        registry: EngineRegistry,
        output: Arc<dyn AudioOutput>,
        history: Option<Arc<dyn HistoryStore>>,
    ) -> Self {
        let settings = Arc::new(settings);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let lifecycle = EngineLifecycle::new(registry.clone(), output.clone(), settings.clone());

        let shared = Arc::new(Shared {
            fanout: PlaybackFanOut::new(output.clone(), settings.playback_poll_interval()),
            settings,
            registry,
            output,
            lifecycle: tokio::sync::Mutex::new(lifecycle),
            history,
            events,
            processing: AtomicBool::new(false),
            cancel: CancellationFlag::new(),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(shared.clone(), rx));

        Self {
            shared,
            requests: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Built-in engines, cpal output and the JSON history file from `settings`
    pub fn with_defaults(settings: SpeechSettings) -> Self {
        let history: Arc<dyn HistoryStore> = Arc::new(JsonHistoryStore::open(
            settings.history_file.clone(),
            settings.max_history_items,
        ));
        Self::new(
            settings,
            EngineRegistry::with_builtin(),
            Arc::new(CpalOutput::new()),
            Some(history),
        )
    }

    pub fn settings(&self) -> &SpeechSettings {
        &self.shared.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SpeechEvent> {
        self.shared.events.subscribe()
    }

    pub fn is_processing(&self) -> bool {
        self.shared.processing.load(Ordering::SeqCst)
    }

    /// Queue `text` for synthesis, then export and/or playback.
    ///
    /// Never blocks and never fails: rejections and results arrive as events.
    pub fn process_text(&self, text: &str, config: EngineConfig, output_path: Option<PathBuf>, play_audio: bool) {
        let shared = &self.shared;
        if shared
            .processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            shared.status("Already processing...");
            return;
        }

        if text.trim().is_empty() {
            shared.processing.store(false, Ordering::SeqCst);
            shared.status("Please enter some text");
            return;
        }

        if play_audio && config.selected_devices().is_empty() {
            shared.processing.store(false, Ordering::SeqCst);
            shared.status("Error: Please select at least one output device");
            return;
        }

        shared.cancel.reset();
        let request = SpeechRequest {
            text: text.to_string(),
            config,
            output_path,
            play_audio,
        };

        let sent = match self.requests.lock().as_ref() {
            Some(tx) => tx.send(request).is_ok(),
            None => false,
        };

        if !sent {
            shared.processing.store(false, Ordering::SeqCst);
            shared.status("Error: Speech manager is shut down");
        }
    }

    /// Speak `text` on the configured devices
    pub fn speak(&self, text: &str, config: EngineConfig) {
        self.process_text(text, config, None, true);
    }

    /// Write `text` as audio to `path` without playing it
    pub fn export(&self, text: &str, config: EngineConfig, path: impl Into<PathBuf>) {
        self.process_text(text, config, Some(path.into()), false);
    }

    /// Request cancellation of the in-flight request, if any
    pub fn stop(&self) {
        if !self.is_processing() {
            return;
        }
        self.shared.cancel.cancel();
        self.shared.status("Stopping...");
        info!("Stop requested");
    }

    /// Eagerly build an engine for `config` without speaking
    pub async fn update_engine(&self, config: &EngineConfig) -> bool {
        if config.selected_devices().is_empty() {
            self.shared.status("Error: Please select at least one output device");
            return false;
        }

        let mut lifecycle = self.shared.lifecycle.lock().await;
        match self.shared.rebuild(&mut lifecycle, config).await {
            Ok(_) => true,
            Err(e) => {
                self.shared.status(format!("Error initializing engine: {}", e));
                false
            }
        }
    }

    /// Voices of a registered engine; no instance required
    pub async fn list_voices(&self, engine_id: &str) -> Result<Vec<VoiceInfo>, SpeechError> {
        let factory = self.shared.registry.factory(engine_id)?;
        factory.list_voices(&self.shared.settings).await
    }

    pub fn list_devices(&self) -> Result<Vec<OutputDevice>, SpeechError> {
        self.shared.output.output_devices()
    }

    pub fn default_device_name(&self) -> Option<String> {
        self.shared.output.default_output_name()
    }

    pub fn list_engines(&self) -> Vec<EngineInfo> {
        self.shared.registry.list()
    }

    /// Stop accepting requests and wait for the worker to drain
    pub async fn shutdown(&self) {
        self.shared.cancel.cancel();
        self.requests.lock().take();

        let worker = self.worker.lock().take();
        if let Some(handle) = worker {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(())) => info!("Speech worker stopped"),
                Ok(Err(e)) => warn!("Speech worker ended abnormally: {}", e),
                Err(_) => warn!("Speech worker did not stop within {:?}", SHUTDOWN_TIMEOUT),
            }
        }
    }
}

async fn run_worker(shared: Arc<Shared>, mut requests: mpsc::UnboundedReceiver<SpeechRequest>) {
    while let Some(request) = requests.recv().await {
        let request_id = Uuid::new_v4();
        let span = info_span!("speech_request", %request_id, engine = request.config.engine_id());

        let outcome = AssertUnwindSafe(shared.handle(request).instrument(span))
            .catch_unwind()
            .await;

        let (message, started) = outcome.unwrap_or_else(|_| {
            error!(%request_id, "Speech request panicked");
            ("Error: internal failure while processing".to_string(), true)
        });

        // Flag first so a caller reacting to the final status can submit again
        shared.processing.store(false, Ordering::SeqCst);
        shared.status(message);
        if started {
            shared.emit(SpeechEvent::ProcessingEnded);
        }
    }
}

impl Shared {
    fn emit(&self, event: SpeechEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn status(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.emit(SpeechEvent::Status(message));
    }

    /// Build a fresh instance, announcing progress. Callers report the failure.
    async fn rebuild(
        &self,
        lifecycle: &mut EngineLifecycle,
        config: &EngineConfig,
    ) -> Result<Arc<EngineInstance>, SpeechError> {
        self.status("Initializing engine...");
        let instance = lifecycle.rebuild(config).await.map_err(|e| {
            error!("Failed to initialize engine: {}", e);
            e
        })?;
        self.status(instance.ready_message());
        Ok(instance)
    }

    /// Run one request. Returns the terminal status and whether processing started.
    async fn handle(&self, request: SpeechRequest) -> (String, bool) {
        let instance = {
            let mut lifecycle = self.lifecycle.lock().await;
            let reusable = lifecycle.active().filter(|_| !lifecycle.needs_rebuild(&request.config));
            match reusable {
                Some(instance) => instance,
                None => match self.rebuild(&mut lifecycle, &request.config).await {
                    Ok(instance) => instance,
                    Err(e) => return (format!("Error initializing engine: {}", e), false),
                },
            }
        };

        self.emit(SpeechEvent::ProcessingStarted);
        if request.export_only() {
            self.status("Exporting speech...");
        } else {
            self.status(format!("Generating speech with {}...", instance.display_name()));
        }

        let message = match self.run(&instance, &request).await {
            Ok(Completion::Stopped) => "Stopped".to_string(),
            Ok(Completion::Finished { warning }) => {
                self.record_history(&instance, &request);
                let done = match &request.output_path {
                    Some(path) if !request.play_audio => format!("Exported to {}", display_file_name(path)),
                    _ => "Playback complete".to_string(),
                };
                match warning {
                    Some(warning) => format!("{} (warning: {})", done, warning),
                    None => done,
                }
            }
            Err(e) => {
                error!("Speech request failed: {}", e);
                format!("Error: {}", e)
            }
        };

        (message, true)
    }

    /// Synthesis, export and playback. The temp artifact is dropped, and so
    /// deleted, before this returns on every path.
    async fn run(&self, instance: &Arc<EngineInstance>, request: &SpeechRequest) -> Result<Completion, SpeechError> {
        if self.cancel.is_cancelled() {
            return Ok(Completion::Stopped);
        }

        let audio = self.synthesize(instance, &request.text).await?;

        if self.cancel.is_cancelled() {
            info!("Cancelled after synthesis; discarding audio");
            return Ok(Completion::Stopped);
        }

        if let Some(path) = &request.output_path {
            export_file(&audio.file, path).await?;
            info!("Exported audio to {}", path.display());
        }

        if !request.play_audio {
            return Ok(Completion::Finished { warning: None });
        }

        let SynthesizedAudio { buffer, file } = audio;
        let post_processor = instance.post_processor();
        let processed = tokio::task::spawn_blocking(move || post_processor.process(buffer))
            .await
            .map_err(|e| SpeechError::Audio(format!("Post-processing failed: {}", e)))?;

        let report = self
            .fanout
            .play_on_all_devices(Arc::new(processed), instance.devices(), &self.cancel)
            .await;
        drop(file);

        if report.cancelled() || self.cancel.is_cancelled() {
            return Ok(Completion::Stopped);
        }

        let failures = report.failures();
        if report.all_failed() {
            let names: Vec<String> = failures.iter().map(|o| o.device.requested.clone()).collect();
            let reasons: Vec<String> = failures
                .iter()
                .filter_map(|o| match &o.status {
                    DeviceStatus::Failed(reason) => Some(reason.clone()),
                    _ => None,
                })
                .collect();
            return Err(SpeechError::Device {
                device: names.join(", "),
                message: format!("playback failed on every device: {}", reasons.join("; ")),
            });
        }

        let warning = (!failures.is_empty()).then(|| {
            let names: Vec<&str> = failures.iter().map(|o| o.device.requested.as_str()).collect();
            format!(
                "{} of {} device(s) failed: {}",
                failures.len(),
                report.outcomes.len(),
                names.join(", ")
            )
        });

        Ok(Completion::Finished { warning })
    }

    /// Synthesis runs on its own task so the worker stays responsive
    async fn synthesize(&self, instance: &Arc<EngineInstance>, text: &str) -> Result<SynthesizedAudio, SpeechError> {
        let instance = instance.clone();
        let text = text.to_string();
        debug!("Synthesizing {} chars with '{}'", text.chars().count(), instance.engine().name());
        let task = tokio::spawn(async move { instance.engine().synthesize(&text).await });

        match task.await {
            Ok(result) => result,
            Err(e) => Err(SpeechError::Synthesis(format!("Synthesis task failed: {}", e))),
        }
    }

    fn record_history(&self, instance: &EngineInstance, request: &SpeechRequest) {
        let Some(history) = &self.history else {
            return;
        };

        let config = &request.config;
        let entry = HistoryEntry {
            timestamp: chrono::Utc::now(),
            text: request.text.clone(),
            engine: instance.engine().name().to_string(),
            voice: config.voice_id().to_string(),
            speed: config.playback_speed(),
            volume: config.volume(),
            devices: config.selected_devices().to_vec(),
            sample_rate: instance.supports_sample_rate().then(|| config.sample_rate()),
        };

        match history.record(entry) {
            Ok(()) => self.emit(SpeechEvent::HistoryUpdated),
            Err(e) => warn!("Failed to record history: {}", e),
        }
    }
}

/// Byte-for-byte copy of the synthesized file
async fn export_file(source: &Path, destination: &Path) -> Result<(), SpeechError> {
    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    tokio::fs::copy(source, destination).await.map_err(|e| {
        SpeechError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to export to {}: {}", destination.display(), e),
        ))
    })?;
    Ok(())
}

fn display_file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
