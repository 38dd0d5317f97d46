//! Concurrent playback of one buffer on every resolved device

use crate::audio::AudioBuffer;
use crate::cancel::CancellationFlag;
use crate::device::ResolvedDevice;
use crate::output::AudioOutput;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Extra time a stream may take past the buffer duration before it is abandoned
const STALL_GRACE: Duration = Duration::from_secs(5);

/// Terminal state of one device task
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceStatus {
    Completed,
    Cancelled,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct DeviceOutcome {
    pub device: ResolvedDevice,
    pub status: DeviceStatus,
}

/// Per-device results of one fan-out, in device order
#[derive(Debug, Clone, Default)]
pub struct FanOutReport {
    pub outcomes: Vec<DeviceOutcome>,
}

impl FanOutReport {
    pub fn completed(&self) -> usize {
        self.count(|s| matches!(s, DeviceStatus::Completed))
    }

    pub fn cancelled(&self) -> bool {
        self.outcomes
            .iter()
            .any(|o| matches!(o.status, DeviceStatus::Cancelled))
    }

    pub fn failures(&self) -> Vec<&DeviceOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, DeviceStatus::Failed(_)))
            .collect()
    }

    /// True when there was at least one device and none of them played
    pub fn all_failed(&self) -> bool {
        !self.outcomes.is_empty() && self.failures().len() == self.outcomes.len()
    }

    fn count<F: Fn(&DeviceStatus) -> bool>(&self, f: F) -> usize {
        self.outcomes.iter().filter(|o| f(&o.status)).count()
    }
}

/// Plays a buffer on N devices at once
#[derive(Clone)]
pub struct PlaybackFanOut {
    output: Arc<dyn AudioOutput>,
    poll_interval: Duration,
}

impl PlaybackFanOut {
    pub fn new(output: Arc<dyn AudioOutput>, poll_interval: Duration) -> Self {
        Self {
            output,
            poll_interval,
        }
    }

    /// Start one blocking task per device and wait for all of them.
    ///
    /// A failing device never affects its siblings. Cancellation stops every
    /// task within one poll interval.
    pub async fn play_on_all_devices(
        &self,
        buffer: Arc<AudioBuffer>,
        devices: &[ResolvedDevice],
        cancel: &CancellationFlag,
    ) -> FanOutReport {
        let tasks = devices.iter().cloned().map(|device| {
            let output = self.output.clone();
            let buffer = buffer.clone();
            let cancel = cancel.clone();
            let poll_interval = self.poll_interval;
            tokio::task::spawn_blocking(move || {
                play_on_device(output.as_ref(), &device, buffer, &cancel, poll_interval)
            })
        });

        let results = join_all(tasks).await;

        let outcomes = devices
            .iter()
            .cloned()
            .zip(results)
            .map(|(device, result)| {
                let status = result.unwrap_or_else(|e| {
                    error!(device = %device, "Playback task aborted: {}", e);
                    DeviceStatus::Failed(format!("playback task aborted: {}", e))
                });
                DeviceOutcome { device, status }
            })
            .collect();

        FanOutReport { outcomes }
    }
}

fn play_on_device(
    output: &dyn AudioOutput,
    device: &ResolvedDevice,
    buffer: Arc<AudioBuffer>,
    cancel: &CancellationFlag,
    poll_interval: Duration,
) -> DeviceStatus {
    if cancel.is_cancelled() {
        return DeviceStatus::Cancelled;
    }

    let deadline = Instant::now() + buffer.duration() + STALL_GRACE;
    let mut stream = match output.start(&device.handle, buffer) {
        Ok(stream) => stream,
        Err(e) => {
            error!(device = %device, "Failed to start playback: {}", e);
            return DeviceStatus::Failed(e.to_string());
        }
    };
    debug!(device = %device, "Playback started");

    loop {
        if cancel.is_cancelled() {
            stream.stop();
            info!(device = %device, "Playback stopped");
            return DeviceStatus::Cancelled;
        }

        match stream.is_finished() {
            Ok(true) => {
                stream.stop();
                debug!(device = %device, "Playback finished");
                return DeviceStatus::Completed;
            }
            Ok(false) if Instant::now() > deadline => {
                stream.stop();
                error!(device = %device, "Playback stalled");
                return DeviceStatus::Failed("playback stalled".to_string());
            }
            Ok(false) => {}
            Err(e) => {
                stream.stop();
                error!(device = %device, "Playback failed: {}", e);
                return DeviceStatus::Failed(e.to_string());
            }
        }

        std::thread::sleep(poll_interval);
    }
}
