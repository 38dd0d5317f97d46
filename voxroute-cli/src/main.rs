// VoxRoute Command Line Interface
// Speak or export text through one or more audio output devices

use anyhow::{anyhow, Context};
use clap::Parser;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use voxroute_spk::{EngineConfig, JsonProfileStore, SpeechEvent, SpeechManager, SpeechSettings};

/// How long to keep listening for trailing events once the worker is idle
const DRAIN_WINDOW: Duration = Duration::from_millis(200);

#[derive(Parser)]
#[command(name = "voxroute")]
#[command(about = "Speak text through one or more audio output devices", long_about = None)]
#[command(version)]
struct Cli {
    /// Engine id (say, bark, piper)
    #[arg(long, short)]
    engine: Option<String>,

    /// Output device name, substring or index; repeat for several devices
    #[arg(long = "device", short = 'd')]
    devices: Vec<String>,

    /// Voice id for the selected engine
    #[arg(long)]
    voice: Option<String>,

    /// Sample rate for engines that support one
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Playback speed (0.5 - 2.0)
    #[arg(long)]
    speed: Option<f64>,

    /// Volume (0.0 - 1.0)
    #[arg(long)]
    volume: Option<f64>,

    /// Speak this text once and exit
    #[arg(long, short)]
    text: Option<String>,

    /// Write audio to this file instead of playing it
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// List registered engines
    #[arg(long)]
    list_engines: bool,

    /// List voices of the selected engine
    #[arg(long)]
    list_voices: bool,

    /// List output devices
    #[arg(long)]
    list_devices: bool,

    /// Start from a saved profile
    #[arg(long)]
    profile: Option<String>,

    /// Save the resulting configuration as a profile
    #[arg(long)]
    save_profile: Option<String>,

    /// Settings file (JSON or TOML)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,

    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => SpeechSettings::from_file(path)?,
        None => SpeechSettings::default(),
    };
    settings.apply_env();
    settings
        .validate()
        .map_err(|e| anyhow!("Invalid settings: {}", e))?;

    init_logging(&cli, &settings);

    let profiles = JsonProfileStore::open(settings.profiles_file.clone());
    let config = build_config(&cli, &settings, &profiles)?;

    if let Some(name) = &cli.save_profile {
        profiles
            .save(name, &config)
            .with_context(|| format!("Failed to save profile '{}'", name))?;
        println!("Saved profile '{}'", name);
    }

    let manager = SpeechManager::with_defaults(settings);

    if cli.list_engines || cli.list_voices || cli.list_devices {
        if cli.list_engines {
            print_engines(&manager);
        }
        if cli.list_voices {
            print_voices(&manager, config.engine_id()).await?;
        }
        if cli.list_devices {
            print_devices(&manager)?;
        }
        manager.shutdown().await;
        return Ok(());
    }

    let play_audio = cli.output.is_none();
    let mut events = manager.subscribe();

    // Fail early on a broken engine when we are going to play
    if play_audio {
        let ready = manager.update_engine(&config).await;
        drain_events(&mut events);
        if !ready {
            manager.shutdown().await;
            std::process::exit(1);
        }
    }

    let succeeded = match &cli.text {
        Some(text) => {
            manager.process_text(text, config, cli.output.clone(), play_audio);
            wait_for_request(&manager, &mut events).await.ok
        }
        None => interactive(&manager, &mut events, &config, cli.output.as_ref(), play_audio).await?,
    };

    manager.shutdown().await;
    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}

fn init_logging(cli: &Cli, settings: &SpeechSettings) {
    let explicit = cli
        .log_level
        .clone()
        .or_else(|| cli.verbose.then(|| "info".to_string()));

    let filter = match explicit {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_level)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Profile (or defaults) overlaid with command line flags
fn build_config(cli: &Cli, settings: &SpeechSettings, profiles: &JsonProfileStore) -> anyhow::Result<EngineConfig> {
    let mut config = match &cli.profile {
        Some(name) => profiles
            .load(name)
            .ok_or_else(|| anyhow!("Profile '{}' not found. Saved profiles: {}", name, profiles.names().join(", ")))?,
        None => EngineConfig::new(settings.default_engine.clone())
            .with_sample_rate(settings.default_sample_rate)
            .with_devices([settings.preferred_default_device.clone()]),
    };

    if let Some(engine) = &cli.engine {
        config = EngineConfig::new(engine.clone())
            .with_devices(config.selected_devices().to_vec())
            .with_voice(config.voice_id())
            .with_sample_rate(config.sample_rate())
            .with_speed(config.playback_speed())
            .with_volume(config.volume());
    }
    if !cli.devices.is_empty() {
        config = config.with_devices(cli.devices.clone());
    }
    if let Some(voice) = &cli.voice {
        config = config.with_voice(voice.clone());
    }
    if let Some(rate) = cli.sample_rate {
        config = config.with_sample_rate(rate);
    }
    if let Some(speed) = cli.speed {
        config = config.with_speed(speed);
    }
    if let Some(volume) = cli.volume {
        config = config.with_volume(volume);
    }

    debug!(?config, "Effective configuration");
    Ok(config)
}

fn print_engines(manager: &SpeechManager) {
    println!("\nAvailable engines:\n");
    println!("{:<10} {:<26} Sample rate", "Engine ID", "Name");
    println!("{}", "-".repeat(50));
    for engine in manager.list_engines() {
        println!(
            "{:<10} {:<26} {}",
            engine.id,
            engine.display_name,
            if engine.supports_sample_rate { "yes" } else { "no" }
        );
    }
}

async fn print_voices(manager: &SpeechManager, engine_id: &str) -> anyhow::Result<()> {
    let voices = manager
        .list_voices(engine_id)
        .await
        .with_context(|| format!("Failed to list voices for '{}'", engine_id))?;

    println!("\nAvailable voices for {} ({} total):\n", engine_id, voices.len());
    println!("{:<30} Display Name", "Voice ID");
    println!("{}", "-".repeat(70));
    for voice in voices {
        println!("{:<30} {}", voice.id, voice.display_name);
    }
    Ok(())
}

fn print_devices(manager: &SpeechManager) -> anyhow::Result<()> {
    let devices = manager.list_devices()?;
    let default = manager.default_device_name();

    println!("\nOutput devices:\n");
    println!("  {:>5}  {:>8}  {:>11}  Name", "Index", "Channels", "Sample rate");
    for device in devices {
        let marker = if default.as_deref() == Some(device.name.as_str()) { "*" } else { " " };
        println!(
            "{} {:>5}  {:>8}  {:>11}  {}",
            marker, device.index, device.max_output_channels, device.default_sample_rate, device.name
        );
    }
    println!("\n  * system default");
    Ok(())
}

/// Read lines from stdin and speak each until EOF, "quit" or Ctrl+C
async fn interactive(
    manager: &SpeechManager,
    events: &mut broadcast::Receiver<SpeechEvent>,
    config: &EngineConfig,
    output: Option<&PathBuf>,
    play_audio: bool,
) -> anyhow::Result<bool> {
    println!("Type text and press Enter to speak. 'quit' or Ctrl+C exits.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut all_ok = true;

    loop {
        eprint!("> ");
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };

        let Some(line) = line else { break };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text == "quit" || text == "exit" {
            break;
        }

        manager.process_text(text, config.clone(), output.cloned(), play_audio);
        let outcome = wait_for_request(manager, events).await;
        all_ok &= outcome.ok;
        if outcome.interrupted {
            break;
        }
    }

    Ok(all_ok)
}

/// How a watched request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RequestOutcome {
    /// False if the request ended with an error status
    ok: bool,
    /// Ctrl+C arrived while waiting
    interrupted: bool,
}

/// Print events until the request finishes. Ctrl+C stops playback.
async fn wait_for_request(manager: &SpeechManager, events: &mut broadcast::Receiver<SpeechEvent>) -> RequestOutcome {
    watch_request(manager, events, tokio::signal::ctrl_c()).await
}

async fn watch_request<F>(
    manager: &SpeechManager,
    events: &mut broadcast::Receiver<SpeechEvent>,
    interrupt: F,
) -> RequestOutcome
where
    F: Future<Output = std::io::Result<()>>,
{
    tokio::pin!(interrupt);
    let mut outcome = RequestOutcome { ok: true, interrupted: false };
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = &mut interrupt, if !outcome.interrupted => {
                // Keep listening so the final "Stopped" status is printed
                manager.stop();
                outcome.interrupted = true;
                continue;
            }
            _ = tokio::time::sleep(DRAIN_WINDOW), if !manager.is_processing() => break,
        };

        match event {
            Ok(SpeechEvent::Status(message)) => {
                outcome.ok = !message.starts_with("Error");
                println!("{}", message);
            }
            Ok(SpeechEvent::ProcessingEnded) => break,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => debug!("Missed {} events", n),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    drain_events(events);
    outcome
}

fn drain_events(events: &mut broadcast::Receiver<SpeechEvent>) {
    while let Ok(event) = events.try_recv() {
        if let SpeechEvent::Status(message) = event {
            println!("{}", message);
        }
    }
}
