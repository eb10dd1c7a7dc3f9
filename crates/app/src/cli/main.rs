//! Sonority CLI Application

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use sonority_core::domain::audio::{enumerate_topology, AudioBackend, DeviceDescriptor};
use sonority_core::domain::config::{AudioConfig, ConfigManager};
use sonority_core::domain::events::DeviceEvent;
use sonority_core::domain::orchestrator::{AudioOrchestrator, OrchestratorOptions};
use sonority_core::domain::store::{MemoryResourceStore, ResourceStore};
use sonority_core::domain::thread::AudioThread;
use sonority_core::domain::virtual_backend::VirtualBackend;
use sonority_infra::audio::{AudioEngine, CpalBackend, DEFAULT_TICK};
use sonority_infra::resources::DirectoryResourceStore;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "sonority")]
#[command(about = "Audio device hot-plug and mixer routing", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List output devices
    Devices {
        /// Print the device table as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the audio engine and report device changes until Ctrl-C
    Monitor {
        /// Preferred output device, overriding the config file
        #[arg(short, long)]
        device: Option<String>,

        /// Configuration directory
        #[arg(long)]
        config: Option<PathBuf>,

        /// Directory to load samples from
        #[arg(long)]
        samples: Option<PathBuf>,

        /// Sample to play once a device is selected
        #[arg(long, requires = "samples")]
        play: Option<String>,
    },
}

#[derive(Serialize)]
struct DeviceListing<'a> {
    backend: String,
    devices: &'a [DeviceDescriptor],
}

fn backend(headless: bool) -> anyhow::Result<Arc<dyn AudioBackend>> {
    if headless {
        return Ok(Arc::new(VirtualBackend::new()));
    }
    Ok(Arc::new(CpalBackend::new().context("Failed to open audio host")?))
}

fn list_devices(json: bool) -> anyhow::Result<()> {
    let backend = backend(false)?;
    let topology = enumerate_topology(backend.as_ref())?;

    if json {
        let listing = DeviceListing {
            backend: backend.version(),
            devices: topology.devices(),
        };
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    println!("{}", backend.version());
    for device in topology.devices() {
        let mut flags = Vec::new();
        if device.is_default {
            flags.push("default");
        }
        if !device.is_enabled {
            flags.push("disabled");
        }
        if flags.is_empty() {
            println!("  [{}] {}", device.index, device.name);
        } else {
            println!("  [{}] {} ({})", device.index, device.name, flags.join(", "));
        }
    }
    Ok(())
}

async fn load_config(dir: Option<PathBuf>) -> anyhow::Result<AudioConfig> {
    let dir = match dir {
        Some(dir) => dir,
        None => ConfigManager::default_config_dir()?,
    };
    let manager = ConfigManager::new(dir);
    tracing::info!("Using config {}", manager.config_path().display());
    Ok(manager.load().await)
}

async fn monitor(
    device: Option<String>,
    config_dir: Option<PathBuf>,
    samples: Option<PathBuf>,
    play: Option<String>,
) -> anyhow::Result<()> {
    let mut config = load_config(config_dir).await?;
    if let Some(device) = device {
        config.preferred_device = device;
    }

    let backend = backend(config.headless)?;
    let sample_resources: Arc<dyn ResourceStore> = match samples {
        Some(dir) => Arc::new(DirectoryResourceStore::new(dir)),
        None => Arc::new(MemoryResourceStore::new()),
    };
    let track_resources: Arc<dyn ResourceStore> = Arc::new(MemoryResourceStore::new());

    let engine = AudioEngine::start(
        move || {
            let audio = AudioOrchestrator::new(
                backend,
                Arc::new(AudioThread::new()),
                track_resources,
                sample_resources,
                OrchestratorOptions {
                    config,
                    ..OrchestratorOptions::default()
                },
            )?;
            audio.on_device_event(|event| match event {
                DeviceEvent::Added(name) => tracing::info!("➕ Device added: {}", name),
                DeviceEvent::Removed(name) => tracing::info!("➖ Device removed: {}", name),
            });
            Ok(audio)
        },
        DEFAULT_TICK,
    )?;

    engine.run(|audio| {
        tracing::info!(
            "Output device: {} (available: {})",
            audio.current_device_name(),
            audio.audio_device_names().join(", ")
        );
    });

    if let Some(name) = play {
        engine.run(move |audio| {
            let played = audio.samples().and_then(|store| {
                let mut samples = store.lock()?;
                samples.get(&name)?.play()?;
                Ok(())
            });
            if let Err(e) = played {
                tracing::error!("Failed to play {}: {}", name, e);
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupted, shutting down");
    drop(engine);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    tracing::info!("🎼 Sonority starting...");

    match cli.command {
        Command::Devices { json } => list_devices(json),
        Command::Monitor {
            device,
            config,
            samples,
            play,
        } => monitor(device, config, samples, play).await,
    }
}
