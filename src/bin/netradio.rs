//! Network radio player
//!
//! Usage: `netradio [--config <file>] [--device <output id>] [source]`

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use netradio_engine::{
    audio::OutputSink,
    config::AppConfig,
    settings::{DebouncedStore, JsonFileBackend, MemoryBackend, SettingsStore},
    stations::StationList,
    ui::WebServer,
    Engine,
};

/// Command-line arguments for netradio
#[derive(Parser, Debug)]
#[command(name = "netradio")]
#[command(about = "Streaming player for internet radio, local PCM files and line-in")]
#[command(version)]
struct Args {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, env = "NETRADIO_CONFIG")]
    config: Option<PathBuf>,

    /// Output device id
    #[arg(short, long, env = "NETRADIO_DEVICE")]
    device: Option<String>,

    /// Stream URL, file path or line-in source to play at startup
    source: Option<String>,
}

#[cfg(feature = "device-io")]
fn open_sink(device: Option<&str>, _sample_rate: u32) -> Result<Arc<dyn OutputSink>> {
    use netradio_engine::audio::{list_devices, CpalSink};

    println!("\n=== Available Output Devices ===");
    for info in list_devices().iter().filter(|d| d.is_output) {
        let default_marker = if info.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{} ({})", info.name, default_marker, info.id);
    }
    println!();

    let sink = CpalSink::open(device.unwrap_or_default())?;
    Ok(Arc::new(sink))
}

#[cfg(not(feature = "device-io"))]
fn open_sink(device: Option<&str>, sample_rate: u32) -> Result<Arc<dyn OutputSink>> {
    if device.is_some() {
        tracing::warn!("Built without device-io, ignoring --device");
    }
    tracing::warn!("Rendering to a null sink");
    Ok(Arc::new(netradio_engine::audio::NullSink::new(sample_rate)))
}

fn open_settings(config: &AppConfig) -> Result<Arc<dyn SettingsStore>> {
    let delay = config.engine.save_debounce();
    match config.settings.resolve_path() {
        Some(path) => {
            tracing::info!("Settings file: {}", path.display());
            Ok(Arc::new(DebouncedStore::open(JsonFileBackend::new(path), delay)?))
        }
        None => {
            tracing::warn!("No settings location, settings will not persist");
            Ok(Arc::new(DebouncedStore::open(MemoryBackend::new(), delay)?))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting netradio");

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => AppConfig::load_or_default()?,
    };

    let sink = open_sink(args.device.as_deref(), config.engine.output_sample_rate)?;
    let settings = open_settings(&config)?;

    let engine = Engine::builder(config.engine.clone())
        .sink(sink)
        .settings(settings.clone())
        .stations(Arc::new(StationList::new(config.stations.clone())))
        .start()?;

    engine.subscribe_fn(|status| {
        tracing::info!(
            "[{}] {} {} {}",
            status.state,
            status.current_source,
            status.artist,
            status.title
        );
    });

    if config.ui.enabled {
        let server = WebServer::new(&config.ui, engine.clone())?;
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                tracing::error!("Web UI stopped: {}", e);
            }
        });
    }

    let initial = args.source.or_else(|| {
        if settings.autostart() {
            settings.last_source()
        } else {
            None
        }
    });
    if let Some(source) = initial {
        if let Err(e) = engine.play(source.clone()).await {
            tracing::error!("Failed to start {}: {}", source, e);
        }
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    engine.shutdown().await?;

    Ok(())
}
