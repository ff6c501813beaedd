//! Screen mirror demo binary
//!
//! Serves an animated test pattern (and a test tone) so the whole pipeline can
//! be exercised from a browser without any capture hardware attached.

// Use jemalloc for better memory management (optional feature)
#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::Result;
use clap::Parser;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};
use zap_mirror::config::Config;
use zap_mirror::{JpegCompressor, MirrorServer, MirrorStats, TestPatternSource, ToneSource};

const STATS_INTERVAL: Duration = Duration::from_secs(10);
const TONE_HZ: f32 = 440.0;

#[derive(Parser, Debug)]
#[command(name = "zap-mirror")]
#[command(about = "Local screen mirroring over plain HTTP")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Test pattern width in pixels
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Test pattern height in pixels
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    fmt().with_env_filter(filter).with_target(false).init();

    info!("Zap Mirror starting");
    info!(config_path = %cli.config, "Loading configuration");

    let config = Config::load_or_default(&cli.config)?;
    let mirror = config.mirror;
    let audio_enabled = mirror.audio.enabled;
    let audio_format = mirror.audio.format();

    let source = TestPatternSource::new(cli.width, cli.height);
    let mut server = MirrorServer::new(mirror, source, JpegCompressor::new());
    if audio_enabled {
        server = server.with_audio(ToneSource::new(audio_format, TONE_HZ));
    }

    let handle = server.start().await?;

    let host = get_local_ip();
    info!("Video: http://{}:{}/video", host, handle.port());
    if audio_enabled {
        info!("Audio: http://{}:{}/audio", host, handle.port());
    }
    info!("Mirroring started, press Ctrl+C to stop");

    // Log stats periodically until interrupted
    let mut ticker = tokio::time::interval(STATS_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;

    let mut previous = MirrorStats::default();
    let mut previous_at = Instant::now();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let stats = handle.stats();
                let elapsed = previous_at.elapsed().as_secs_f64();

                info!(
                    fps = %format!("{:.1}", stats.publish_fps(&previous, elapsed)),
                    published = %stats.frames_published,
                    lagged = %stats.frames_lagged,
                    video_clients = %stats.video_clients,
                    audio_clients = %stats.audio_clients,
                    "Stats"
                );

                previous = stats;
                previous_at = Instant::now();
            }
        }
    }

    info!("Shutting down");
    handle.stop();

    Ok(())
}

fn get_local_ip() -> String {
    // Try to get the actual IP address, fallback to localhost
    use std::net::UdpSocket;

    if let Ok(socket) = UdpSocket::bind("0.0.0.0:0") {
        if let Ok(()) = socket.connect("8.8.8.8:80") {
            if let Ok(addr) = socket.local_addr() {
                return addr.ip().to_string();
            }
        }
    }

    "localhost".to_string()
}
