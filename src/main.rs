// SPDX-License-Identifier: GPL-3.0-only

use clap::{ArgAction, Parser};
use picam_mjpeg::config::{Codec, LoopMode, StillEncoding, StillPolicy, StillSource};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

mod cli;

#[derive(Parser, Debug, Default)]
#[command(name = "picam-mjpeg")]
#[command(about = "Camera daemon serving an MJPEG preview, video recording and stills")]
#[command(version = env!("GIT_VERSION"))]
pub struct Cli {
    /// TOML config file (default: ~/.config/picam-mjpeg/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Root directory for recordings, stills and counters
    #[arg(long)]
    media_path: Option<PathBuf>,

    /// Video stream width
    #[arg(long)]
    width: Option<u32>,

    /// Video stream height
    #[arg(long)]
    height: Option<u32>,

    #[arg(long)]
    framerate: Option<f32>,

    /// Buffers per stream
    #[arg(long)]
    buffer_count: Option<u32>,

    /// Preview stream width
    #[arg(long)]
    lores_width: Option<u32>,

    /// Preview stream height
    #[arg(long)]
    lores_height: Option<u32>,

    /// Image rotation, 0 or 180
    #[arg(long)]
    rotation: Option<u32>,

    #[arg(long)]
    hflip: bool,

    #[arg(long)]
    vflip: bool,

    /// Video filename template or udp:// / tcp:// target
    #[arg(long)]
    video_output: Option<String>,

    /// Preview JPEG written on every frame
    #[arg(long)]
    mjpeg_output: Option<String>,

    /// Still filename template
    #[arg(long)]
    image_output: Option<String>,

    #[arg(long, value_enum)]
    codec: Option<Codec>,

    /// Video bitrate in bits per second
    #[arg(long)]
    bitrate: Option<u32>,

    /// MJPEG quality, 1-100
    #[arg(long)]
    quality: Option<u8>,

    /// Still JPEG quality, 1-100
    #[arg(long)]
    image_quality: Option<u8>,

    /// Still file encoding
    #[arg(long, value_enum)]
    encoding: Option<StillEncoding>,

    /// Also save stills as DNG from the raw stream
    #[arg(long)]
    raw: bool,

    /// Symlink pointing at the newest still
    #[arg(long)]
    latest: Option<PathBuf>,

    /// JSON-lines metadata file for the recording
    #[arg(long)]
    metadata: Option<PathBuf>,

    #[arg(long, value_enum)]
    still_policy: Option<StillPolicy>,

    #[arg(long, value_enum)]
    still_source: Option<StillSource>,

    /// Control FIFO path
    #[arg(long)]
    fifo: Option<PathBuf>,

    /// Minimum time between control FIFO reads
    #[arg(long)]
    fifo_interval_ms: Option<u64>,

    /// Stop after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Stop after this many frames
    #[arg(long)]
    frames: Option<u64>,

    /// Enter toggles pause, x quits
    #[arg(long)]
    keypress: bool,

    /// Start a new recording every N seconds
    #[arg(long)]
    split_secs: Option<u32>,

    #[arg(long, value_enum)]
    mode: Option<LoopMode>,

    /// Demo phase length
    #[arg(long)]
    demo_phase_ms: Option<u64>,

    /// Wait for a client on tcp:// video targets
    #[arg(long)]
    listen: bool,

    /// More output, repeat for debug and trace
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // RUST_LOG wins over -v
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli::log_level(cli.verbose))),
        )
        .with_target(true)
        .with_level(true)
        .init();

    match cli::run(&cli) {
        Ok(exit) => {
            tracing::info!(?exit, "Exiting");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Fatal error");
            eprintln!("picam-mjpeg: {}", e);
            ExitCode::FAILURE
        }
    }
}
