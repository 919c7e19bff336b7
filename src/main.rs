//! `capture`: stream frames from a V4L2 device into raw files.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{error, info, warn};

use v4l_ring_capture::config::{DEFAULT_DEVICE, DEFAULT_FPS, DEFAULT_HEIGHT, DEFAULT_WIDTH};
use v4l_ring_capture::{CaptureConfig, CaptureError, CaptureSession, FileSink, FourCC, StreamState};

/// Exit status when the device cannot be opened (-1 as a byte).
const EXIT_OPEN_FAILED: u8 = 255;

#[derive(Parser, Debug)]
#[command(name = "capture", version, about = "Capture raw frames from a V4L2 device")]
struct Cli {
    /// Frame width in pixels
    #[arg(value_parser = clap::value_parser!(u32).range(1..), default_value_t = DEFAULT_WIDTH)]
    width: u32,

    /// Frame height in pixels
    #[arg(value_parser = clap::value_parser!(u32).range(1..), default_value_t = DEFAULT_HEIGHT)]
    height: u32,

    /// Capture device node
    #[arg(default_value = DEFAULT_DEVICE)]
    device: PathBuf,

    /// Requested frames per second
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..), default_value_t = DEFAULT_FPS)]
    fps: u32,

    /// How long to capture
    #[arg(long, default_value = "1")]
    seconds: u64,

    /// Directory the frame-<n>.raw files are written to
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Pixel format as a four-character code
    #[arg(long, default_value = "YUYV")]
    format: FourCC,
}

impl Cli {
    fn config(&self) -> CaptureConfig {
        CaptureConfig::default()
            .with_device(self.device.clone())
            .with_width(self.width)
            .with_height(self.height)
            .with_fourcc(self.format)
            .with_fps(self.fps)
    }
}

fn main() -> ExitCode {
    // RUST_LOG overrides the default level, e.g. RUST_LOG=v4l_ring_capture=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    if let Err(err) = fs::create_dir_all(&cli.output_dir) {
        error!("cannot create {}: {err}", cli.output_dir.display());
        return ExitCode::FAILURE;
    }

    match capture(&cli.config(), &cli.output_dir, Duration::from_secs(cli.seconds)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if err.is_open_failure() => {
            error!("{err}");
            ExitCode::from(EXIT_OPEN_FAILED)
        }
        Err(err) => {
            error!("capture did not start: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Set up, stream for `duration`, and tear down.
///
/// Only failures before streaming starts are returned; anything later is
/// logged.
fn capture(
    config: &CaptureConfig,
    output_dir: &Path,
    duration: Duration,
) -> Result<(), CaptureError> {
    let mut session = CaptureSession::open(config)?;
    info!(format = %session.format(), "capturing for {duration:?}");

    if let Err(err) = session.start(FileSink::new(output_dir)) {
        if let Err(close_err) = session.close() {
            warn!("teardown after failed start: {close_err}");
        }
        return Err(err);
    }

    let stop_flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&stop_flag);
    if let Err(err) = ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst)) {
        warn!("Ctrl-C will not stop capture early: {err}");
    }

    let started = Instant::now();
    while started.elapsed() < duration {
        if stop_flag.load(Ordering::SeqCst) {
            info!("stopping early");
            break;
        }
        if session.loop_finished() {
            warn!("capture loop ended before the requested duration");
            break;
        }
        thread::sleep(Duration::from_millis(100));
    }

    if session.state() == StreamState::Streaming {
        let summary = session.stop().or_else(|err| {
            warn!("stopping capture: {err}");
            session.take_summary().ok_or(err)
        });
        if let Ok(summary) = summary {
            if let Some(fault) = &summary.fault {
                error!("capture loop fault: {fault}");
            }
            info!(
                frames = summary.frames,
                elapsed = ?started.elapsed(),
                "capture finished"
            );
        }
    }

    if let Err(err) = session.close() {
        warn!("teardown: {err}");
    }
    Ok(())
}
