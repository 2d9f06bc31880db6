mod annotation;
mod config;
mod output;
mod protocol;
mod segmentation;
mod session;

use anyhow::{Context, Result};
use clap::Parser;
use config::{Config, Device};
use output::{ExportProgress, MaskRenderer};
use protocol::Driver;
use segmentation::FrameSet;
use session::{Session, SessionOptions};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Folder holding the extracted frames (00000.jpg, 00001.jpg, ...)
    #[arg(short = 'I', long = "input-folder", default_value = "/tmp/src-frames")]
    input: PathBuf,

    /// Preview image path; the frame index is appended to its stem
    #[arg(short = 'O', long = "output", default_value = "/tmp/preview.png")]
    output: PathBuf,

    /// SAM2 image encoder (ONNX file)
    #[arg(short = 'M', long = "model")]
    model: PathBuf,

    /// Model configuration file (TOML)
    #[arg(short = 'C', long = "config")]
    config: Option<PathBuf>,

    /// Compute device, overrides the config file
    #[arg(short = 'D', long = "device", value_enum)]
    device: Option<Device>,

    /// Keep video frames off the compute device and decode them on demand
    #[arg(long)]
    offload: bool,

    /// Outline thickness for rendered masks, overrides the config file
    #[arg(long)]
    borders: Option<u32>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    // stdout carries the protocol
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    tracing::info!("samask starting");

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(device) = args.device {
        config.engine.device = device;
    }
    if let Some(borders) = args.borders {
        config.render.outline_width = borders;
    }

    let frames = FrameSet::open(&args.input)
        .with_context(|| format!("Failed to open frame folder {}", args.input.display()))?;

    let engine = segmentation::create_default_engine(&args.model, config.engine)
        .context("Failed to set up segmentation engine")?;

    let session = Session::new(
        engine,
        frames,
        MaskRenderer::new(&config.render),
        SessionOptions {
            preview_output: args.output,
            offload: args.offload,
        },
    );

    let mut driver = Driver::new(session, io::stdout().lock(), ExportProgress::new(io::stderr()));
    let exit = driver
        .run(io::stdin().lock())
        .context("Lost the control stream")?;

    tracing::info!("samask exiting ({:?}, session {})", exit, driver.session().state());
    Ok(exit.into())
}
