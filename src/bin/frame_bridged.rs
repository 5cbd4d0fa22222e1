//! frame_bridged - shared-memory frame bridge daemon
//!
//! This daemon:
//! 1. Binds the shared-memory frame channel for its port
//! 2. Serves the local control endpoint (/SetParameters, /Alive, /GetLicense)
//! 3. Runs detection on claimed frames once parameters arrive
//! 4. Posts result envelopes to the configured collector URL

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use frame_bridge::{detect, BridgeConfig, BridgeService};

#[derive(Parser, Debug)]
#[command(author, version, about = "Bridge shared-memory frames to a detection collector")]
struct Args {
    /// JSON config file. Env overrides still apply on top of it.
    #[arg(long, env = "FRAME_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Control endpoint port; also the default channel id.
    #[arg(long)]
    port: Option<u16>,

    /// Shared-memory channel id when it differs from the control port.
    #[arg(long)]
    shm_port: Option<u16>,

    /// Directory holding the shared-memory regions.
    #[arg(long)]
    shm_dir: Option<PathBuf>,

    /// Detector: auto, noop or model.
    #[arg(long)]
    detector: Option<String>,

    /// ONNX model for the model-backed detector.
    #[arg(long)]
    model_path: Option<PathBuf>,

    /// Write each annotated keyframe to this directory.
    #[arg(long)]
    debug_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = BridgeConfig::load_from(args.config.as_deref())?;
    if let Some(port) = args.port {
        cfg.port = port;
    }
    if let Some(port) = args.shm_port {
        cfg.shm_port = Some(port);
    }
    if let Some(dir) = args.shm_dir {
        cfg.shm_dir = dir;
    }
    if let Some(kind) = args.detector.as_deref() {
        cfg.detector = kind.parse()?;
    }
    if let Some(path) = args.model_path {
        cfg.model_path = Some(path);
    }
    if let Some(dir) = args.debug_dir {
        cfg.debug_dir = Some(dir);
    }
    cfg.validate()?;

    log::info!(
        "frame_bridged {} starting: port={} shm_port={} shm_dir={}",
        env!("CARGO_PKG_VERSION"),
        cfg.port,
        cfg.shm_port(),
        cfg.shm_dir.display()
    );

    let detector = detect::resolve_detector(cfg.detector, cfg.model_path.as_deref())?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build async runtime")?;

    runtime.block_on(async move {
        let service = BridgeService::start(&cfg, detector).await?;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        ctrlc::set_handler(move || {
            let _ = tx.send(());
        })
        .context("error setting Ctrl-C handler")?;

        log::info!("frame_bridged waiting for shutdown signal (Ctrl-C)...");
        let _ = rx.recv().await;
        log::info!("shutdown signal received, stopping...");

        let delivery = service.delivery_stats();
        let stats = service.shutdown().await?;
        log::info!(
            "frame_bridged stopped: claimed={} gated={} detector_failures={} submitted={} delivered={} failed={}",
            stats.frames_claimed,
            stats.frames_gated,
            stats.detector_failures,
            stats.envelopes_submitted,
            delivery.delivered(),
            delivery.failed()
        );
        Ok::<(), anyhow::Error>(())
    })
}
