//! frame_producer - synthetic frame source for the bridge
//!
//! Publishes YUV420 frames (a bright square sweeping across a gray field)
//! into the shared-memory channel, honoring the READY/CONSUMED handshake.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use frame_bridge::channel::{FrameWriter, DEFAULT_SHM_DIR};
use frame_bridge::encode::i420_len;

#[derive(Parser, Debug)]
#[command(author, version, about = "Publish synthetic frames into a bridge channel")]
struct Args {
    /// Channel id (the bridge's shm port).
    #[arg(long, env = "FRAME_BRIDGE_SHM_PORT", default_value_t = 51000)]
    port: u16,

    #[arg(long, env = "FRAME_BRIDGE_SHM_DIR", default_value = DEFAULT_SHM_DIR)]
    shm_dir: PathBuf,

    #[arg(long, default_value_t = 640)]
    width: u32,

    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Frames per second to attempt.
    #[arg(long, default_value_t = 10)]
    fps: u32,

    /// Stop after this many published frames (0 = run until Ctrl-C).
    #[arg(long, default_value_t = 0)]
    count: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut writer = FrameWriter::open(&args.shm_dir, args.port)?;
    log::info!(
        "frame_producer writing {}x{} frames to {}",
        args.width,
        args.height,
        writer.path().display()
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_handler = running.clone();
    ctrlc::set_handler(move || {
        running_handler.store(false, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    let interval = Duration::from_secs(1) / args.fps.max(1);
    let mut frame = vec![0u8; i420_len(args.width, args.height)];
    let mut skipped = 0u64;
    let mut tick = 0u32;

    while running.load(Ordering::SeqCst) {
        let started = Instant::now();
        paint(&mut frame, args.width, args.height, tick);
        tick = tick.wrapping_add(1);

        let timestamp = SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis() as u64;
        if writer.publish(args.width, args.height, timestamp, &frame)? {
            if writer.published() % 100 == 0 {
                log::info!("published {} frames ({} skipped)", writer.published(), skipped);
            }
        } else {
            skipped += 1;
            log::debug!("consumer has not claimed the previous frame; skipping");
        }

        if args.count > 0 && writer.published() >= args.count {
            break;
        }
        if let Some(rest) = interval.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    log::info!(
        "frame_producer stopped: published={} skipped={}",
        writer.published(),
        skipped
    );
    Ok(())
}

fn paint(frame: &mut [u8], width: u32, height: u32, tick: u32) {
    let (w, h) = (width as usize, height as usize);
    let luma = w * h;
    frame[..luma].fill(90);
    frame[luma..].fill(128);

    let side = (w.min(h) / 4).max(1);
    let span = w.saturating_sub(side).max(1);
    let x0 = (tick as usize * 8) % span;
    let y0 = h.saturating_sub(side) / 2;
    for y in y0..(y0 + side).min(h) {
        frame[y * w + x0..y * w + (x0 + side).min(w)].fill(235);
    }
}
