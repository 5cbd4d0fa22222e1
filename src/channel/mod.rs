//! Shared-memory frame channel.
//!
//! One fixed-size region per process, named after the configured port. An
//! external producer publishes frames into it and this crate claims them.
//! There is no lock: the status field is the only coordination primitive.
//!
//! - `FrameChannel`: consumer side. Claims READY frames and marks them CONSUMED.
//! - `FrameWriter`: producer side. Publishes into EMPTY/CONSUMED slots.
//!
//! Both sides map the same backing file (`/dev/shm/ChannelFrame_<port>` by
//! default).

pub mod layout;
mod reader;
mod writer;

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use memmap2::MmapMut;

use crate::error::{BridgeError, Result};
use layout::{FrameStatus, REGION_SIZE, STATUS_OFFSET};

pub use layout::{channel_name, channel_path, DEFAULT_SHM_DIR, MAX_FRAME_BYTES};
pub use reader::{ClaimOutcome, ClaimedFrame, FrameChannel, FrameMetadata};
pub use writer::FrameWriter;

/// Open (creating if absent) the backing file and map it read-write.
fn map_region(path: &Path) -> Result<MmapMut> {
    let unavailable = |reason: String| BridgeError::ChannelUnavailable {
        name: path.display().to_string(),
        reason,
    };

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| unavailable(format!("open failed: {e}")))?;

    let len = file
        .metadata()
        .map_err(|e| unavailable(format!("stat failed: {e}")))?
        .len();
    if len < REGION_SIZE as u64 {
        file.set_len(REGION_SIZE as u64)
            .map_err(|e| unavailable(format!("resize failed: {e}")))?;
    }

    // SAFETY: the mapping is shared with the producer process. All
    // concurrent access goes through the status-field handshake.
    let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| unavailable(format!("mmap failed: {e}")))?;
    if mmap.len() < REGION_SIZE {
        return Err(unavailable(format!(
            "mapped {} bytes, need {}",
            mmap.len(),
            REGION_SIZE
        )));
    }
    Ok(mmap)
}

/// Atomic view of the status field.
///
/// The map base is page aligned and `STATUS_OFFSET` is a multiple of four,
/// so the cell is correctly aligned for `AtomicU32`.
fn status_cell(mmap: &MmapMut) -> &AtomicU32 {
    // SAFETY: offset is in bounds (checked in `map_region`) and aligned; the
    // reference lives no longer than the mapping it borrows.
    unsafe { &*(mmap.as_ptr().add(STATUS_OFFSET) as *const AtomicU32) }
}

fn load_status(mmap: &MmapMut) -> u32 {
    status_cell(mmap).load(Ordering::Acquire)
}

fn store_status(mmap: &MmapMut, status: FrameStatus) {
    status_cell(mmap).store(status.as_raw(), Ordering::Release);
}
