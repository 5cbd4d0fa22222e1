use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use super::layout::{
    self, FrameStatus, FOOTER_OFFSET, FOOTER_SENTINEL, HEADER_OFFSET, HEADER_SENTINEL,
    HEIGHT_OFFSET, MAX_FRAME_BYTES, PAYLOAD_OFFSET, SIZE_OFFSET, TIMESTAMP_OFFSET, WIDTH_OFFSET,
};
use super::{load_status, map_region, store_status};
use crate::error::{BridgeError, Result};

/// Producer side of the frame channel.
///
/// Writes metadata and payload only while the slot is EMPTY or CONSUMED,
/// then flips the status to READY.
pub struct FrameWriter {
    path: PathBuf,
    mmap: MmapMut,
    published: u64,
}

impl FrameWriter {
    pub fn open(shm_dir: &Path, channel_id: u16) -> Result<Self> {
        Self::open_path(layout::channel_path(shm_dir, channel_id))
    }

    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut mmap = map_region(&path)?;
        if layout::read_u64(&mmap, HEADER_OFFSET) != HEADER_SENTINEL
            || layout::read_u64(&mmap, FOOTER_OFFSET) != FOOTER_SENTINEL
        {
            layout::write_u64(&mut mmap, HEADER_OFFSET, HEADER_SENTINEL);
            layout::write_u64(&mut mmap, FOOTER_OFFSET, FOOTER_SENTINEL);
            store_status(&mmap, FrameStatus::Empty);
        }
        Ok(Self {
            path,
            mmap,
            published: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Frames published through this writer.
    pub fn published(&self) -> u64 {
        self.published
    }

    /// Publish a frame.
    ///
    /// Returns `Ok(false)` without touching the region when the previous
    /// frame has not been claimed yet.
    pub fn publish(&mut self, width: u32, height: u32, timestamp: u64, data: &[u8]) -> Result<bool> {
        if data.len() > MAX_FRAME_BYTES {
            return Err(BridgeError::CorruptFrame {
                declared: u32::try_from(data.len()).unwrap_or(u32::MAX),
                capacity: MAX_FRAME_BYTES,
            });
        }
        if FrameStatus::from_raw(load_status(&self.mmap)) == Some(FrameStatus::Ready) {
            return Ok(false);
        }

        layout::write_u32(&mut self.mmap, WIDTH_OFFSET, width);
        layout::write_u32(&mut self.mmap, HEIGHT_OFFSET, height);
        layout::write_u32(&mut self.mmap, SIZE_OFFSET, data.len() as u32);
        layout::write_u64(&mut self.mmap, TIMESTAMP_OFFSET, timestamp);
        self.mmap[PAYLOAD_OFFSET..PAYLOAD_OFFSET + data.len()].copy_from_slice(data);
        store_status(&self.mmap, FrameStatus::Ready);

        self.published += 1;
        Ok(true)
    }
}
