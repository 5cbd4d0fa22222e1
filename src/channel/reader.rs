use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use super::layout::{
    self, FrameStatus, FOOTER_OFFSET, FOOTER_SENTINEL, HEADER_OFFSET, HEADER_SENTINEL,
    HEIGHT_OFFSET, MAX_FRAME_BYTES, PAYLOAD_OFFSET, SIZE_OFFSET, TIMESTAMP_OFFSET, WIDTH_OFFSET,
};
use super::{load_status, map_region, store_status};
use crate::error::{BridgeError, Result};

/// Metadata published by the producer alongside a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameMetadata {
    pub width: u32,
    pub height: u32,
    /// Declared payload bytes.
    pub size: u32,
    /// Producer-assigned capture timestamp.
    pub timestamp: u64,
}

/// A frame copied out of the shared region.
///
/// The payload is a private copy: after the claim the producer may
/// overwrite the shared buffer at any time.
#[derive(Clone, Debug)]
pub struct ClaimedFrame {
    pub metadata: FrameMetadata,
    pub data: Vec<u8>,
}

/// Result of one non-blocking poll of the channel.
#[derive(Debug)]
pub enum ClaimOutcome {
    /// No READY frame. The steady state between frames.
    NotReady,
    /// Sentinels were wrong; the region was reset to EMPTY.
    Reinitialized(BridgeError),
    /// A READY frame declared an impossible size. It was marked CONSUMED
    /// so the producer can move on, and dropped.
    Skipped(BridgeError),
    Claimed(ClaimedFrame),
}

/// Consumer side of the frame channel.
pub struct FrameChannel {
    path: PathBuf,
    mmap: MmapMut,
}

impl FrameChannel {
    /// Bind the region for `channel_id` under `shm_dir`, creating it if absent.
    pub fn open(shm_dir: &Path, channel_id: u16) -> Result<Self> {
        Self::open_path(layout::channel_path(shm_dir, channel_id))
    }

    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mmap = map_region(&path)?;
        log::info!("frame channel mapped at {}", path.display());
        Ok(Self { path, mmap })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw status value currently in the region.
    pub fn status(&self) -> Option<FrameStatus> {
        FrameStatus::from_raw(load_status(&self.mmap))
    }

    /// True when both sentinels hold their fixed constants.
    pub fn sentinels_valid(&self) -> bool {
        let (header, footer) = self.sentinels();
        header == HEADER_SENTINEL && footer == FOOTER_SENTINEL
    }

    fn sentinels(&self) -> (u64, u64) {
        (
            layout::read_u64(&self.mmap, HEADER_OFFSET),
            layout::read_u64(&self.mmap, FOOTER_OFFSET),
        )
    }

    /// Write both sentinels and set status to EMPTY. Idempotent.
    pub fn reinitialize(&mut self) {
        layout::write_u64(&mut self.mmap, HEADER_OFFSET, HEADER_SENTINEL);
        layout::write_u64(&mut self.mmap, FOOTER_OFFSET, FOOTER_SENTINEL);
        store_status(&self.mmap, FrameStatus::Empty);
    }

    /// Claim the current frame if the producer has published one.
    ///
    /// Never blocks. Corrupt regions and frames are recovered here and
    /// reported as `None`.
    pub fn try_claim_frame(&mut self) -> Option<ClaimedFrame> {
        match self.poll() {
            ClaimOutcome::Claimed(frame) => Some(frame),
            ClaimOutcome::NotReady => None,
            ClaimOutcome::Reinitialized(err) => {
                log::info!("{}; region reset to EMPTY", err);
                None
            }
            ClaimOutcome::Skipped(err) => {
                log::warn!("frame skipped: {}", err);
                None
            }
        }
    }

    /// One step of the consumer handshake.
    pub fn poll(&mut self) -> ClaimOutcome {
        let (header, footer) = self.sentinels();
        if header != HEADER_SENTINEL || footer != FOOTER_SENTINEL {
            self.reinitialize();
            return ClaimOutcome::Reinitialized(BridgeError::CorruptRegion { header, footer });
        }

        if FrameStatus::from_raw(load_status(&self.mmap)) != Some(FrameStatus::Ready) {
            return ClaimOutcome::NotReady;
        }

        let metadata = FrameMetadata {
            width: layout::read_u32(&self.mmap, WIDTH_OFFSET),
            height: layout::read_u32(&self.mmap, HEIGHT_OFFSET),
            size: layout::read_u32(&self.mmap, SIZE_OFFSET),
            timestamp: layout::read_u64(&self.mmap, TIMESTAMP_OFFSET),
        };

        let declared = metadata.size as usize;
        if declared > MAX_FRAME_BYTES {
            store_status(&self.mmap, FrameStatus::Consumed);
            return ClaimOutcome::Skipped(BridgeError::CorruptFrame {
                declared: metadata.size,
                capacity: MAX_FRAME_BYTES,
            });
        }

        let data = self.mmap[PAYLOAD_OFFSET..PAYLOAD_OFFSET + declared].to_vec();
        store_status(&self.mmap, FrameStatus::Consumed);

        ClaimOutcome::Claimed(ClaimedFrame { metadata, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::FrameWriter;
    use tempfile::TempDir;

    fn open_pair(dir: &TempDir) -> (FrameChannel, FrameWriter) {
        let channel = FrameChannel::open(dir.path(), 51000).expect("open channel");
        let writer = FrameWriter::open(dir.path(), 51000).expect("open writer");
        (channel, writer)
    }

    #[test]
    fn fresh_region_is_reinitialized_then_stays_empty() {
        let dir = TempDir::new().unwrap();
        let mut channel = FrameChannel::open(dir.path(), 1).unwrap();
        assert!(!channel.sentinels_valid());

        match channel.poll() {
            ClaimOutcome::Reinitialized(BridgeError::CorruptRegion { header, footer }) => {
                assert_eq!(header, 0);
                assert_eq!(footer, 0);
            }
            other => panic!("expected reinitialization, got {:?}", other),
        }
        assert!(channel.sentinels_valid());
        assert_eq!(channel.status(), Some(FrameStatus::Empty));

        assert!(channel.try_claim_frame().is_none());
        assert_eq!(channel.status(), Some(FrameStatus::Empty));
    }

    #[test]
    fn reinitialize_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut channel = FrameChannel::open(dir.path(), 2).unwrap();
        layout::write_u64(&mut channel.mmap, HEADER_OFFSET, 0xdead);
        store_status(&channel.mmap, FrameStatus::Ready);

        channel.reinitialize();
        channel.reinitialize();

        assert!(channel.sentinels_valid());
        assert_eq!(channel.status(), Some(FrameStatus::Empty));
        assert!(matches!(channel.poll(), ClaimOutcome::NotReady));
    }

    #[test]
    fn claims_ready_frame_exactly_once() {
        let dir = TempDir::new().unwrap();
        let (mut channel, mut writer) = open_pair(&dir);
        let payload: Vec<u8> = (0..460_800u32).map(|i| (i % 251) as u8).collect();
        assert!(writer.publish(640, 480, 1_700_000_000, &payload).unwrap());
        assert_eq!(channel.status(), Some(FrameStatus::Ready));

        let frame = channel.try_claim_frame().expect("frame");
        assert_eq!(
            frame.metadata,
            FrameMetadata {
                width: 640,
                height: 480,
                size: 460_800,
                timestamp: 1_700_000_000,
            }
        );
        assert_eq!(frame.data.len(), 460_800);
        assert_eq!(frame.data, payload);
        assert_eq!(channel.status(), Some(FrameStatus::Consumed));

        assert!(channel.try_claim_frame().is_none());
    }

    #[test]
    fn oversized_declaration_is_skipped_and_released() {
        let dir = TempDir::new().unwrap();
        let (mut channel, mut writer) = open_pair(&dir);
        assert!(writer.publish(4, 4, 9, &[0u8; 24]).unwrap());
        layout::write_u32(&mut channel.mmap, SIZE_OFFSET, (MAX_FRAME_BYTES + 1) as u32);

        match channel.poll() {
            ClaimOutcome::Skipped(BridgeError::CorruptFrame { declared, capacity }) => {
                assert_eq!(declared as usize, MAX_FRAME_BYTES + 1);
                assert_eq!(capacity, MAX_FRAME_BYTES);
            }
            other => panic!("expected skipped frame, got {:?}", other),
        }
        assert_eq!(channel.status(), Some(FrameStatus::Consumed));
        assert!(channel.try_claim_frame().is_none());
    }

    #[test]
    fn unknown_status_is_not_ready() {
        let dir = TempDir::new().unwrap();
        let mut channel = FrameChannel::open(dir.path(), 3).unwrap();
        channel.reinitialize();
        channel.mmap[8..12].copy_from_slice(&9u32.to_le_bytes());
        assert!(matches!(channel.poll(), ClaimOutcome::NotReady));
        assert_eq!(channel.status(), None);
    }
}
