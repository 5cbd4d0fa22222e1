//! Byte-exact layout of the shared frame region.
//!
//! ```text
//! offset            size             field
//! 0                 8                header sentinel (0x1234)
//! 8                 4                status (0=EMPTY, 1=READY, 2=CONSUMED)
//! 12                4                width
//! 16                4                height
//! 20                4                declared payload size
//! 24                8                producer timestamp
//! 32                MAX_FRAME_BYTES  payload
//! 32+MAX_FRAME_BYTES 8               footer sentinel (0x4321)
//! ```
//!
//! All integers are little-endian.

use std::path::{Path, PathBuf};

pub const HEADER_SENTINEL: u64 = 0x1234;
pub const FOOTER_SENTINEL: u64 = 0x4321;

pub const MAX_FRAME_WIDTH: usize = 1920;
pub const MAX_FRAME_HEIGHT: usize = 1080;
pub const MAX_FRAME_BYTES: usize = MAX_FRAME_WIDTH * MAX_FRAME_HEIGHT * 3;

pub const HEADER_OFFSET: usize = 0;
pub const STATUS_OFFSET: usize = 8;
pub const WIDTH_OFFSET: usize = 12;
pub const HEIGHT_OFFSET: usize = 16;
pub const SIZE_OFFSET: usize = 20;
pub const TIMESTAMP_OFFSET: usize = 24;
pub const PAYLOAD_OFFSET: usize = 32;
pub const FOOTER_OFFSET: usize = PAYLOAD_OFFSET + MAX_FRAME_BYTES;
pub const REGION_SIZE: usize = FOOTER_OFFSET + 8;

/// Default directory backing named regions (tmpfs on Linux).
pub const DEFAULT_SHM_DIR: &str = "/dev/shm";

const CHANNEL_NAME_PREFIX: &str = "ChannelFrame_";

/// Coordination state stored in the status field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Empty,
    Ready,
    Consumed,
}

impl FrameStatus {
    pub fn as_raw(self) -> u32 {
        match self {
            FrameStatus::Empty => 0,
            FrameStatus::Ready => 1,
            FrameStatus::Consumed => 2,
        }
    }

    /// Unknown values are reported as `None` and treated as "not ready".
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(FrameStatus::Empty),
            1 => Some(FrameStatus::Ready),
            2 => Some(FrameStatus::Consumed),
            _ => None,
        }
    }
}

/// Region name for a channel id (the configured port number).
pub fn channel_name(channel_id: u16) -> String {
    format!("{CHANNEL_NAME_PREFIX}{channel_id}")
}

/// Backing file for a channel inside `shm_dir`.
pub fn channel_path(shm_dir: &Path, channel_id: u16) -> PathBuf {
    shm_dir.join(channel_name(channel_id))
}

pub(crate) fn read_u32(region: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&region[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

pub(crate) fn read_u64(region: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&region[offset..offset + 8]);
    u64::from_le_bytes(buf)
}

pub(crate) fn write_u32(region: &mut [u8], offset: usize, value: u32) {
    region[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_u64(region: &mut [u8], offset: usize, value: u64) {
    region[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}
