//! Error taxonomy for the bridge.
//!
//! Only `ChannelUnavailable` is fatal, and only at startup. Every other
//! variant is logged by the component that observes it and the pipeline
//! keeps running.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// The shared region could not be created or mapped.
    #[error("frame channel '{name}' unavailable: {reason}")]
    ChannelUnavailable { name: String, reason: String },

    /// Header or footer sentinel mismatch. The region has been reinitialised.
    #[error("frame channel sentinels invalid (header={header:#x}, footer={footer:#x})")]
    CorruptRegion { header: u64, footer: u64 },

    /// Producer declared more payload bytes than the buffer can hold.
    #[error("declared frame size {declared} exceeds capacity {capacity}")]
    CorruptFrame { declared: u32, capacity: usize },

    /// The detector capability raised an error for one frame.
    #[error("detector '{detector}' failed: {reason}")]
    DetectorFailure { detector: String, reason: String },

    /// A configuration update was rejected; the prior configuration is kept.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Outbound send failed; the envelope is dropped.
    #[error("delivery to {url} failed: {reason}")]
    DeliveryFailure { url: String, reason: String },
}

pub type Result<T> = std::result::Result<T, BridgeError>;
