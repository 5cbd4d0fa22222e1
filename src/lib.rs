//! Frame Bridge
//!
//! Bridges camera frames published by an external process through a
//! fixed-layout shared memory region into a detection pipeline, and
//! forwards detections to a remote collector over HTTP.
//!
//! # Architecture
//!
//! Two scheduling domains coexist:
//!
//! 1. **Dispatch worker**: a dedicated thread polling the frame channel,
//!    gating on configuration, and running the detector.
//! 2. **Async runtime**: the control endpoint and the delivery queue's
//!    sender task. Network I/O happens only here, on the blocking pool.
//!
//! The only handoff between them is the delivery queue's channel.
//!
//! # Module Structure
//!
//! - `channel`: shared memory layout and the EMPTY/READY/CONSUMED handshake
//! - `roi`: region geometry and sensitivity/threshold to confidence mapping
//! - `params`: control-plane configuration and the dirty-flag parameter store
//! - `detect`: detector capability (no-op, model-backed)
//! - `dispatch`: the polling loop
//! - `delivery`: outbound FIFO and HTTP collector
//! - `api`: local control endpoint
//! - `service`: process-level wiring

pub mod api;
pub mod channel;
pub mod config;
pub mod delivery;
pub mod detect;
pub mod dispatch;
pub mod encode;
pub mod envelope;
pub mod error;
pub mod params;
pub mod roi;
pub mod service;

pub use channel::{ClaimedFrame, FrameChannel, FrameMetadata, FrameWriter};
pub use config::BridgeConfig;
pub use delivery::{Collector, Delivery, DeliveryQueue, DeliverySender, HttpCollector};
pub use detect::{Detector, DetectorKind, NoopDetector};
pub use dispatch::{DispatchControls, DispatchHandle, DispatchLoop, ResultSink, StepOutcome};
pub use envelope::ResultEnvelope;
pub use error::BridgeError;
pub use params::{ActiveParameters, Configuration, ParameterStore, RoiGroup};
pub use roi::{BoundingBox, Point, Rect};
pub use service::BridgeService;
