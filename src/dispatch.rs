//! Detection dispatch loop.
//!
//! Runs on a dedicated worker thread. Each iteration drains a pending
//! parameter update, polls the frame channel, and for claimed frames runs
//! the detector once the first valid configuration has been accepted.
//! Results leave the thread only through the registered `ResultSink`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::channel::{ClaimedFrame, FrameChannel};
use crate::delivery::{Delivery, DeliverySender};
use crate::detect::Detector;
use crate::encode;
use crate::envelope::ResultEnvelope;
use crate::error::BridgeError;
use crate::params::{ActiveParameters, ParameterStore, DEFAULT_JPG_QUALITY};
use crate::roi::BoundingBox;

pub const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Where result envelopes go.
pub trait ResultSink: Send + Sync {
    fn submit(&self, delivery: Delivery) -> crate::error::Result<()>;
}

impl ResultSink for DeliverySender {
    fn submit(&self, delivery: Delivery) -> crate::error::Result<()> {
        self.enqueue(delivery)
    }
}

/// Detector and sink slots, shared between the loop and its owner.
#[derive(Clone)]
pub struct DispatchControls {
    detector: Arc<Mutex<Box<dyn Detector>>>,
    sink: Arc<Mutex<Option<Arc<dyn ResultSink>>>>,
}

impl DispatchControls {
    fn new(detector: Box<dyn Detector>) -> Self {
        Self {
            detector: Arc::new(Mutex::new(detector)),
            sink: Arc::new(Mutex::new(None)),
        }
    }

    pub fn set_sink(&self, sink: Arc<dyn ResultSink>) {
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);
    }

    pub fn clear_sink(&self) {
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn has_sink(&self) -> bool {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Replace the detector. The new one starts from its own threshold
    /// until the next accepted configuration.
    pub fn set_detector(&self, detector: Box<dyn Detector>) {
        log::info!("detector replaced with {}", detector.name());
        *self.detector.lock().unwrap_or_else(PoisonError::into_inner) = detector;
    }

    pub fn detector_name(&self) -> &'static str {
        self.detector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .name()
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.detector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .confidence_threshold()
    }

    fn sink(&self) -> Option<Arc<dyn ResultSink>> {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Counters kept by the loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub frames_claimed: u64,
    pub frames_gated: u64,
    pub detector_failures: u64,
    pub envelopes_submitted: u64,
}

/// What one iteration did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// No frame was claimed.
    Idle,
    /// A frame was claimed but detection was not run.
    Gated,
    Detected { boxes: usize, submitted: bool },
}

pub struct DispatchLoop {
    channel: FrameChannel,
    port: u16,
    store: Arc<ParameterStore>,
    controls: DispatchControls,
    active: Option<ActiveParameters>,
    ready: bool,
    debug_dir: Option<PathBuf>,
    stats: DispatchStats,
}

impl DispatchLoop {
    /// `port` is stamped on every envelope as the instance identity.
    pub fn new(
        channel: FrameChannel,
        port: u16,
        store: Arc<ParameterStore>,
        detector: Box<dyn Detector>,
    ) -> Self {
        Self {
            channel,
            port,
            store,
            controls: DispatchControls::new(detector),
            active: None,
            ready: false,
            debug_dir: None,
            stats: DispatchStats::default(),
        }
    }

    /// Save each annotated keyframe under `dir` as well.
    pub fn with_debug_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.debug_dir = dir;
        self
    }

    pub fn controls(&self) -> DispatchControls {
        self.controls.clone()
    }

    /// True once a valid configuration has been accepted. Never reverts.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn active(&self) -> Option<&ActiveParameters> {
        self.active.as_ref()
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// One non-blocking iteration.
    pub fn step(&mut self) -> StepOutcome {
        self.sync_parameters();

        let Some(frame) = self.channel.try_claim_frame() else {
            return StepOutcome::Idle;
        };
        self.stats.frames_claimed += 1;

        let active = match &self.active {
            Some(active) if self.ready && frame.metadata.size > 0 => active,
            _ => {
                self.stats.frames_gated += 1;
                log::trace!(
                    "frame ts={} size={} not dispatched (ready={})",
                    frame.metadata.timestamp,
                    frame.metadata.size,
                    self.ready
                );
                return StepOutcome::Gated;
            }
        };
        if (frame.metadata.width, frame.metadata.height) != (active.image_width, active.image_height) {
            log::debug!(
                "frame ts={} is {}x{}, configured for {}x{}",
                frame.metadata.timestamp,
                frame.metadata.width,
                frame.metadata.height,
                active.image_width,
                active.image_height
            );
        }

        let boxes = {
            let mut detector = self
                .controls
                .detector
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let meta = frame.metadata;
            match detector.detect(&frame.data, meta.width, meta.height, active.roi_filter()) {
                Ok(boxes) => boxes,
                Err(err) => {
                    self.stats.detector_failures += 1;
                    let failure = BridgeError::DetectorFailure {
                        detector: detector.name().to_string(),
                        reason: format!("{err:#}"),
                    };
                    log::warn!("{}", failure);
                    Vec::new()
                }
            }
        };
        if boxes.is_empty() {
            return StepOutcome::Detected {
                boxes: 0,
                submitted: false,
            };
        }

        let count = boxes.len();
        let submitted = match self.controls.sink() {
            Some(sink) => self.submit(sink.as_ref(), &frame, boxes),
            None => {
                log::debug!("{} detections dropped; no result sink registered", count);
                false
            }
        };
        if submitted {
            self.stats.envelopes_submitted += 1;
        }
        StepOutcome::Detected {
            boxes: count,
            submitted,
        }
    }

    /// Poll until `running` clears.
    pub fn run(&mut self, running: &AtomicBool) {
        log::info!(
            "dispatch loop polling {} (detector {})",
            self.channel.path().display(),
            self.controls.detector_name()
        );
        while running.load(Ordering::SeqCst) {
            if self.step() == StepOutcome::Idle {
                std::thread::sleep(POLL_INTERVAL);
            }
        }
        log::info!("dispatch loop stopped: {:?}", self.stats);
    }

    /// Move the loop onto its own worker thread.
    pub fn spawn(self) -> Result<DispatchHandle> {
        let running = Arc::new(AtomicBool::new(true));
        let running_thread = running.clone();
        let controls = self.controls();
        let join = std::thread::Builder::new()
            .name("frame-dispatch".to_string())
            .spawn(move || {
                let mut dispatch = self;
                dispatch.run(&running_thread);
                dispatch.stats()
            })?;
        Ok(DispatchHandle {
            running,
            controls,
            join: Some(join),
        })
    }

    fn sync_parameters(&mut self) {
        let Some(config) = self.store.take_if_dirty() else {
            return;
        };
        let previous_quality = self
            .active
            .as_ref()
            .map_or(DEFAULT_JPG_QUALITY, |active| active.jpg_quality);
        let active = match ActiveParameters::derive(&config, previous_quality) {
            Ok(active) => active,
            Err(err) => {
                log::warn!("configuration update ignored: {}", err);
                return;
            }
        };

        if let Some(confidence) = active.confidence {
            self.controls
                .detector
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .set_confidence_threshold(confidence);
        }
        log::info!(
            "parameters applied: url={} rects={} confidence={:?} quality={}",
            active.url,
            active.rects.len(),
            active.confidence,
            active.jpg_quality
        );
        if !self.ready {
            self.ready = true;
            log::info!("first configuration accepted; detection enabled");
        }
        self.active = Some(active);
    }

    fn submit(&self, sink: &dyn ResultSink, frame: &ClaimedFrame, boxes: Vec<BoundingBox>) -> bool {
        let Some(active) = &self.active else {
            return false;
        };
        let meta = frame.metadata;
        let keyframe =
            match encode::keyframe(&frame.data, meta.width, meta.height, active.jpg_quality, &boxes) {
                Ok(keyframe) => keyframe,
                Err(err) => {
                    log::warn!("keyframe encoding failed for ts={}: {:#}", meta.timestamp, err);
                    return false;
                }
            };

        if let Some(dir) = &self.debug_dir {
            let path = dir.join(format!("detection_{}.jpg", meta.timestamp));
            match std::fs::write(&path, &keyframe.jpeg) {
                Ok(()) => log::debug!("debug snapshot written to {}", path.display()),
                Err(err) => log::warn!("debug snapshot {} failed: {}", path.display(), err),
            }
        }

        let envelope = ResultEnvelope::new(self.port, keyframe.base64, meta.timestamp, &boxes);
        let delivery = Delivery {
            url: active.url.clone(),
            envelope,
        };
        match sink.submit(delivery) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("result handoff failed: {}", err);
                false
            }
        }
    }
}

/// Owner's handle on a spawned loop.
pub struct DispatchHandle {
    running: Arc<AtomicBool>,
    controls: DispatchControls,
    join: Option<JoinHandle<DispatchStats>>,
}

impl DispatchHandle {
    pub fn controls(&self) -> &DispatchControls {
        &self.controls
    }

    /// Clear the running flag and wait for the current iteration to finish.
    pub fn stop(mut self) -> Result<DispatchStats> {
        self.running.store(false, Ordering::SeqCst);
        match self.join.take() {
            Some(join) => join
                .join()
                .map_err(|_| anyhow!("dispatch thread panicked")),
            None => Ok(DispatchStats::default()),
        }
    }
}
