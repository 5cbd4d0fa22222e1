mod backend;
mod backends;

use std::path::Path;
use std::str::FromStr;

use anyhow::{anyhow, Result};

pub use backend::{Detector, DEFAULT_CONFIDENCE};
pub use backends::NoopDetector;
#[cfg(feature = "backend-tract")]
pub use backends::TractDetector;

/// Default model input edge for YOLOv8 exports.
pub const DEFAULT_MODEL_INPUT: u32 = 640;

/// Which detector the process should run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectorKind {
    /// Model-backed when it loads, otherwise no-op.
    Auto,
    Noop,
    /// Model-backed; failing to load is a startup error.
    Model,
}

impl FromStr for DetectorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(DetectorKind::Auto),
            "noop" | "none" | "mock" => Ok(DetectorKind::Noop),
            "model" | "tract" => Ok(DetectorKind::Model),
            other => Err(anyhow!(
                "unknown detector '{}'; expected auto, noop or model",
                other
            )),
        }
    }
}

/// Resolve the detector once at startup.
pub fn resolve_detector(kind: DetectorKind, model_path: Option<&Path>) -> Result<Box<dyn Detector>> {
    let detector: Box<dyn Detector> = match kind {
        DetectorKind::Noop => Box::new(NoopDetector::new()),
        DetectorKind::Model => load_model(model_path)?,
        DetectorKind::Auto => match load_model(model_path) {
            Ok(detector) => detector,
            Err(err) => {
                log::warn!("model detector unavailable ({}); falling back to noop", err);
                Box::new(NoopDetector::new())
            }
        },
    };
    log::info!(
        "detector resolved: {} (confidence {:.3})",
        detector.name(),
        detector.confidence_threshold()
    );
    Ok(detector)
}

#[cfg(feature = "backend-tract")]
fn load_model(model_path: Option<&Path>) -> Result<Box<dyn Detector>> {
    let path = model_path.ok_or_else(|| anyhow!("no model path configured"))?;
    let mut detector = TractDetector::new(path, DEFAULT_MODEL_INPUT, DEFAULT_MODEL_INPUT)?;
    detector.warm_up()?;
    Ok(Box::new(detector))
}

#[cfg(not(feature = "backend-tract"))]
fn load_model(_model_path: Option<&Path>) -> Result<Box<dyn Detector>> {
    Err(anyhow!("built without the backend-tract feature"))
}
