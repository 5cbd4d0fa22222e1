use anyhow::Result;

use crate::detect::backend::{Detector, DEFAULT_CONFIDENCE};
use crate::roi::{BoundingBox, Rect};

/// No-op detector. Never reports anything.
///
/// Used when no model is available, so the pipeline keeps claiming frames
/// without producing results.
pub struct NoopDetector {
    confidence: f32,
    frames_seen: u64,
}

impl NoopDetector {
    pub fn new() -> Self {
        Self {
            confidence: DEFAULT_CONFIDENCE,
            frames_seen: 0,
        }
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }
}

impl Default for NoopDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for NoopDetector {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn detect(
        &mut self,
        _frame: &[u8],
        width: u32,
        height: u32,
        _rois: Option<&[Rect]>,
    ) -> Result<Vec<BoundingBox>> {
        self.frames_seen += 1;
        log::trace!("noop detector skipped {}x{} frame", width, height);
        Ok(Vec::new())
    }

    fn set_confidence_threshold(&mut self, confidence: f32) {
        self.confidence = confidence;
    }

    fn confidence_threshold(&self) -> f32 {
        self.confidence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_detector_reports_nothing() {
        let mut detector = NoopDetector::new();
        assert_eq!(detector.confidence_threshold(), DEFAULT_CONFIDENCE);

        let boxes = detector.detect(&[0u8; 24], 4, 4, None).unwrap();
        assert!(boxes.is_empty());
        assert_eq!(detector.frames_seen(), 1);

        detector.set_confidence_threshold(0.4);
        assert_eq!(detector.confidence_threshold(), 0.4);
    }
}
