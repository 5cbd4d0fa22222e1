use anyhow::Result;

use crate::roi::{BoundingBox, Rect};

/// Confidence used until a configuration supplies one.
pub const DEFAULT_CONFIDENCE: f32 = 0.25;

/// Detector capability.
///
/// Maps a raw frame to pixel-space boxes. When `rois` is `Some`, the
/// implementation returns only boxes that overlap at least one rectangle
/// (see `roi::filter_boxes`). Errors are reported per frame; the caller
/// treats them as zero detections.
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on one planar YUV420 frame.
    fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        rois: Option<&[Rect]>,
    ) -> Result<Vec<BoundingBox>>;

    /// Set the minimum confidence for reported boxes.
    fn set_confidence_threshold(&mut self, confidence: f32);

    fn confidence_threshold(&self) -> f32;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
