#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::{Detector, DEFAULT_CONFIDENCE};
use crate::encode;
use crate::roi::{self, BoundingBox, Rect};

/// COCO class index for "person".
const PERSON_CLASS: usize = 0;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

/// Tract-based person detector for YOLOv8-style ONNX models.
///
/// Expects a `[1, 3, H, W]` float input and a `[1, 4 + classes, anchors]`
/// output of `cx, cy, w, h` followed by per-class scores. Only the model
/// file is read from disk; inference makes no network calls.
pub struct TractDetector {
    model: TypedRunnableModel<TypedModel>,
    input_width: u32,
    input_height: u32,
    confidence: f32,
    iou_threshold: f32,
}

impl TractDetector {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_width: u32, input_height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_height as usize, input_width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_width,
            input_height,
            confidence: DEFAULT_CONFIDENCE,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        })
    }

    fn build_input(&self, frame: &[u8], width: u32, height: u32) -> Result<Tensor> {
        let rgb = encode::i420_to_rgb(frame, width, height)?;
        let resized = imageops::resize(&rgb, self.input_width, self.input_height, FilterType::Triangle);

        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.input_height as usize, self.input_width as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        Ok(input.into_tensor())
    }

    fn decode_boxes(&self, outputs: TVec<TValue>, width: u32, height: u32) -> Result<Vec<BoundingBox>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let preds = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output is not [1, 4 + classes, anchors]")?;

        let rows = preds.shape()[1];
        if rows <= 4 {
            return Err(anyhow!("model output has {} rows, expected class scores", rows));
        }
        let anchors = preds.shape()[2];
        let scale_x = width as f32 / self.input_width as f32;
        let scale_y = height as f32 / self.input_height as f32;

        let mut candidates: Vec<(BoundingBox, f32)> = Vec::new();
        for i in 0..anchors {
            let (class, score) = (4..rows)
                .map(|row| (row - 4, preds[[0, row, i]]))
                .fold((0, f32::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best });
            if class != PERSON_CLASS || score <= self.confidence {
                continue;
            }

            let (cx, cy) = (preds[[0, 0, i]] * scale_x, preds[[0, 1, i]] * scale_y);
            let (w, h) = (preds[[0, 2, i]] * scale_x, preds[[0, 3, i]] * scale_y);
            let x1 = (cx - w / 2.0).clamp(0.0, width as f32);
            let y1 = (cy - h / 2.0).clamp(0.0, height as f32);
            let x2 = (cx + w / 2.0).clamp(0.0, width as f32);
            let y2 = (cy + h / 2.0).clamp(0.0, height as f32);
            candidates.push((
                BoundingBox::new(x1 as i32, y1 as i32, (x2 - x1) as i32, (y2 - y1) as i32),
                score,
            ));
        }

        non_max_suppression(&mut candidates, self.iou_threshold);
        Ok(candidates.into_iter().map(|(b, _)| b).collect())
    }
}

impl Detector for TractDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        rois: Option<&[Rect]>,
    ) -> Result<Vec<BoundingBox>> {
        let input = self.build_input(frame, width, height)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let boxes = self.decode_boxes(outputs, width, height)?;
        let accepted = roi::filter_boxes(boxes, rois);
        if !accepted.is_empty() {
            log::debug!("tract detector accepted {} person boxes", accepted.len());
        }
        Ok(accepted)
    }

    fn set_confidence_threshold(&mut self, confidence: f32) {
        self.confidence = confidence;
        log::info!("tract detector confidence threshold set to {:.3}", confidence);
    }

    fn confidence_threshold(&self) -> f32 {
        self.confidence
    }

    fn warm_up(&mut self) -> Result<()> {
        let (w, h) = (self.input_width, self.input_height);
        let blank = vec![128u8; (w * h * 3 / 2) as usize];
        self.detect(&blank, w, h, None).map(|_| ())
    }
}

/// Greedy NMS: keep the highest-scoring box, drop those overlapping it.
fn non_max_suppression(boxes: &mut Vec<(BoundingBox, f32)>, iou_threshold: f32) {
    boxes.sort_by(|a, b| b.1.total_cmp(&a.1));
    let mut kept = 0;
    for index in 0..boxes.len() {
        let suppressed = (0..kept).any(|prev| iou(&boxes[prev].0, &boxes[index].0) > iou_threshold);
        if !suppressed {
            boxes.swap(kept, index);
            kept += 1;
        }
    }
    boxes.truncate(kept);
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let ix = ((a.x + a.w).min(b.x + b.w) - a.x.max(b.x)).max(0) as f32;
    let iy = ((a.y + a.h).min(b.y + b.h) - a.y.max(b.y)).max(0) as f32;
    let inter = ix * iy;
    let union = (a.w * a.h + b.w * b.h) as f32 - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}
