//! ROI geometry and sensitivity/threshold translation.
//!
//! Pure functions. Operators configure regions as corner points and two
//! 0..=100 dials per region; the detector works with axis-aligned
//! rectangles and a single confidence floor.

use serde::{Deserialize, Serialize};

use crate::params::RoiGroup;

/// Lowest confidence the dials can produce.
pub const MIN_CONFIDENCE: f32 = 0.05;
/// Highest confidence the dials can produce.
pub const MAX_CONFIDENCE: f32 = 0.60;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle with `(x1, y1)` top-left and `(x2, y2)` bottom-right.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

/// Detector output in pixel space: top-left corner plus extent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    /// Corners in clockwise order: top-left, top-right, bottom-right, bottom-left.
    pub fn corners(&self) -> [Point; 4] {
        let (x1, y1) = (self.x, self.y);
        let (x2, y2) = (self.x + self.w, self.y + self.h);
        [
            Point::new(x1, y1),
            Point::new(x2, y1),
            Point::new(x2, y2),
            Point::new(x1, y2),
        ]
    }
}

impl Rect {
    /// Open-interval overlap test. Touching edges do not count.
    pub fn intersects(&self, b: &BoundingBox) -> bool {
        let (bx1, by1) = (b.x, b.y);
        let (bx2, by2) = (b.x + b.w, b.y + b.h);
        bx1 < self.x2 && bx2 > self.x1 && by1 < self.y2 && by2 > self.y1
    }
}

/// Rectangle spanned by a region's corner points.
///
/// Four points give their bounding box, two points are opposite corners of
/// a diagonal. Any other count yields no rectangle.
pub fn rect_from_points(points: &[Point]) -> Option<Rect> {
    match points.len() {
        2 | 4 => {
            let x1 = points.iter().map(|p| p.x).min()?;
            let x2 = points.iter().map(|p| p.x).max()?;
            let y1 = points.iter().map(|p| p.y).min()?;
            let y2 = points.iter().map(|p| p.y).max()?;
            Some(Rect { x1, y1, x2, y2 })
        }
        _ => None,
    }
}

/// Map the operator dials onto a detector confidence in `[0.05, 0.60]`.
///
/// Higher sensitivity lowers the required confidence, higher threshold
/// raises it. Threshold carries 70% of the weight.
pub fn confidence_from_threshold_sensitivity(threshold: i64, sensitivity: i64) -> f32 {
    let threshold = threshold.clamp(0, 100) as f64;
    let sensitivity = sensitivity.clamp(0, 100) as f64;

    let sensitivity_factor = (100.0 - sensitivity) / 100.0;
    let threshold_factor = threshold / 100.0;
    let base = 0.3 * sensitivity_factor + 0.7 * threshold_factor;
    let confidence = 0.05 + 0.55 * base;

    ((confidence * 1000.0).round() / 1000.0) as f32
}

/// Rectangles for every group that has a usable point count.
pub fn active_rects(groups: &[RoiGroup]) -> Vec<Rect> {
    let mut rects = Vec::with_capacity(groups.len());
    for (idx, group) in groups.iter().enumerate() {
        match rect_from_points(&group.rects) {
            Some(rect) => {
                log::debug!(
                    "roi group {}: rectangle ({}, {})-({}, {})",
                    idx,
                    rect.x1,
                    rect.y1,
                    rect.x2,
                    rect.y2
                );
                rects.push(rect);
            }
            None if group.rects.is_empty() => {}
            None => log::warn!(
                "roi group {} has {} points; need 2 or 4 to form a rectangle, ignoring",
                idx,
                group.rects.len()
            ),
        }
    }
    rects
}

/// Confidence from the first group whose threshold and sensitivity are both positive.
pub fn active_confidence(groups: &[RoiGroup]) -> Option<f32> {
    groups
        .iter()
        .find(|g| g.threshold > 0 && g.sensitivity > 0)
        .map(|g| confidence_from_threshold_sensitivity(g.threshold, g.sensitivity))
}

/// Keep boxes that overlap at least one rectangle. `None` means unfiltered.
pub fn filter_boxes(boxes: Vec<BoundingBox>, rects: Option<&[Rect]>) -> Vec<BoundingBox> {
    match rects {
        None => boxes,
        Some(rects) => boxes
            .into_iter()
            .filter(|b| rects.iter().any(|r| r.intersects(b)))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pts(raw: &[(i32, i32)]) -> Vec<Point> {
        raw.iter().map(|&(x, y)| Point::new(x, y)).collect()
    }

    #[test]
    fn four_points_give_bounding_box_in_any_order() {
        let expected = Rect { x1: 10, y1: 20, x2: 300, y2: 400 };
        let orders = [
            [(10, 20), (300, 20), (300, 400), (10, 400)],
            [(300, 400), (10, 20), (10, 400), (300, 20)],
            [(10, 400), (300, 20), (10, 20), (300, 400)],
        ];
        for order in orders {
            assert_eq!(rect_from_points(&pts(&order)), Some(expected));
        }
    }

    #[test]
    fn two_points_are_normalized_diagonal() {
        let expected = Rect { x1: 10, y1: 10, x2: 110, y2: 60 };
        assert_eq!(rect_from_points(&pts(&[(10, 10), (110, 60)])), Some(expected));
        assert_eq!(rect_from_points(&pts(&[(110, 60), (10, 10)])), Some(expected));
        assert_eq!(rect_from_points(&pts(&[(110, 10), (10, 60)])), Some(expected));
    }

    #[test]
    fn other_point_counts_give_nothing() {
        assert_eq!(rect_from_points(&[]), None);
        assert_eq!(rect_from_points(&pts(&[(1, 1)])), None);
        assert_eq!(rect_from_points(&pts(&[(1, 1), (2, 2), (3, 3)])), None);
        assert_eq!(
            rect_from_points(&pts(&[(1, 1), (2, 2), (3, 3), (4, 4), (5, 5)])),
            None
        );
    }

    #[test]
    fn confidence_example_from_operator_dials() {
        let c = confidence_from_threshold_sensitivity(40, 80);
        assert!((c - 0.237).abs() < 1e-6, "got {c}");
    }

    #[test]
    fn confidence_is_bounded_and_monotone() {
        for t in 0..=100 {
            for s in 0..=100 {
                let c = confidence_from_threshold_sensitivity(t, s);
                assert!((MIN_CONFIDENCE - 1e-6..=MAX_CONFIDENCE + 1e-6).contains(&c));
                if t < 100 {
                    assert!(confidence_from_threshold_sensitivity(t + 1, s) >= c);
                }
                if s < 100 {
                    assert!(confidence_from_threshold_sensitivity(t, s + 1) <= c);
                }
            }
        }
        assert_eq!(confidence_from_threshold_sensitivity(0, 100), MIN_CONFIDENCE);
        assert_eq!(confidence_from_threshold_sensitivity(100, 0), MAX_CONFIDENCE);
    }

    #[test]
    fn out_of_range_dials_are_clamped() {
        assert_eq!(
            confidence_from_threshold_sensitivity(250, -30),
            confidence_from_threshold_sensitivity(100, 0)
        );
    }

    #[test]
    fn overlap_not_containment() {
        let roi = Rect { x1: 100, y1: 100, x2: 200, y2: 200 };
        assert!(roi.intersects(&BoundingBox::new(150, 150, 10, 10)));
        assert!(roi.intersects(&BoundingBox::new(50, 50, 60, 60)));
        assert!(!roi.intersects(&BoundingBox::new(0, 0, 100, 100)));
        assert!(!roi.intersects(&BoundingBox::new(201, 120, 20, 20)));
    }

    #[test]
    fn filter_keeps_everything_without_rects() {
        let boxes = vec![BoundingBox::new(0, 0, 5, 5), BoundingBox::new(500, 500, 5, 5)];
        assert_eq!(filter_boxes(boxes.clone(), None), boxes);

        let rects = [Rect { x1: 0, y1: 0, x2: 10, y2: 10 }];
        assert_eq!(
            filter_boxes(boxes, Some(&rects)),
            vec![BoundingBox::new(0, 0, 5, 5)]
        );
    }

    #[test]
    fn corners_are_clockwise_from_top_left() {
        let corners = BoundingBox::new(10, 20, 30, 40).corners();
        assert_eq!(
            corners,
            [
                Point::new(10, 20),
                Point::new(40, 20),
                Point::new(40, 60),
                Point::new(10, 60)
            ]
        );
    }

    #[test]
    fn first_group_with_positive_dials_wins() {
        let groups = vec![
            RoiGroup { sensitivity: 0, threshold: 90, rects: vec![] },
            RoiGroup { sensitivity: 80, threshold: 40, rects: pts(&[(10, 10), (110, 60)]) },
            RoiGroup { sensitivity: 10, threshold: 10, rects: pts(&[(1, 1), (2, 2), (3, 3)]) },
        ];
        let c = active_confidence(&groups).unwrap();
        assert!((c - 0.237).abs() < 1e-6);
        assert_eq!(active_rects(&groups), vec![Rect { x1: 10, y1: 10, x2: 110, y2: 60 }]);
        assert_eq!(active_confidence(&groups[..1]), None);
    }
}
