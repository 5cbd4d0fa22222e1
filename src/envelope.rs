//! Result envelope posted to the remote collector.

use serde::Serialize;

use crate::roi::{BoundingBox, Point};

/// Protocol version stamped on outbound envelopes.
pub const ENVELOPE_VERSION: &str = "1.2";

/// Packaged detection output. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResultEnvelope {
    pub version: String,
    /// Instance identity (the control port).
    pub port_num: u16,
    /// Base64 JPEG of the annotated frame.
    pub keyframe: String,
    pub timestamp: u64,
    /// One group of four corners per detected box.
    pub rois_rects: Vec<[Point; 4]>,
}

impl ResultEnvelope {
    pub fn new(port_num: u16, keyframe: String, timestamp: u64, boxes: &[BoundingBox]) -> Self {
        Self {
            version: ENVELOPE_VERSION.to_string(),
            port_num,
            keyframe,
            timestamp,
            rois_rects: boxes.iter().map(BoundingBox::corners).collect(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_wire_shape() {
        let env = ResultEnvelope::new(51000, "AAAA".to_string(), 42, &[BoundingBox::new(1, 2, 3, 4)]);
        let value: serde_json::Value = serde_json::from_slice(&env.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "version": "1.2",
                "port_num": 51000,
                "keyframe": "AAAA",
                "timestamp": 42,
                "rois_rects": [[
                    {"x": 1, "y": 2},
                    {"x": 4, "y": 2},
                    {"x": 4, "y": 6},
                    {"x": 1, "y": 6}
                ]]
            })
        );
    }
}
