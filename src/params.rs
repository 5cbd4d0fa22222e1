//! Runtime configuration and the parameter store.
//!
//! The control endpoint parses `POST /SetParameters` bodies into a
//! `Configuration` and drops it into the `ParameterStore`. The dispatch loop
//! picks each update up exactly once via `take_if_dirty`.

use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::{BridgeError, Result};
use crate::roi::{self, Point, Rect};

pub const DEFAULT_PROTOCOL_VERSION: &str = "1.2";
pub const DEFAULT_JPG_QUALITY: u8 = 50;
const DEFAULT_DIAL: i64 = 50;
const UNSET_COORDINATE: i64 = -1;

/// One operator-configured region of interest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoiGroup {
    pub sensitivity: i64,
    pub threshold: i64,
    /// Corner points, 2 or 4 to be usable.
    pub rects: Vec<Point>,
}

/// A complete configuration update. Replaced wholesale, never merged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Configuration {
    pub version: String,
    pub analytics_event_api_url: String,
    pub image_width: i64,
    pub image_height: i64,
    pub jpg_compress: i64,
    pub rois: Vec<RoiGroup>,
}

impl Configuration {
    /// Parse a control body. Integer fields accept numbers or numeric strings.
    pub fn from_json(body: &[u8]) -> serde_json::Result<Self> {
        let wire: ConfigurationBody = serde_json::from_slice(body)?;
        Ok(wire.into())
    }

    /// A configuration is usable only with a destination URL and positive dimensions.
    pub fn validate(&self) -> Result<()> {
        if self.analytics_event_api_url.trim().is_empty() {
            return Err(BridgeError::InvalidConfiguration(
                "analytics_event_api_url is empty".to_string(),
            ));
        }
        if self.image_width <= 0 || self.image_height <= 0 {
            return Err(BridgeError::InvalidConfiguration(format!(
                "image dimensions must be positive, got {}x{}",
                self.image_width, self.image_height
            )));
        }
        Ok(())
    }
}

/// Values the dispatch loop derives from an accepted configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct ActiveParameters {
    pub url: String,
    pub image_width: u32,
    pub image_height: u32,
    pub jpg_quality: u8,
    pub rects: Vec<Rect>,
    /// `None` when no group has both dials positive; the detector keeps its current value.
    pub confidence: Option<f32>,
}

impl ActiveParameters {
    /// Validate and derive. Rejected configurations leave the caller's state untouched.
    pub fn derive(config: &Configuration, previous_quality: u8) -> Result<Self> {
        config.validate()?;
        let jpg_quality = if config.jpg_compress > 0 {
            config.jpg_compress.min(100) as u8
        } else {
            previous_quality
        };
        Ok(Self {
            url: config.analytics_event_api_url.clone(),
            image_width: clamp_dimension(config.image_width),
            image_height: clamp_dimension(config.image_height),
            jpg_quality,
            rects: roi::active_rects(&config.rois),
            confidence: roi::active_confidence(&config.rois),
        })
    }

    /// Rectangles for detector filtering, `None` meaning unfiltered.
    pub fn roi_filter(&self) -> Option<&[Rect]> {
        if self.rects.is_empty() {
            None
        } else {
            Some(&self.rects)
        }
    }
}

fn clamp_dimension(value: i64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

#[derive(Debug, Default)]
struct Slot {
    config: Option<Configuration>,
    dirty: bool,
}

/// Single-slot holder with a dirty flag.
///
/// Written by the control endpoint, drained by the dispatch loop. The
/// read-and-clear in `take_if_dirty` happens under the same lock as `set`.
#[derive(Debug, Default)]
pub struct ParameterStore {
    slot: Mutex<Slot>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored configuration and mark it dirty.
    ///
    /// The slot holds the last received update, valid or not. Whether it is
    /// accepted is decided by the consumer of `take_if_dirty`.
    pub fn set(&self, config: Configuration) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.config = Some(config);
        slot.dirty = true;
    }

    /// Return the stored configuration if it changed since the last call.
    pub fn take_if_dirty(&self) -> Option<Configuration> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if !slot.dirty {
            return None;
        }
        slot.dirty = false;
        slot.config.clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).dirty
    }
}

// ----------------------------------------------------------------------------
// Wire format for POST /SetParameters
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ConfigurationBody {
    #[serde(default = "default_version")]
    version: String,
    #[serde(default)]
    analytics_event_api_url: String,
    #[serde(default, deserialize_with = "lenient_int")]
    image_width: i64,
    #[serde(default, deserialize_with = "lenient_int")]
    image_height: i64,
    #[serde(default = "default_jpg_compress", deserialize_with = "lenient_int")]
    jpg_compress: i64,
    #[serde(default)]
    rois: Vec<RoiGroupBody>,
}

#[derive(Debug, Deserialize)]
struct RoiGroupBody {
    #[serde(default = "default_dial", deserialize_with = "lenient_int")]
    sensitivity: i64,
    #[serde(default = "default_dial", deserialize_with = "lenient_int")]
    threshold: i64,
    #[serde(default)]
    rects: Vec<PointBody>,
}

#[derive(Debug, Deserialize)]
struct PointBody {
    #[serde(default = "unset_coordinate", deserialize_with = "lenient_int")]
    x: i64,
    #[serde(default = "unset_coordinate", deserialize_with = "lenient_int")]
    y: i64,
}

impl From<ConfigurationBody> for Configuration {
    fn from(body: ConfigurationBody) -> Self {
        Self {
            version: body.version,
            analytics_event_api_url: body.analytics_event_api_url,
            image_width: body.image_width,
            image_height: body.image_height,
            jpg_compress: body.jpg_compress,
            rois: body.rois.into_iter().map(RoiGroup::from).collect(),
        }
    }
}

impl From<RoiGroupBody> for RoiGroup {
    fn from(body: RoiGroupBody) -> Self {
        Self {
            sensitivity: body.sensitivity,
            threshold: body.threshold,
            rects: body
                .rects
                .into_iter()
                .map(|p| Point::new(saturate_i32(p.x), saturate_i32(p.y)))
                .collect(),
        }
    }
}

fn saturate_i32(value: i64) -> i32 {
    value.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

fn default_version() -> String {
    DEFAULT_PROTOCOL_VERSION.to_string()
}

fn default_jpg_compress() -> i64 {
    DEFAULT_JPG_QUALITY as i64
}

fn default_dial() -> i64 {
    DEFAULT_DIAL
}

fn unset_coordinate() -> i64 {
    UNSET_COORDINATE
}

/// Accept `640`, `640.0` or `"640"`; reject anything else.
fn lenient_int<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
            .ok_or_else(|| D::Error::custom(format!("integer out of range: {n}"))),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| D::Error::custom(format!("expected an integer, got \"{s}\""))),
        other => Err(D::Error::custom(format!("expected an integer, got {other}"))),
    }
}
