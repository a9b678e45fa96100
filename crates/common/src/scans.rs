//! Plate scan contracts shared by the scan service and its callers.
//!
//! This module defines the geometric types produced by the detection and OCR
//! stages, and the request/response bodies of the scan HTTP API.

use serde::{Deserialize, Serialize};

/// Raster image as produced by a frame capture or a crop (RGBA8).
pub type RasterImage = image::RgbaImage;

/// Axis-aligned box in corner form `[x1, y1, x2, y2]`.
///
/// Corners are always ordered, so `x1 <= x2` and `y1 <= y2`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    /// Build a box from its center point and size
    pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self::new(
            cx - width / 2.0,
            cy - height / 2.0,
            cx + width / 2.0,
            cy + height / 2.0,
        )
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn as_array(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

/// Integer pixel rectangle in source image space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// A detector candidate that survived thresholding and suppression.
///
/// The box lives in the coordinate space of the detector's input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,

    /// Combined objectness x class score (0.0 to 1.0)
    pub score: f32,
}

/// Raw OCR output after slot decoding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedText {
    /// Non-pad characters in slot order
    pub text: String,

    /// Mean per-slot confidence as a percentage, `None` when there were no slots
    pub confidence: Option<f32>,
}

/// Request to scan a single still image for a plate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Encoded image (JPEG or PNG), base64 for JSON transport
    pub data: String,

    /// Image format hint (e.g., "jpeg", "png"); the payload is sniffed regardless
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// Return the cropped plate as base64 PNG
    #[serde(default)]
    pub include_crop: bool,

    /// Return the frame with the plate outlined as base64 PNG
    #[serde(default)]
    pub include_annotated: bool,
}

/// Query options for scanning the configured camera
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CameraScanParams {
    #[serde(default)]
    pub include_crop: bool,
}

/// Result of a successful plate scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResponse {
    /// Plate text normalized against known registration formats
    pub plate_text: String,

    /// OCR confidence percentage (0 to 100)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,

    /// OCR text before plate extraction
    pub raw_text: String,

    /// Detector score of the box the plate was read from
    pub detection_score: f32,

    /// Plate box in detector input space
    pub tensor_bbox: BoundingBox,

    /// Plate rectangle in the original frame
    pub source_rect: PixelRect,

    /// Cropped plate image (base64 PNG), only when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crop_png: Option<String>,

    /// Source frame with the plate outlined (base64 PNG), only when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotated_png: Option<String>,

    /// End-to-end scan latency in milliseconds
    pub processing_time_ms: u64,
}

/// Request to canonicalize a manually entered plate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeRequest {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeResponse {
    pub plate: String,
}

/// Vehicle record as returned by the external registry, passed through untouched
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleLookupResponse {
    pub plate: String,
    pub record: serde_json::Map<String, serde_json::Value>,
}
