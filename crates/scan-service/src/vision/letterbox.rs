//! Letterbox preprocessing into planar model input tensors
//!
//! The image is scaled to fit the target size with its aspect ratio kept,
//! centered on a filled canvas, and written channel-major (`[1, C, H, W]`).
//! The [`LetterboxTransform`] produced alongside the tensor is what maps
//! detector boxes back into the source image.

use crate::error::ScanError;
use common::scans::{BoundingBox, RasterImage};
use image::imageops::{self, FilterType};
use serde::{Deserialize, Serialize};

/// Numeric type of a model input tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    /// Raw 0-255 values
    U8,
    /// Values scaled to [0, 1]
    F32,
}

/// Channel layout of a model input tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelLayout {
    /// Three planes: red, green, blue
    Rgb,
    /// One luminance plane (0.299R + 0.587G + 0.114B)
    Luma,
}

impl ChannelLayout {
    pub fn count(self) -> usize {
        match self {
            ChannelLayout::Rgb => 3,
            ChannelLayout::Luma => 1,
        }
    }

    pub fn from_count(channels: usize) -> Option<Self> {
        match channels {
            3 => Some(ChannelLayout::Rgb),
            1 => Some(ChannelLayout::Luma),
            _ => None,
        }
    }
}

/// Canvas fill used for the padding bands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    Black,
    White,
}

impl Fill {
    fn value(self) -> f32 {
        match self {
            Fill::Black => 0.0,
            Fill::White => 255.0,
        }
    }
}

/// Target geometry and encoding of a letterboxed tensor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxSpec {
    pub width: u32,
    pub height: u32,
    pub channels: ChannelLayout,
    pub element: ElementType,
    pub fill: Fill,
}

impl LetterboxSpec {
    /// RGB input on a black canvas
    pub fn detector(width: u32, height: u32, element: ElementType) -> Self {
        Self {
            width,
            height,
            channels: ChannelLayout::Rgb,
            element,
            fill: Fill::Black,
        }
    }

    /// Plate crop input on a white canvas
    pub fn ocr(width: u32, height: u32, channels: ChannelLayout, element: ElementType) -> Self {
        Self {
            width,
            height,
            channels,
            element,
            fill: Fill::White,
        }
    }

    pub fn shape(&self) -> [usize; 4] {
        [
            1,
            self.channels.count(),
            self.height as usize,
            self.width as usize,
        ]
    }
}

/// Geometry needed to move coordinates between source image and tensor space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LetterboxTransform {
    pub scale: f32,
    pub pad_x: u32,
    pub pad_y: u32,
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub target_width: u32,
    pub target_height: u32,
}

impl LetterboxTransform {
    /// Fit an `image_width x image_height` image into the target size.
    ///
    /// Both image and target dimensions must be non-zero.
    pub fn fit(image_width: u32, image_height: u32, target_width: u32, target_height: u32) -> Self {
        let scale = (target_width as f32 / image_width as f32)
            .min(target_height as f32 / image_height as f32);

        let scaled_width = ((image_width as f32 * scale).round() as u32).clamp(1, target_width);
        let scaled_height = ((image_height as f32 * scale).round() as u32).clamp(1, target_height);

        Self {
            scale,
            pad_x: (target_width - scaled_width) / 2,
            pad_y: (target_height - scaled_height) / 2,
            scaled_width,
            scaled_height,
            target_width,
            target_height,
        }
    }

    /// Map a tensor-space point to source image space (unclamped)
    pub fn point_to_source(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }

    /// Map a source image point into tensor space
    pub fn point_to_tensor(&self, x: f32, y: f32) -> (f32, f32) {
        (
            x * self.scale + self.pad_x as f32,
            y * self.scale + self.pad_y as f32,
        )
    }

    /// Undo scale and padding for a tensor-space box (unclamped)
    pub fn to_source(&self, bbox: &BoundingBox) -> BoundingBox {
        let (x1, y1) = self.point_to_source(bbox.x1, bbox.y1);
        let (x2, y2) = self.point_to_source(bbox.x2, bbox.y2);
        BoundingBox::new(x1, y1, x2, y2)
    }

    /// Apply scale and padding to a source-space box
    pub fn to_tensor(&self, bbox: &BoundingBox) -> BoundingBox {
        let (x1, y1) = self.point_to_tensor(bbox.x1, bbox.y1);
        let (x2, y2) = self.point_to_tensor(bbox.x2, bbox.y2);
        BoundingBox::new(x1, y1, x2, y2)
    }
}

/// Flat tensor buffer
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    U8(Vec<u8>),
    F32(Vec<f32>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::U8(v) => v.len(),
            TensorData::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Model input tensor plus the transform that produced it.
///
/// The buffer length always equals the product of the shape.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedTensor {
    data: TensorData,
    shape: Vec<usize>,
    transform: LetterboxTransform,
}

impl PreparedTensor {
    pub fn new(
        data: TensorData,
        shape: Vec<usize>,
        transform: LetterboxTransform,
    ) -> Result<Self, ScanError> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(ScanError::tensor_prep(format!(
                "buffer holds {} values but shape {:?} needs {}",
                data.len(),
                shape,
                expected
            )));
        }

        Ok(Self {
            data,
            shape,
            transform,
        })
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn transform(&self) -> &LetterboxTransform {
        &self.transform
    }
}

fn luminance(r: u8, g: u8, b: u8) -> f32 {
    0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
}

/// Letterbox `image` into a planar tensor described by `spec`
pub fn letterbox(image: &RasterImage, spec: &LetterboxSpec) -> Result<PreparedTensor, ScanError> {
    let (image_width, image_height) = image.dimensions();
    if image_width == 0 || image_height == 0 {
        return Err(ScanError::tensor_prep("source image has zero size"));
    }
    if spec.width == 0 || spec.height == 0 {
        return Err(ScanError::tensor_prep("target tensor has zero size"));
    }

    let transform = LetterboxTransform::fit(image_width, image_height, spec.width, spec.height);
    let resized = imageops::resize(
        image,
        transform.scaled_width,
        transform.scaled_height,
        FilterType::Triangle,
    );

    let plane = spec.width as usize * spec.height as usize;
    let mut values = vec![spec.fill.value(); plane * spec.channels.count()];

    for (x, y, pixel) in resized.enumerate_pixels() {
        let tx = (x + transform.pad_x) as usize;
        let ty = (y + transform.pad_y) as usize;
        let idx = ty * spec.width as usize + tx;
        let [r, g, b, _] = pixel.0;

        match spec.channels {
            ChannelLayout::Rgb => {
                values[idx] = r as f32;
                values[plane + idx] = g as f32;
                values[2 * plane + idx] = b as f32;
            }
            ChannelLayout::Luma => values[idx] = luminance(r, g, b),
        }
    }

    let data = match spec.element {
        ElementType::U8 => {
            TensorData::U8(values.iter().map(|v| v.round().clamp(0.0, 255.0) as u8).collect())
        }
        ElementType::F32 => TensorData::F32(values.iter().map(|v| v / 255.0).collect()),
    };

    PreparedTensor::new(data, spec.shape().to_vec(), transform)
}
