//! Plate detector output decoding
//!
//! Detector exports disagree on axis order: some emit `[batch, boxes, channels]`,
//! others `[batch, channels, boxes]`. [`classify_box_layout`] decides which one
//! a tensor uses, and [`decode_detections`] turns it into scored corner boxes
//! followed by non-maximum suppression.

use crate::session::ModelOutput;
use common::scans::{BoundingBox, Detection};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Largest last-axis length still read as a channel axis
pub const MAX_BOX_CHANNELS: usize = 10;

/// Axis order of a detector output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxLayout {
    /// `[.., boxes, channels]`
    BoxesFirst,
    /// `[.., channels, boxes]`
    ChannelsFirst,
}

/// Classify detector output by its last two axes.
///
/// Returns `None` when the shape has fewer than two axes.
pub fn classify_box_layout(shape: &[usize]) -> Option<BoxLayout> {
    if shape.len() < 2 {
        return None;
    }

    if shape[shape.len() - 1] <= MAX_BOX_CHANNELS {
        Some(BoxLayout::BoxesFirst)
    } else {
        Some(BoxLayout::ChannelsFirst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecoderOptions {
    /// Minimum objectness x class score
    pub score_threshold: f32,

    /// Overlap above which the lower-scoring box is suppressed
    pub iou_threshold: f32,

    /// Coordinates whose sampled magnitude stays at or below this are read as
    /// fractions of the input size. Best-effort heuristic.
    pub normalized_coord_limit: f32,

    /// Number of leading candidates sampled for the heuristic above
    pub coord_sample_size: usize,

    pub max_detections: usize,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            score_threshold: 0.3,
            iou_threshold: 0.4,
            normalized_coord_limit: 1.5,
            coord_sample_size: 50,
            max_detections: 10,
        }
    }
}

/// Candidate view over the first batch of a detector output
struct CandidateGrid<'a> {
    data: &'a [f32],
    layout: BoxLayout,
    boxes: usize,
    channels: usize,
}

impl CandidateGrid<'_> {
    fn value(&self, candidate: usize, channel: usize) -> f32 {
        match self.layout {
            BoxLayout::BoxesFirst => self.data[candidate * self.channels + channel],
            BoxLayout::ChannelsFirst => self.data[channel * self.boxes + candidate],
        }
    }

    fn coords_are_normalized(&self, limit: f32, sample_size: usize) -> bool {
        let mut max_magnitude = 0.0f32;
        for i in 0..self.boxes.min(sample_size) {
            for c in 0..4 {
                max_magnitude = max_magnitude.max(self.value(i, c).abs());
            }
        }
        max_magnitude <= limit
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Decode raw detector output into suppressed detections, highest score first.
///
/// Boxes are returned in the detector's input tensor space.
pub fn decode_detections(
    output: &ModelOutput,
    input_width: u32,
    input_height: u32,
    options: &DecoderOptions,
) -> Vec<Detection> {
    let shape = output.shape.as_slice();
    let Some(layout) = classify_box_layout(shape) else {
        warn!(shape = ?shape, "detector output has fewer than two axes");
        return Vec::new();
    };

    let (rows, cols) = (shape[shape.len() - 2], shape[shape.len() - 1]);
    let (boxes, channels) = match layout {
        BoxLayout::BoxesFirst => (rows, cols),
        BoxLayout::ChannelsFirst => (cols, rows),
    };

    if channels < 4 || output.data.len() < boxes * channels {
        warn!(
            shape = ?shape,
            values = output.data.len(),
            "detector output cannot hold box coordinates"
        );
        return Vec::new();
    }

    let grid = CandidateGrid {
        data: &output.data,
        layout,
        boxes,
        channels,
    };

    let normalized =
        grid.coords_are_normalized(options.normalized_coord_limit, options.coord_sample_size);
    let (sx, sy) = if normalized {
        (input_width as f32, input_height as f32)
    } else {
        (1.0, 1.0)
    };

    debug!(
        ?layout,
        boxes,
        channels,
        normalized,
        "decoding detector output"
    );

    let mut candidates = Vec::new();
    for i in 0..boxes {
        let objectness = if channels > 4 { sigmoid(grid.value(i, 4)) } else { 1.0 };
        let class_score = if channels > 5 { sigmoid(grid.value(i, 5)) } else { 1.0 };
        let score = objectness * class_score;

        // Also drops NaN scores
        if !(score >= options.score_threshold) {
            continue;
        }

        let bbox = BoundingBox::from_center(
            grid.value(i, 0) * sx,
            grid.value(i, 1) * sy,
            grid.value(i, 2) * sx,
            grid.value(i, 3) * sy,
        );
        candidates.push(Detection { bbox, score });
    }

    let mut kept = non_max_suppression(candidates, options.iou_threshold);
    kept.truncate(options.max_detections);
    kept
}

/// Intersection over union of two corner boxes.
///
/// Zero-area boxes overlap nothing; the union is floored at 1.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let area_a = a.area();
    let area_b = b.area();

    let intersection = if area_a <= 0.0 || area_b <= 0.0 {
        0.0
    } else {
        let w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
        let h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
        w * h
    };

    let union = (area_a + area_b - intersection).max(1.0);
    intersection / union
}

/// Apply Non-Maximum Suppression (NMS)
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();

    while !detections.is_empty() {
        let current = detections.remove(0);
        detections.retain(|d| iou(&current.bbox, &d.bbox) <= iou_threshold);
        keep.push(current);
    }

    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logit(p: f32) -> f32 {
        (p / (1.0 - p)).ln()
    }

    fn det(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> Detection {
        Detection {
            bbox: BoundingBox::new(x1, y1, x2, y2),
            score,
        }
    }

    /// Rows of `[cx, cy, w, h, objectness_logit, class_logit]`
    fn sample_rows() -> Vec<[f32; 6]> {
        let mut rows = vec![
            [320.0, 240.0, 100.0, 30.0, logit(0.95), logit(0.9)],
            // Heavy overlap with the first, lower score
            [322.0, 241.0, 100.0, 30.0, logit(0.9), logit(0.9)],
            [100.0, 100.0, 80.0, 20.0, logit(0.8), logit(0.8)],
        ];
        // Background candidates below threshold
        while rows.len() < 12 {
            let i = rows.len() as f32;
            rows.push([10.0 * i, 20.0 * i, 5.0, 5.0, logit(0.1), logit(0.5)]);
        }
        rows
    }

    fn boxes_first(rows: &[[f32; 6]]) -> ModelOutput {
        ModelOutput {
            shape: vec![1, rows.len(), 6],
            data: rows.iter().flatten().copied().collect(),
        }
    }

    fn channels_first(rows: &[[f32; 6]]) -> ModelOutput {
        let mut data = Vec::new();
        for c in 0..6 {
            data.extend(rows.iter().map(|r| r[c]));
        }
        ModelOutput {
            shape: vec![1, 6, rows.len()],
            data,
        }
    }

    #[test]
    fn test_classify_box_layout() {
        assert_eq!(classify_box_layout(&[1, 8400, 5]), Some(BoxLayout::BoxesFirst));
        assert_eq!(classify_box_layout(&[1, 25200, 10]), Some(BoxLayout::BoxesFirst));
        assert_eq!(classify_box_layout(&[1, 5, 8400]), Some(BoxLayout::ChannelsFirst));
        assert_eq!(classify_box_layout(&[8400, 6]), Some(BoxLayout::BoxesFirst));
        assert_eq!(classify_box_layout(&[6]), None);
        assert_eq!(classify_box_layout(&[]), None);
    }

    #[test]
    fn test_transposed_layouts_decode_identically() {
        let rows = sample_rows();
        let options = DecoderOptions::default();

        let a = decode_detections(&boxes_first(&rows), 640, 640, &options);
        let b = decode_detections(&channels_first(&rows), 640, 640, &options);

        assert_eq!(a.len(), 2);
        assert_eq!(a, b);
        assert_eq!(a[0].bbox.as_array(), [270.0, 225.0, 370.0, 255.0]);
        assert!((a[0].score - 0.855).abs() < 1e-3);
        assert_eq!(a[1].bbox.as_array(), [60.0, 90.0, 140.0, 110.0]);
    }

    #[test]
    fn test_normalized_coordinates_are_scaled() {
        let output = ModelOutput {
            shape: vec![1, 1, 4],
            data: vec![0.5, 0.25, 0.25, 0.1],
        };
        let detections = decode_detections(&output, 640, 320, &DecoderOptions::default());

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].bbox.as_array(), [240.0, 64.0, 400.0, 96.0]);
        // No score channels: both default to 1
        assert_eq!(detections[0].score, 1.0);
    }

    #[test]
    fn test_normalized_limit_is_configurable() {
        let output = ModelOutput {
            shape: vec![1, 1, 4],
            data: vec![2.0, 2.0, 2.0, 2.0],
        };
        let options = DecoderOptions {
            normalized_coord_limit: 3.0,
            ..DecoderOptions::default()
        };
        let detections = decode_detections(&output, 100, 100, &options);
        assert_eq!(detections[0].bbox.as_array(), [100.0, 100.0, 300.0, 300.0]);
    }

    #[test]
    fn test_objectness_only() {
        let output = ModelOutput {
            shape: vec![1, 2, 5],
            data: vec![
                50.0, 50.0, 10.0, 10.0, logit(0.6), //
                90.0, 90.0, 10.0, 10.0, logit(0.2),
            ],
        };
        let detections = decode_detections(&output, 640, 640, &DecoderOptions::default());
        assert_eq!(detections.len(), 1);
        assert!((detections[0].score - 0.6).abs() < 1e-4);
    }

    #[test]
    fn test_unusable_shapes_yield_nothing() {
        let options = DecoderOptions::default();
        let flat = ModelOutput {
            shape: vec![12],
            data: vec![0.0; 12],
        };
        assert!(decode_detections(&flat, 640, 640, &options).is_empty());

        let too_few_channels = ModelOutput {
            shape: vec![1, 4, 3],
            data: vec![1.0; 12],
        };
        assert!(decode_detections(&too_few_channels, 640, 640, &options).is_empty());

        let short_buffer = ModelOutput {
            shape: vec![1, 4, 6],
            data: vec![1.0; 10],
        };
        assert!(decode_detections(&short_buffer, 640, 640, &options).is_empty());
    }

    #[test]
    fn test_max_detections_cap() {
        let rows: Vec<[f32; 6]> = (0..12)
            .map(|i| [50.0 * i as f32 + 20.0, 20.0, 10.0, 10.0, 5.0, 5.0])
            .collect();
        let options = DecoderOptions {
            max_detections: 3,
            ..DecoderOptions::default()
        };
        assert_eq!(decode_detections(&boxes_first(&rows), 640, 640, &options).len(), 3);
    }

    #[test]
    fn test_iou_identities() {
        let a = BoundingBox::new(10.0, 10.0, 60.0, 30.0);
        let far = BoundingBox::new(100.0, 100.0, 150.0, 120.0);
        let partial = BoundingBox::new(30.0, 15.0, 80.0, 35.0);

        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(iou(&a, &far), 0.0);
        let p = iou(&a, &partial);
        assert!(p > 0.0 && p < 1.0);
        assert!((p - iou(&partial, &a)).abs() < 1e-6);
    }

    #[test]
    fn test_iou_degenerate_boxes() {
        let point = BoundingBox::new(10.0, 10.0, 10.0, 10.0);
        let a = BoundingBox::new(0.0, 0.0, 20.0, 20.0);
        assert_eq!(iou(&point, &a), 0.0);
        assert_eq!(iou(&point, &point), 0.0);
    }

    #[test]
    fn test_nms() {
        let detections = vec![
            det(10.0, 10.0, 110.0, 40.0, 0.9),
            det(15.0, 12.0, 115.0, 42.0, 0.8),
            det(200.0, 200.0, 300.0, 230.0, 0.85),
        ];

        let filtered = non_max_suppression(detections, 0.4);
        // Should keep highest confidence from overlapping + non-overlapping
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].score, 0.9);
        assert_eq!(filtered[1].score, 0.85);
    }

    #[test]
    fn test_nms_idempotent() {
        let detections = vec![
            det(0.0, 0.0, 100.0, 100.0, 0.5),
            det(10.0, 10.0, 110.0, 110.0, 0.7),
            det(50.0, 50.0, 150.0, 150.0, 0.6),
            det(300.0, 0.0, 400.0, 50.0, 0.4),
            det(305.0, 2.0, 402.0, 52.0, 0.45),
        ];

        let once = non_max_suppression(detections, 0.4);
        let twice = non_max_suppression(once.clone(), 0.4);
        assert_eq!(once, twice);
    }
}
