//! Mapping detector boxes back onto the captured frame and cutting out the plate

use super::letterbox::LetterboxTransform;
use common::scans::{BoundingBox, PixelRect, RasterImage};
use image::imageops;

/// Cropped plate and where it came from in the source frame
#[derive(Debug, Clone)]
pub struct PlateCrop {
    pub image: RasterImage,
    pub rect: PixelRect,
}

/// Convert a tensor-space box into a pixel rectangle of an
/// `image_width x image_height` frame.
///
/// Coordinates are clamped to the frame; a side that rounds to zero becomes one
/// pixel so the crop is never empty.
pub fn source_rect(
    bbox: &BoundingBox,
    transform: &LetterboxTransform,
    image_width: u32,
    image_height: u32,
) -> PixelRect {
    let source = transform.to_source(bbox);
    let (w, h) = (image_width as f32, image_height as f32);

    let x1 = source.x1.max(0.0).min(w);
    let y1 = source.y1.max(0.0).min(h);
    let x2 = source.x2.max(0.0).min(w);
    let y2 = source.y2.max(0.0).min(h);

    let x = (x1.floor() as u32).min(image_width.saturating_sub(1));
    let y = (y1.floor() as u32).min(image_height.saturating_sub(1));
    let width = ((x2 - x1).round() as u32)
        .max(1)
        .min(image_width.saturating_sub(x).max(1));
    let height = ((y2 - y1).round() as u32)
        .max(1)
        .min(image_height.saturating_sub(y).max(1));

    PixelRect {
        x,
        y,
        width,
        height,
    }
}

/// Cut the plate described by a tensor-space box out of the original frame
pub fn crop_plate(image: &RasterImage, bbox: &BoundingBox, transform: &LetterboxTransform) -> PlateCrop {
    let rect = source_rect(bbox, transform, image.width(), image.height());
    let cropped = imageops::crop_imm(image, rect.x, rect.y, rect.width, rect.height).to_image();

    PlateCrop {
        image: cropped,
        rect,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_source_rect_undoes_letterbox() {
        // 1280x720 into 640x640: scale 0.5, pad_y 140
        let t = LetterboxTransform::fit(1280, 720, 640, 640);
        let bbox = BoundingBox::new(100.0, 240.0, 200.0, 260.0);

        let rect = source_rect(&bbox, &t, 1280, 720);
        assert_eq!(
            rect,
            PixelRect {
                x: 200,
                y: 200,
                width: 200,
                height: 40
            }
        );
    }

    #[test]
    fn test_source_rect_clamps_to_frame() {
        let t = LetterboxTransform::fit(1280, 720, 640, 640);
        // Box reaching into both padding bands and past the right edge
        let bbox = BoundingBox::new(600.0, 100.0, 700.0, 600.0);

        let rect = source_rect(&bbox, &t, 1280, 720);
        assert_eq!(rect.x, 1200);
        assert_eq!(rect.y, 0);
        assert_eq!(rect.width, 80);
        assert_eq!(rect.height, 720);
    }

    #[test]
    fn test_degenerate_box_becomes_one_pixel() {
        let t = LetterboxTransform::fit(100, 100, 100, 100);
        let bbox = BoundingBox::new(50.0, 50.0, 50.2, 50.1);

        let rect = source_rect(&bbox, &t, 100, 100);
        assert_eq!((rect.width, rect.height), (1, 1));

        // Entirely outside the frame still yields a valid pixel
        let outside = BoundingBox::new(150.0, 150.0, 160.0, 160.0);
        let rect = source_rect(&outside, &t, 100, 100);
        assert_eq!((rect.x, rect.y, rect.width, rect.height), (99, 99, 1, 1));
    }

    #[test]
    fn test_crop_plate_extracts_region() {
        let mut image = RasterImage::from_pixel(200, 100, Rgba([0, 0, 0, 255]));
        for x in 50..150 {
            for y in 40..60 {
                image.put_pixel(x, y, Rgba([255, 255, 255, 255]));
            }
        }

        let t = LetterboxTransform::fit(200, 100, 400, 400);
        let bbox = t.to_tensor(&BoundingBox::new(50.0, 40.0, 150.0, 60.0));
        let crop = crop_plate(&image, &bbox, &t);

        assert_eq!(crop.image.dimensions(), (100, 20));
        assert!(crop.image.pixels().all(|p| p.0 == [255, 255, 255, 255]));
    }
}
