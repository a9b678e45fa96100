//! Display helpers for scan artifacts

use common::scans::{PixelRect, RasterImage};
use image::Rgba;
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

const PLATE_OUTLINE: Rgba<u8> = Rgba([0, 255, 0, 255]);

/// Copy of `frame` with the plate rectangle outlined
pub fn outline_plate(frame: &RasterImage, rect: &PixelRect, thickness: u32) -> RasterImage {
    let mut annotated = frame.clone();

    for inset in 0..thickness {
        let width = rect.width.saturating_sub(2 * inset);
        let height = rect.height.saturating_sub(2 * inset);
        if width == 0 || height == 0 {
            break;
        }
        let outline =
            Rect::at((rect.x + inset) as i32, (rect.y + inset) as i32).of_size(width, height);
        draw_hollow_rect_mut(&mut annotated, outline, PLATE_OUTLINE);
    }

    annotated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outline_plate() {
        let frame = RasterImage::from_pixel(20, 10, Rgba([0, 0, 0, 255]));
        let rect = PixelRect {
            x: 2,
            y: 2,
            width: 10,
            height: 5,
        };

        let annotated = outline_plate(&frame, &rect, 2);
        assert_eq!(*annotated.get_pixel(2, 2), PLATE_OUTLINE);
        assert_eq!(*annotated.get_pixel(3, 3), PLATE_OUTLINE);
        assert_eq!(*annotated.get_pixel(11, 6), PLATE_OUTLINE);
        // Interior and outside untouched
        assert_eq!(*annotated.get_pixel(6, 4), Rgba([0, 0, 0, 255]));
        assert_eq!(*annotated.get_pixel(15, 8), Rgba([0, 0, 0, 255]));
        // Source frame is not modified
        assert_eq!(*frame.get_pixel(2, 2), Rgba([0, 0, 0, 255]));
    }
}
