//! Color presence, HSV range counting and frame motion
//!
//! HSV values follow the 8-bit OpenCV convention: hue in `0..180`,
//! saturation and value in `0..=255`.

use image::{GrayImage, Rgba};
use serde::{Deserialize, Serialize};

use super::{Frame, Rect};

/// HSV color triple
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Hsv {
    pub h: f64,
    pub s: f64,
    pub v: f64,
}

impl Hsv {
    pub const fn new(h: f64, s: f64, v: f64) -> Self {
        Self { h, s, v }
    }

    /// Inclusive per-component range test
    pub fn within(&self, min: &Hsv, max: &Hsv) -> bool {
        (min.h..=max.h).contains(&self.h)
            && (min.s..=max.s).contains(&self.s)
            && (min.v..=max.v).contains(&self.v)
    }
}

/// Convert an 8-bit RGB triple to HSV
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> Hsv {
    let (r, g, b) = (r as f64, g as f64, b as f64);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let diff = max - min;

    let s = if max > 0.0 { diff / max * 255.0 } else { 0.0 };

    let mut h = if diff == 0.0 {
        0.0
    } else if max == r {
        60.0 * (g - b) / diff
    } else if max == g {
        120.0 + 60.0 * (b - r) / diff
    } else {
        240.0 + 60.0 * (r - g) / diff
    };
    if h < 0.0 {
        h += 360.0;
    }

    Hsv::new(h / 2.0, s, max)
}

/// Unpack an `0xAARRGGBB` color
pub fn argb_to_rgba(argb: u32) -> Rgba<u8> {
    let [a, r, g, b] = argb.to_be_bytes();
    Rgba([r, g, b, a])
}

/// Check if two colors match within a per-channel tolerance (alpha ignored)
pub fn color_matches(a: &Rgba<u8>, b: &Rgba<u8>, tolerance: u8) -> bool {
    let dr = a[0].abs_diff(b[0]);
    let dg = a[1].abs_diff(b[1]);
    let db = a[2].abs_diff(b[2]);

    dr <= tolerance && dg <= tolerance && db <= tolerance
}

/// True if any pixel inside `region` matches `target` within `tolerance`
///
/// The region is clamped to the frame; an empty intersection never matches.
pub fn is_rgb_color_present(frame: &Frame, region: Rect, target: Rgba<u8>, tolerance: u8) -> bool {
    let clamped = region.clamp_to(frame.width(), frame.height());
    if clamped.is_empty() {
        return false;
    }

    (clamped.top..clamped.bottom).any(|y| {
        (clamped.left..clamped.right).any(|x| {
            color_matches(frame.get_pixel(x as u32, y as u32), &target, tolerance)
        })
    })
}

/// Count pixels of `region` whose HSV value falls inside `[min, max]`
pub fn count_hsv_in_range(frame: &Frame, region: Rect, min: &Hsv, max: &Hsv) -> u64 {
    let clamped = region.clamp_to(frame.width(), frame.height());
    if clamped.is_empty() {
        return 0;
    }

    let mut count = 0;
    for y in clamped.top..clamped.bottom {
        for x in clamped.left..clamped.right {
            let pixel = frame.get_pixel(x as u32, y as u32);
            if rgb_to_hsv(pixel[0], pixel[1], pixel[2]).within(min, max) {
                count += 1;
            }
        }
    }
    count
}

/// Mean absolute difference between two grayscale frames, normalised to `[0, 1]`
///
/// Frames of different sizes are not comparable and score zero.
pub fn motion_score(previous: &GrayImage, current: &GrayImage) -> f32 {
    if previous.dimensions() != current.dimensions() {
        return 0.0;
    }

    let pixel_count = previous.width() as u64 * previous.height() as u64;
    if pixel_count == 0 {
        return 0.0;
    }

    let total: u64 = previous
        .pixels()
        .zip(current.pixels())
        .map(|(a, b)| a[0].abs_diff(b[0]) as u64)
        .sum();

    (total as f64 / pixel_count as f64 / 255.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma};

    #[test]
    fn test_color_matching() {
        let color_a = Rgba([100, 100, 100, 255]);
        let color_b = Rgba([105, 95, 100, 0]);

        assert!(color_matches(&color_a, &color_b, 10));
        assert!(!color_matches(&color_a, &color_b, 3));
    }

    #[test]
    fn test_argb_unpacking() {
        assert_eq!(argb_to_rgba(0xFF10_2030), Rgba([0x10, 0x20, 0x30, 0xFF]));
    }

    #[test]
    fn test_rgb_presence_in_region() {
        let frame: Frame = ImageBuffer::from_fn(10, 10, |x, y| {
            if x == 7 && y == 7 {
                Rgba([250, 10, 10, 255])
            } else {
                Rgba([0, 0, 0, 255])
            }
        });
        let red = Rgba([255, 0, 0, 255]);

        assert!(is_rgb_color_present(&frame, Rect::new(5, 5, 10, 10), red, 10));
        assert!(!is_rgb_color_present(&frame, Rect::new(0, 0, 5, 5), red, 10));
        // Region outside the frame never matches
        assert!(!is_rgb_color_present(&frame, Rect::new(20, 20, 30, 30), red, 255));
    }

    #[test]
    fn test_rgb_to_hsv_primaries() {
        let red = rgb_to_hsv(255, 0, 0);
        assert_eq!(red, Hsv::new(0.0, 255.0, 255.0));

        let green = rgb_to_hsv(0, 255, 0);
        assert_eq!(green.h, 60.0);

        let blue = rgb_to_hsv(0, 0, 255);
        assert_eq!(blue.h, 120.0);

        let gray = rgb_to_hsv(128, 128, 128);
        assert_eq!(gray, Hsv::new(0.0, 0.0, 128.0));
    }

    #[test]
    fn test_count_hsv_in_range() {
        // Left half green, right half gray
        let frame: Frame = ImageBuffer::from_fn(10, 4, |x, _| {
            if x < 5 {
                Rgba([0, 200, 0, 255])
            } else {
                Rgba([90, 90, 90, 255])
            }
        });

        let min = Hsv::new(50.0, 100.0, 100.0);
        let max = Hsv::new(70.0, 255.0, 255.0);
        assert_eq!(count_hsv_in_range(&frame, Rect::of_frame(&frame), &min, &max), 20);
        assert_eq!(count_hsv_in_range(&frame, Rect::new(5, 0, 10, 4), &min, &max), 0);
    }

    #[test]
    fn test_motion_score() {
        let dark: GrayImage = ImageBuffer::from_pixel(8, 8, Luma([0]));
        let bright: GrayImage = ImageBuffer::from_pixel(8, 8, Luma([255]));
        let small: GrayImage = ImageBuffer::from_pixel(4, 4, Luma([255]));

        assert_eq!(motion_score(&dark, &dark), 0.0);
        assert!((motion_score(&dark, &bright) - 1.0).abs() < f32::EPSILON);
        assert_eq!(motion_score(&dark, &small), 0.0);
    }
}
