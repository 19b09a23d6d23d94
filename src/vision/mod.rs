//! Vision primitives and detector collaborators
//!
//! Frames, screen geometry, and the narrow interfaces through which the
//! interpreter reaches screen capture, template matching and OCR. Pixel-level
//! work that the engine needs itself (color presence, motion) lives here too.

pub mod capture;
pub mod color;
pub mod ocr;
pub mod template;

use serde::{Deserialize, Serialize};

pub use capture::{crop, FrameProvider, ScreenCapture};
pub use color::{count_hsv_in_range, is_rgb_color_present, motion_score, Hsv};
pub use ocr::{NoOcr, OcrEngine};
pub use template::{ImageprocMatcher, MultiScaleMatch, ScaleRange, TemplateMatcher};

/// A captured screen image
pub type Frame = image::RgbaImage;

/// A point in screen pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    /// Create a new point
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point
    pub fn distance(&self, other: Point) -> f64 {
        let dx = (other.x - self.x) as f64;
        let dy = (other.y - self.y) as f64;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Axis-aligned screen rectangle, right/bottom exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    /// Create a rectangle from its edges
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Create a rectangle from an origin and a size
    pub fn from_xywh(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self::new(x, y, x + width as i32, y + height as i32)
    }

    /// Rectangle covering an entire frame
    pub fn of_frame(frame: &Frame) -> Self {
        Self::from_xywh(0, 0, frame.width(), frame.height())
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// Number of pixels covered, zero for degenerate rectangles
    pub fn area(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            self.width() as u64 * self.height() as u64
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    pub fn center(&self) -> Point {
        Point::new(
            self.left + self.width() / 2,
            self.top + self.height() / 2,
        )
    }

    /// Intersect with the bounds of a `width` x `height` frame
    pub fn clamp_to(&self, width: u32, height: u32) -> Rect {
        Rect::new(
            self.left.max(0),
            self.top.max(0),
            self.right.min(width as i32),
            self.bottom.min(height as i32),
        )
    }
}

/// Vision system errors
#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("Invalid frame data")]
    InvalidFrameData,
    #[error("No frame has been captured yet")]
    NoFrame,
    #[error("Frame capture failed: {0}")]
    CaptureFailed(String),
    #[error("Template matching failed: {0}")]
    TemplateMatchError(String),
    #[error("Failed to process image: {0}")]
    ImageProcessingError(String),
}
