//! Screen capture handling
//!
//! Receives raw screen capture data from the platform and hands frames to
//! the interpreter and detectors.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use image::{ImageBuffer, Rgba};

use super::{Frame, Rect, VisionError};

/// Source of the current screen image
///
/// Implementations may suspend (e.g. waiting for the next projection frame).
/// Errors abort whatever is waiting on the frame.
#[async_trait]
pub trait FrameProvider: Send + Sync {
    /// Fetch the current frame
    async fn frame(&self) -> Result<Frame, VisionError>;
}

/// Latest-frame buffer fed by the platform capture pipeline
pub struct ScreenCapture {
    /// Current frame
    current_frame: Mutex<Option<Frame>>,
    /// Frame counter
    frame_count: AtomicU64,
}

impl ScreenCapture {
    /// Create an empty capture buffer
    pub fn new() -> Self {
        Self {
            current_frame: Mutex::new(None),
            frame_count: AtomicU64::new(0),
        }
    }

    /// Create a capture buffer that already holds a frame
    pub fn from_frame(frame: Frame) -> Self {
        let capture = Self::new();
        capture.set_frame(frame);
        capture
    }

    /// Update with new raw RGBA frame data
    pub fn update(&self, frame_data: &[u8], width: u32, height: u32) -> Result<(), VisionError> {
        if rgba_len(width, height) != Some(frame_data.len()) {
            return Err(VisionError::InvalidFrameData);
        }

        let image: Frame = ImageBuffer::from_raw(width, height, frame_data.to_vec())
            .ok_or(VisionError::InvalidFrameData)?;

        self.set_frame(image);
        Ok(())
    }

    /// Replace the current frame with an already decoded image
    pub fn set_frame(&self, frame: Frame) {
        *self.lock() = Some(frame);
        self.frame_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a copy of the current frame
    pub fn current_frame(&self) -> Option<Frame> {
        self.lock().clone()
    }

    /// Dimensions of the current frame, `(0, 0)` before the first update
    pub fn dimensions(&self) -> (u32, u32) {
        self.lock()
            .as_ref()
            .map(|frame| frame.dimensions())
            .unwrap_or((0, 0))
    }

    /// Number of frames received so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    /// Check if we have a valid frame
    pub fn has_frame(&self) -> bool {
        self.lock().is_some()
    }

    /// Get pixel at coordinates
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<Rgba<u8>> {
        let guard = self.lock();
        let frame = guard.as_ref()?;
        frame.get_pixel_checked(x, y).copied()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Frame>> {
        self.current_frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ScreenCapture {
    fn default() -> Self {
        Self::new()
    }
}

/// Byte length of an RGBA buffer, `None` when it does not fit in memory
fn rgba_len(width: u32, height: u32) -> Option<usize> {
    usize::try_from(width)
        .ok()?
        .checked_mul(usize::try_from(height).ok()?)?
        .checked_mul(4)
}

#[async_trait]
impl FrameProvider for ScreenCapture {
    async fn frame(&self) -> Result<Frame, VisionError> {
        self.current_frame().ok_or(VisionError::NoFrame)
    }
}

/// Copy a region out of a frame, clamped to the frame bounds
///
/// Returns `None` when the clamped region is empty.
pub fn crop(frame: &Frame, region: Rect) -> Option<Frame> {
    let clamped = region.clamp_to(frame.width(), frame.height());
    if clamped.is_empty() {
        return None;
    }

    let sub_image = image::imageops::crop_imm(
        frame,
        clamped.left as u32,
        clamped.top as u32,
        clamped.width() as u32,
        clamped.height() as u32,
    );
    Some(sub_image.to_image())
}
