//! OCR collaborator interface
//!
//! Text extraction is delegated to a platform engine (Tesseract on device).
//! The engine never fails loudly: an empty string means nothing was read.

use super::{Frame, Rect};

/// Text recognizer for screen frames
pub trait OcrEngine: Send + Sync {
    /// Recognize UTF-8 text in `frame`, optionally restricted to `region`
    fn recognize(&self, frame: &Frame, region: Option<Rect>) -> String;
}

/// OCR engine used when no recognizer is installed
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOcr;

impl OcrEngine for NoOcr {
    fn recognize(&self, _frame: &Frame, _region: Option<Rect>) -> String {
        String::new()
    }
}
