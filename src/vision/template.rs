//! Multi-scale template matching
//!
//! The interpreter treats the matcher as a black-box scorer. `ImageprocMatcher`
//! is the bundled implementation: normalised cross-correlation on grayscale
//! images, with the template resized for every scale of the sweep.

use image::imageops::{self, FilterType};
use imageproc::template_matching::{find_extremes, match_template, MatchTemplateMethod};
use serde::{Deserialize, Serialize};

use super::{Frame, Rect, VisionError};

/// Best match found across a scale sweep
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MultiScaleMatch {
    /// Similarity score (1.0 = identical)
    pub score: f32,
    /// Top-left X of the match
    pub x: i32,
    /// Top-left Y of the match
    pub y: i32,
    /// Template scale that produced the match
    pub scale: f32,
}

impl MultiScaleMatch {
    /// Screen rectangle covered by a template of `width` x `height` at this match
    pub fn region(&self, width: u32, height: u32) -> Rect {
        Rect::new(
            self.x,
            self.y,
            self.x + (width as f32 * self.scale).round() as i32,
            self.y + (height as f32 * self.scale).round() as i32,
        )
    }
}

/// Inclusive scale sweep `[min, max]` in increments of `step`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleRange {
    pub min: f32,
    pub max: f32,
    pub step: f32,
}

impl ScaleRange {
    /// Sweep used by screen conditions
    pub const CONDITION: ScaleRange = ScaleRange::new(0.8, 1.2, 0.05);
    /// Sweep used by the pattern recognition engine
    pub const PATTERN: ScaleRange = ScaleRange::new(0.5, 1.5, 0.1);

    pub const fn new(min: f32, max: f32, step: f32) -> Self {
        Self { min, max, step }
    }

    /// All scales of the sweep, in increasing order
    pub fn scales(&self) -> Vec<f32> {
        if self.step <= 0.0 || self.max < self.min {
            return vec![self.min];
        }

        let steps = ((self.max - self.min) / self.step).round() as usize;
        (0..=steps)
            .map(|k| self.min + k as f32 * self.step)
            .filter(|scale| *scale <= self.max + 1e-3)
            .collect()
    }
}

impl Default for ScaleRange {
    fn default() -> Self {
        Self::CONDITION
    }
}

/// Locates a template inside a frame across a range of scales
pub trait TemplateMatcher: Send + Sync {
    /// Return the best match over every scale in `scales`
    fn match_multi_scale(
        &self,
        frame: &Frame,
        template: &Frame,
        scales: ScaleRange,
    ) -> Result<MultiScaleMatch, VisionError>;
}

/// Template matcher backed by `imageproc`
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageprocMatcher;

impl ImageprocMatcher {
    pub fn new() -> Self {
        Self
    }
}

impl TemplateMatcher for ImageprocMatcher {
    fn match_multi_scale(
        &self,
        frame: &Frame,
        template: &Frame,
        scales: ScaleRange,
    ) -> Result<MultiScaleMatch, VisionError> {
        let (template_width, template_height) = template.dimensions();
        if template_width == 0 || template_height == 0 {
            return Err(VisionError::TemplateMatchError("empty template".into()));
        }

        let frame_gray = imageops::grayscale(frame);
        let template_gray = imageops::grayscale(template);
        let (frame_width, frame_height) = frame_gray.dimensions();

        let mut best: Option<MultiScaleMatch> = None;

        for scale in scales.scales() {
            let width = ((template_width as f32 * scale).round() as u32).max(1);
            let height = ((template_height as f32 * scale).round() as u32).max(1);
            if width > frame_width || height > frame_height {
                continue;
            }

            let scaled = if (width, height) == (template_width, template_height) {
                template_gray.clone()
            } else {
                imageops::resize(&template_gray, width, height, FilterType::Triangle)
            };

            let scores = match_template(
                &frame_gray,
                &scaled,
                MatchTemplateMethod::CrossCorrelationNormalized,
            );
            let extremes = find_extremes(&scores);
            let score = extremes.max_value;
            if !score.is_finite() {
                continue;
            }

            if best.map_or(true, |current| score > current.score) {
                let (x, y) = extremes.max_value_location;
                best = Some(MultiScaleMatch {
                    score,
                    x: x as i32,
                    y: y as i32,
                    scale,
                });
            }
        }

        best.ok_or_else(|| {
            VisionError::TemplateMatchError(format!(
                "template {}x{} does not fit frame {}x{} at any scale",
                template_width, template_height, frame_width, frame_height
            ))
        })
    }
}
