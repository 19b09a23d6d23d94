//! Pattern recognition
//!
//! Two detectors live here:
//! - [`PatternRecognitionEngine`] evaluates registered pattern definitions
//!   (template, color, text, motion) against a frame and ranks the matches
//! - [`SpatialMatcher`] finds screen regions for a set of elements that
//!   satisfy pairwise spatial relations

pub mod engine;
pub mod spatial;

use std::collections::BTreeMap;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::vision::{Frame, Hsv, Rect};

pub use engine::{PatternRecognitionEngine, RecognitionConfig};
pub use spatial::{
    Element, ElementId, PatternRule, SearchPolicy, SpatialMatch, SpatialMatcher, SpatialPattern,
    SpatialRelation,
};

/// Kind of pattern a definition describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    TemplateMatch,
    ColorPattern,
    TextPattern,
    /// Not detected yet; always yields no matches
    LayoutPattern,
    AnimationPattern,
    /// Not detected yet; always yields no matches
    GesturePattern,
}

/// One detection produced by the recognition engine
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternMatch {
    /// Definition that produced the match
    pub pattern_id: String,
    /// Confidence in `[0, 1]`
    pub confidence: f32,
    /// Matched screen region
    pub region: Rect,
    pub pattern_type: PatternType,
    /// Detector-specific details
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// HSV range searched by a color pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorRange {
    pub hsv_min: Hsv,
    pub hsv_max: Hsv,
    /// Region to search, whole frame when absent
    #[serde(default)]
    pub region: Option<Rect>,
    /// Minimum matching pixels for a detection
    #[serde(default = "default_min_pixels")]
    pub min_pixels: u64,
}

fn default_min_pixels() -> u64 {
    1
}

impl ColorRange {
    pub fn new(hsv_min: Hsv, hsv_max: Hsv) -> Self {
        Self {
            hsv_min,
            hsv_max,
            region: None,
            min_pixels: 1,
        }
    }

    pub fn in_region(mut self, region: Rect) -> Self {
        self.region = Some(region);
        self
    }

    pub fn min_pixels(mut self, count: u64) -> Self {
        self.min_pixels = count;
        self
    }
}

/// A pattern registered with the recognition engine
#[derive(Debug, Clone)]
pub struct PatternDefinition {
    pub id: String,
    pub name: String,
    pub pattern_type: PatternType,
    /// Reference image for template patterns
    pub template: Option<Arc<Frame>>,
    /// Ranges for color patterns
    pub color_ranges: Vec<ColorRange>,
    /// Expressions for text patterns
    pub text_patterns: Vec<Regex>,
    /// Minimum template score
    pub threshold: f32,
    /// Higher priorities are evaluated first
    pub priority: i32,
}

impl PatternDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, pattern_type: PatternType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            pattern_type,
            template: None,
            color_ranges: Vec::new(),
            text_patterns: Vec::new(),
            threshold: 0.8,
            priority: 0,
        }
    }

    pub fn template(id: impl Into<String>, template: Arc<Frame>, threshold: f32) -> Self {
        let id = id.into();
        Self {
            template: Some(template),
            threshold,
            ..Self::new(id.clone(), id, PatternType::TemplateMatch)
        }
    }

    pub fn color(id: impl Into<String>, ranges: Vec<ColorRange>) -> Self {
        let id = id.into();
        Self {
            color_ranges: ranges,
            ..Self::new(id.clone(), id, PatternType::ColorPattern)
        }
    }

    pub fn text(id: impl Into<String>, patterns: Vec<Regex>) -> Self {
        let id = id.into();
        Self {
            text_patterns: patterns,
            ..Self::new(id.clone(), id, PatternType::TextPattern)
        }
    }

    pub fn animation(id: impl Into<String>) -> Self {
        let id = id.into();
        Self::new(id.clone(), id, PatternType::AnimationPattern)
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}
