//! Pattern recognition engine
//!
//! Keeps a registry of pattern definitions and a short history of grayscale
//! frames (for motion), and turns each frame into a ranked match list.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard};

use image::GrayImage;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{PatternDefinition, PatternMatch, PatternType};
use crate::vision::{
    count_hsv_in_range, motion_score, Frame, OcrEngine, Rect, ScaleRange, TemplateMatcher,
};

/// Tunables of the recognition engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Scale sweep for template patterns
    pub scales: ScaleRange,
    /// Motion score a frame pair must exceed
    pub motion_threshold: f32,
    /// Grayscale frames kept for motion detection
    pub history_size: usize,
    /// Confidence reported for text matches
    pub text_confidence: f32,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            scales: ScaleRange::PATTERN,
            motion_threshold: 0.1,
            history_size: 10,
            text_confidence: 0.9,
        }
    }
}

/// Registry-driven pattern detector
pub struct PatternRecognitionEngine {
    patterns: RwLock<HashMap<String, PatternDefinition>>,
    history: Mutex<VecDeque<GrayImage>>,
    matcher: Arc<dyn TemplateMatcher>,
    ocr: Arc<dyn OcrEngine>,
    config: RecognitionConfig,
}

impl PatternRecognitionEngine {
    pub fn new(matcher: Arc<dyn TemplateMatcher>, ocr: Arc<dyn OcrEngine>) -> Self {
        Self::with_config(matcher, ocr, RecognitionConfig::default())
    }

    pub fn with_config(
        matcher: Arc<dyn TemplateMatcher>,
        ocr: Arc<dyn OcrEngine>,
        config: RecognitionConfig,
    ) -> Self {
        Self {
            patterns: RwLock::new(HashMap::new()),
            history: Mutex::new(VecDeque::with_capacity(config.history_size)),
            matcher,
            ocr,
            config,
        }
    }

    /// Register a definition, replacing any with the same id
    pub fn register(&self, definition: PatternDefinition) {
        debug!("Registering pattern '{}' ({:?})", definition.id, definition.pattern_type);
        self.patterns
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(definition.id.clone(), definition);
    }

    /// Remove a definition, returning it if present
    pub fn unregister(&self, id: &str) -> Option<PatternDefinition> {
        self.patterns
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    /// Snapshot of the registered definitions
    pub fn registered(&self) -> Vec<PatternDefinition> {
        self.read().values().cloned().collect()
    }

    /// Forget the frame history
    pub fn clear_cache(&self) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, PatternDefinition>> {
        self.patterns.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Detect every registered pattern in `frame`
    ///
    /// Definitions run in descending priority; the result is sorted by
    /// descending confidence. The frame is appended to the motion history.
    pub fn detect_patterns(&self, frame: &Frame) -> Vec<PatternMatch> {
        let motion = self.push_history(frame);

        let patterns = self.read();
        let mut definitions: Vec<&PatternDefinition> = patterns.values().collect();
        definitions.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut ocr_text: Option<String> = None;
        let mut matches = Vec::new();

        for definition in definitions {
            match definition.pattern_type {
                PatternType::TemplateMatch => {
                    matches.extend(self.detect_template(frame, definition));
                }
                PatternType::ColorPattern => {
                    matches.extend(detect_color(frame, definition));
                }
                PatternType::TextPattern => {
                    let text = ocr_text.get_or_insert_with(|| self.ocr.recognize(frame, None));
                    matches.extend(self.detect_text(frame, definition, text));
                }
                PatternType::AnimationPattern => {
                    if let Some(score) = motion.filter(|s| *s > self.config.motion_threshold) {
                        matches.push(PatternMatch {
                            pattern_id: definition.id.clone(),
                            confidence: score.clamp(0.0, 1.0),
                            region: Rect::of_frame(frame),
                            pattern_type: PatternType::AnimationPattern,
                            metadata: BTreeMap::from([("motion_score".to_string(), json!(score))]),
                        });
                    }
                }
                PatternType::LayoutPattern | PatternType::GesturePattern => {}
            }
        }

        matches.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        matches
    }

    /// Record a frame and return the motion score against the previous one
    fn push_history(&self, frame: &Frame) -> Option<f32> {
        let gray = image::imageops::grayscale(frame);
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);

        history.push_back(gray);
        while history.len() > self.config.history_size.max(2) {
            history.pop_front();
        }

        let n = history.len();
        (n >= 2).then(|| motion_score(&history[n - 2], &history[n - 1]))
    }

    fn detect_template(&self, frame: &Frame, definition: &PatternDefinition) -> Option<PatternMatch> {
        let template = definition.template.as_ref()?;

        let found = match self
            .matcher
            .match_multi_scale(frame, template, self.config.scales)
        {
            Ok(found) => found,
            Err(e) => {
                warn!("Template pattern '{}' skipped: {}", definition.id, e);
                return None;
            }
        };

        (found.score >= definition.threshold).then(|| PatternMatch {
            pattern_id: definition.id.clone(),
            confidence: found.score,
            region: found.region(template.width(), template.height()),
            pattern_type: PatternType::TemplateMatch,
            metadata: BTreeMap::from([("scale".to_string(), json!(found.scale))]),
        })
    }

    fn detect_text(
        &self,
        frame: &Frame,
        definition: &PatternDefinition,
        text: &str,
    ) -> Vec<PatternMatch> {
        definition
            .text_patterns
            .iter()
            .filter_map(|regex| regex.find(text))
            .map(|found| PatternMatch {
                pattern_id: definition.id.clone(),
                confidence: self.config.text_confidence,
                region: Rect::of_frame(frame),
                pattern_type: PatternType::TextPattern,
                metadata: BTreeMap::from([
                    ("matched_text".to_string(), json!(found.as_str())),
                    ("full_text".to_string(), json!(text)),
                ]),
            })
            .collect()
    }
}

fn detect_color(frame: &Frame, definition: &PatternDefinition) -> Vec<PatternMatch> {
    definition
        .color_ranges
        .iter()
        .filter_map(|range| {
            let region = range
                .region
                .unwrap_or_else(|| Rect::of_frame(frame))
                .clamp_to(frame.width(), frame.height());
            let total = region.area();
            if total == 0 {
                return None;
            }

            let matching = count_hsv_in_range(frame, region, &range.hsv_min, &range.hsv_max);
            if matching == 0 || matching < range.min_pixels {
                return None;
            }

            Some(PatternMatch {
                pattern_id: definition.id.clone(),
                confidence: (matching as f64 / total as f64).clamp(0.0, 1.0) as f32,
                region,
                pattern_type: PatternType::ColorPattern,
                metadata: BTreeMap::from([
                    ("matching_pixels".to_string(), json!(matching)),
                    ("total_pixels".to_string(), json!(total)),
                ]),
            })
        })
        .collect()
}
