//! Screen conditions
//!
//! Conditions are predicates over a frame. Detection failures are `false`,
//! never errors. `Time` and `Count` carry their own atomic state; everything
//! else is a pure function of the frame.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

use chrono::Utc;
use log::warn;
use regex::Regex;

use crate::pattern::PatternRecognitionEngine;
use crate::vision::color::argb_to_rgba;
use crate::vision::{
    is_rgb_color_present, Frame, ImageprocMatcher, NoOcr, OcrEngine, Rect, ScaleRange,
    TemplateMatcher,
};

/// Detector handles conditions evaluate against
#[derive(Clone)]
pub struct Detectors {
    pub matcher: Arc<dyn TemplateMatcher>,
    pub ocr: Arc<dyn OcrEngine>,
    /// Needed only by `Pattern` conditions
    pub patterns: Option<Arc<PatternRecognitionEngine>>,
    /// Scale sweep for `TemplatePresent`
    pub scales: ScaleRange,
}

impl Detectors {
    pub fn new(matcher: Arc<dyn TemplateMatcher>, ocr: Arc<dyn OcrEngine>) -> Self {
        Self {
            matcher,
            ocr,
            patterns: None,
            scales: ScaleRange::CONDITION,
        }
    }

    pub fn with_patterns(mut self, engine: Arc<PatternRecognitionEngine>) -> Self {
        self.patterns = Some(engine);
        self
    }

    pub fn with_scales(mut self, scales: ScaleRange) -> Self {
        self.scales = scales;
        self
    }
}

impl Default for Detectors {
    fn default() -> Self {
        Self::new(Arc::new(ImageprocMatcher::new()), Arc::new(NoOcr))
    }
}

impl fmt::Debug for Detectors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Detectors")
            .field("patterns", &self.patterns.is_some())
            .field("scales", &self.scales)
            .finish()
    }
}

/// Time-of-day window with an optional minimum interval between fires
///
/// Instants are Unix milliseconds. Firing updates the last-fire instant with
/// a compare-and-set, so a window can be shared between concurrent macros.
#[derive(Debug)]
pub struct TimeWindow {
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
    pub interval_ms: Option<i64>,
    last_fire: AtomicI64,
}

const NEVER_FIRED: i64 = i64::MIN;

impl TimeWindow {
    pub fn new(start_ms: Option<i64>, end_ms: Option<i64>, interval_ms: Option<i64>) -> Self {
        Self {
            start_ms,
            end_ms,
            interval_ms,
            last_fire: AtomicI64::new(NEVER_FIRED),
        }
    }

    /// Evaluate against the wall clock
    pub fn eval(&self) -> bool {
        self.eval_at(Utc::now().timestamp_millis())
    }

    /// Evaluate at a given instant
    pub fn eval_at(&self, now_ms: i64) -> bool {
        if self.start_ms.is_some_and(|start| now_ms < start) {
            return false;
        }
        if self.end_ms.is_some_and(|end| now_ms > end) {
            return false;
        }

        let Some(interval) = self.interval_ms else {
            return true;
        };

        let mut last = self.last_fire.load(Ordering::Acquire);
        loop {
            if last != NEVER_FIRED && now_ms.saturating_sub(last) < interval {
                return false;
            }
            match self
                .last_fire
                .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(current) => last = current,
            }
        }
    }

    /// Last successful fire, if any
    pub fn last_fire(&self) -> Option<i64> {
        match self.last_fire.load(Ordering::Acquire) {
            NEVER_FIRED => None,
            t => Some(t),
        }
    }
}

/// Evaluation counter that fires once it reaches its target
#[derive(Debug)]
pub struct Counter {
    pub target: u32,
    pub reset_on_success: bool,
    current: AtomicU32,
}

impl Counter {
    pub fn new(target: u32, reset_on_success: bool) -> Self {
        Self {
            target,
            reset_on_success,
            current: AtomicU32::new(0),
        }
    }

    /// Count one evaluation; true once the count reaches the target
    pub fn eval(&self) -> bool {
        let target = self.target;
        let count = match self.current.fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
            (c < target).then_some(c + 1)
        }) {
            Ok(previous) => previous + 1,
            Err(saturated) => saturated,
        };

        if count < target {
            return false;
        }

        if self.reset_on_success {
            let _ = self
                .current
                .compare_exchange(count, 0, Ordering::AcqRel, Ordering::Acquire);
        }
        true
    }

    pub fn current(&self) -> u32 {
        self.current.load(Ordering::Acquire)
    }
}

/// Predicate over a screen frame
#[derive(Debug)]
pub enum Condition {
    /// Best multi-scale template score reaches `threshold`
    TemplatePresent { template: Arc<Frame>, threshold: f32 },
    /// OCR text of the whole frame contains a match
    TextMatches { regex: Regex },
    /// Any pixel in `region` within `tolerance` of `color` (`0xAARRGGBB`)
    ColorPresent { region: Rect, color: u32, tolerance: u8 },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    Time(TimeWindow),
    Count(Counter),
    /// A registered pattern produced a match of at least `min_confidence`
    Pattern { pattern_id: String, min_confidence: f32 },
}

impl Condition {
    pub fn template(template: Arc<Frame>, threshold: f32) -> Self {
        Self::TemplatePresent {
            template,
            threshold,
        }
    }

    /// Text condition from a regex source
    pub fn text(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self::TextMatches {
            regex: Regex::new(pattern)?,
        })
    }

    pub fn color(region: Rect, color: u32, tolerance: u8) -> Self {
        Self::ColorPresent {
            region,
            color,
            tolerance,
        }
    }

    pub fn time(start_ms: Option<i64>, end_ms: Option<i64>, interval_ms: Option<i64>) -> Self {
        Self::Time(TimeWindow::new(start_ms, end_ms, interval_ms))
    }

    pub fn count(target: u32, reset_on_success: bool) -> Self {
        Self::Count(Counter::new(target, reset_on_success))
    }

    pub fn pattern(pattern_id: impl Into<String>, min_confidence: f32) -> Self {
        Self::Pattern {
            pattern_id: pattern_id.into(),
            min_confidence,
        }
    }

    /// Evaluate against a frame
    ///
    /// `And` stops at the first false operand and `Or` at the first true one.
    pub fn eval(&self, frame: &Frame, detectors: &Detectors) -> bool {
        match self {
            Self::TemplatePresent {
                template,
                threshold,
            } => match detectors
                .matcher
                .match_multi_scale(frame, template, detectors.scales)
            {
                Ok(found) => found.score >= *threshold,
                Err(e) => {
                    warn!("Template condition treated as absent: {}", e);
                    false
                }
            },
            Self::TextMatches { regex } => regex.is_match(&detectors.ocr.recognize(frame, None)),
            Self::ColorPresent {
                region,
                color,
                tolerance,
            } => is_rgb_color_present(frame, *region, argb_to_rgba(*color), *tolerance),
            Self::And(conditions) => conditions.iter().all(|c| c.eval(frame, detectors)),
            Self::Or(conditions) => conditions.iter().any(|c| c.eval(frame, detectors)),
            Self::Not(condition) => !condition.eval(frame, detectors),
            Self::Time(window) => window.eval(),
            Self::Count(counter) => counter.eval(),
            Self::Pattern {
                pattern_id,
                min_confidence,
            } => match &detectors.patterns {
                Some(engine) => engine
                    .detect_patterns(frame)
                    .iter()
                    .any(|m| m.pattern_id == *pattern_id && m.confidence >= *min_confidence),
                None => {
                    warn!("Pattern condition '{}' has no recognition engine", pattern_id);
                    false
                }
            },
        }
    }

    /// Human-readable rendering
    pub fn describe(&self) -> String {
        match self {
            Self::TemplatePresent { threshold, .. } => {
                format!("TemplateCondition(threshold={})", threshold)
            }
            Self::TextMatches { regex } => format!("TextCondition(regex={})", regex.as_str()),
            Self::ColorPresent {
                color, tolerance, ..
            } => format!("ColorCondition(color=#{:08X}, tolerance={})", color, tolerance),
            Self::And(conditions) => format!("AND({})", describe_all(conditions)),
            Self::Or(conditions) => format!("OR({})", describe_all(conditions)),
            Self::Not(condition) => format!("NOT({})", condition.describe()),
            Self::Time(window) => format!(
                "TimeCondition(start={}, end={}, interval={})",
                describe_opt(window.start_ms),
                describe_opt(window.end_ms),
                describe_opt(window.interval_ms)
            ),
            Self::Count(counter) => {
                format!("CountCondition(current={}/{})", counter.current(), counter.target)
            }
            Self::Pattern {
                pattern_id,
                min_confidence,
            } => format!(
                "PatternCondition(pattern={}, min_confidence={})",
                pattern_id, min_confidence
            ),
        }
    }
}

fn describe_all(conditions: &[Condition]) -> String {
    conditions
        .iter()
        .map(Condition::describe)
        .collect::<Vec<_>>()
        .join(", ")
}

fn describe_opt(value: Option<i64>) -> String {
    value.map_or_else(|| "none".to_string(), |v| v.to_string())
}

/// Stack-based condition builder
///
/// Leaf methods push a condition; `and`/`or` fold the top two entries and
/// `not` wraps the top entry. Folds with too few entries are ignored.
#[derive(Debug, Default)]
pub struct ConditionBuilder {
    stack: Vec<Condition>,
}

impl ConditionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn template(mut self, template: Arc<Frame>, threshold: f32) -> Self {
        self.stack.push(Condition::template(template, threshold));
        self
    }

    pub fn text(mut self, regex: Regex) -> Self {
        self.stack.push(Condition::TextMatches { regex });
        self
    }

    pub fn color(mut self, region: Rect, color: u32, tolerance: u8) -> Self {
        self.stack.push(Condition::color(region, color, tolerance));
        self
    }

    pub fn time(mut self, start_ms: Option<i64>, end_ms: Option<i64>, interval_ms: Option<i64>) -> Self {
        self.stack.push(Condition::time(start_ms, end_ms, interval_ms));
        self
    }

    pub fn count(mut self, target: u32, reset_on_success: bool) -> Self {
        self.stack.push(Condition::count(target, reset_on_success));
        self
    }

    pub fn pattern(mut self, pattern_id: impl Into<String>, min_confidence: f32) -> Self {
        self.stack.push(Condition::pattern(pattern_id, min_confidence));
        self
    }

    pub fn and(self) -> Self {
        self.fold(Condition::And)
    }

    pub fn or(self) -> Self {
        self.fold(Condition::Or)
    }

    pub fn not(mut self) -> Self {
        if let Some(top) = self.stack.pop() {
            self.stack.push(Condition::Not(Box::new(top)));
        }
        self
    }

    fn fold(mut self, combine: fn(Vec<Condition>) -> Condition) -> Self {
        if self.stack.len() >= 2 {
            let right = self.stack.split_off(self.stack.len() - 2);
            self.stack.push(combine(right));
        }
        self
    }

    /// The bottom entry of the stack
    pub fn build(mut self) -> Option<Condition> {
        if self.stack.is_empty() {
            None
        } else {
            Some(self.stack.swap_remove(0))
        }
    }
}
