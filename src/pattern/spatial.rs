//! Spatial pattern matching
//!
//! A spatial pattern is a set of elements (template, text or color
//! detectors) plus rules relating pairs of them (`B` is below `A`, ...).
//! Matching collects candidate rectangles for every element and searches the
//! cartesian product depth-first for an assignment satisfying every rule.
//!
//! The search is exponential in the number of elements. Patterns are expected
//! to stay small (a handful of elements, a few candidates each).

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::vision::color::argb_to_rgba;
use crate::vision::{is_rgb_color_present, Frame, OcrEngine, Rect, ScaleRange, TemplateMatcher};

/// Confidence reported for whole-frame text hits
const TEXT_HIT_CONFIDENCE: f32 = 0.9;

/// Handle to an element of a [`SpatialPattern`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ElementId(usize);

impl ElementId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Atomic detectable thing
#[derive(Debug, Clone)]
pub enum Element {
    Template { template: Arc<Frame>, threshold: f32 },
    Text { regex: Regex },
    /// Color `0xAARRGGBB` present somewhere in a fixed region
    Color { region: Rect, color: u32, tolerance: u8 },
}

/// Directional relation between two matched rectangles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpatialRelation {
    Below,
    Above,
    RightOf,
    LeftOf,
}

impl SpatialRelation {
    /// Whether `relative` stands in this relation to `anchor`
    pub fn holds(self, anchor: &Rect, relative: &Rect) -> bool {
        match self {
            Self::Below => relative.top >= anchor.bottom,
            Self::Above => relative.bottom <= anchor.top,
            Self::RightOf => relative.left >= anchor.right,
            Self::LeftOf => relative.right <= anchor.left,
        }
    }

    /// Relation an editor would infer for a box drawn from `anchor` to `relative`
    pub fn infer(anchor: &Rect, relative: &Rect) -> Self {
        [Self::Below, Self::Above, Self::RightOf]
            .into_iter()
            .find(|relation| relation.holds(anchor, relative))
            .unwrap_or(Self::LeftOf)
    }
}

/// Constraint between two elements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternRule {
    pub anchor: ElementId,
    pub relative: ElementId,
    pub relation: SpatialRelation,
}

/// Elements and the rules relating them
#[derive(Debug, Clone, Default)]
pub struct SpatialPattern {
    elements: Vec<Element>,
    rules: Vec<PatternRule>,
}

impl SpatialPattern {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_element(&mut self, element: Element) -> ElementId {
        self.elements.push(element);
        ElementId(self.elements.len() - 1)
    }

    /// Require `relative` to stand in `relation` to `anchor`
    pub fn add_rule(
        &mut self,
        anchor: ElementId,
        relative: ElementId,
        relation: SpatialRelation,
    ) -> &mut Self {
        self.rules.push(PatternRule {
            anchor,
            relative,
            relation,
        });
        self
    }

    pub fn element(&self, id: ElementId) -> Option<&Element> {
        self.elements.get(id.0)
    }

    pub fn rules(&self) -> &[PatternRule] {
        &self.rules
    }

    /// Elements referenced by at least one rule, in id order
    pub fn referenced(&self) -> Vec<ElementId> {
        let mut ids: Vec<ElementId> = self
            .rules
            .iter()
            .flat_map(|rule| [rule.anchor, rule.relative])
            .filter(|id| id.0 < self.elements.len())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// Which satisfying assignment the search returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPolicy {
    /// Stop at the first satisfying assignment in candidate order
    #[default]
    FirstMatch,
    /// Explore every assignment, keep the highest average confidence
    BestScore,
}

/// A detector hit for one element
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub rect: Rect,
    pub confidence: f32,
}

/// A satisfying assignment
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialMatch {
    /// Rectangle chosen for each referenced element
    pub regions: BTreeMap<ElementId, Rect>,
    /// Mean confidence of the chosen candidates
    pub score: f32,
}

impl SpatialMatch {
    pub fn region(&self, id: ElementId) -> Option<Rect> {
        self.regions.get(&id).copied()
    }
}

/// Finds element assignments satisfying a spatial pattern
pub struct SpatialMatcher {
    matcher: Arc<dyn TemplateMatcher>,
    ocr: Arc<dyn OcrEngine>,
    /// Scale bands searched per template, one candidate per band at most
    bands: Vec<ScaleRange>,
    policy: SearchPolicy,
}

impl SpatialMatcher {
    pub fn new(matcher: Arc<dyn TemplateMatcher>, ocr: Arc<dyn OcrEngine>) -> Self {
        Self {
            matcher,
            ocr,
            bands: vec![
                ScaleRange::new(0.5, 0.8, 0.1),
                ScaleRange::new(0.8, 1.2, 0.05),
                ScaleRange::new(1.2, 1.5, 0.1),
            ],
            policy: SearchPolicy::FirstMatch,
        }
    }

    pub fn with_policy(mut self, policy: SearchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_bands(mut self, bands: Vec<ScaleRange>) -> Self {
        self.bands = bands;
        self
    }

    /// Match `pattern` against `frame`
    ///
    /// Returns `None` when the pattern has no rules, when any referenced
    /// element has no candidate, or when no assignment satisfies every rule.
    pub fn detect(&self, frame: &Frame, pattern: &SpatialPattern) -> Option<SpatialMatch> {
        let ids = pattern.referenced();
        if ids.is_empty() {
            return None;
        }

        let mut ocr_text: Option<String> = None;
        let mut candidates = Vec::with_capacity(ids.len());
        for id in &ids {
            let element = pattern.element(*id)?;
            let hits = self.candidates(frame, element, &mut ocr_text);
            if hits.is_empty() {
                debug!("Spatial element {} has no candidates", id.0);
                return None;
            }
            candidates.push(hits);
        }

        let search = Search {
            ids: &ids,
            candidates: &candidates,
            rules: pattern.rules(),
            policy: self.policy,
        };
        let mut chosen = Vec::with_capacity(ids.len());
        let mut best = None;
        search.run(0, &mut chosen, &mut best);
        best
    }

    /// Candidate hits for one element
    pub fn candidates(
        &self,
        frame: &Frame,
        element: &Element,
        ocr_text: &mut Option<String>,
    ) -> Vec<Candidate> {
        match element {
            Element::Template {
                template,
                threshold,
            } => {
                let mut hits: Vec<Candidate> = Vec::new();
                for band in &self.bands {
                    let found = match self.matcher.match_multi_scale(frame, template, *band) {
                        Ok(found) => found,
                        Err(e) => {
                            warn!("Template element skipped at scales {:?}: {}", band, e);
                            continue;
                        }
                    };
                    if found.score < *threshold {
                        continue;
                    }
                    let rect = found.region(template.width(), template.height());
                    if hits.iter().all(|hit| hit.rect != rect) {
                        hits.push(Candidate {
                            rect,
                            confidence: found.score,
                        });
                    }
                }
                hits
            }
            Element::Text { regex } => {
                let text = ocr_text.get_or_insert_with(|| self.ocr.recognize(frame, None));
                if regex.is_match(text) {
                    vec![Candidate {
                        rect: Rect::of_frame(frame),
                        confidence: TEXT_HIT_CONFIDENCE,
                    }]
                } else {
                    Vec::new()
                }
            }
            Element::Color {
                region,
                color,
                tolerance,
            } => {
                if is_rgb_color_present(frame, *region, argb_to_rgba(*color), *tolerance) {
                    vec![Candidate {
                        rect: *region,
                        confidence: 1.0,
                    }]
                } else {
                    Vec::new()
                }
            }
        }
    }
}

/// Backtracking search state shared across recursion levels
struct Search<'a> {
    ids: &'a [ElementId],
    candidates: &'a [Vec<Candidate>],
    rules: &'a [PatternRule],
    policy: SearchPolicy,
}

impl Search<'_> {
    /// Returns true when the search should stop
    fn run(&self, depth: usize, chosen: &mut Vec<Candidate>, best: &mut Option<SpatialMatch>) -> bool {
        if depth == self.ids.len() {
            return self.visit_leaf(chosen, best);
        }

        for candidate in &self.candidates[depth] {
            chosen.push(*candidate);
            let stop = self.run(depth + 1, chosen, best);
            chosen.pop();
            if stop {
                return true;
            }
        }
        false
    }

    fn visit_leaf(&self, chosen: &[Candidate], best: &mut Option<SpatialMatch>) -> bool {
        let rect_of = |id: ElementId| {
            self.ids
                .binary_search(&id)
                .ok()
                .map(|slot| chosen[slot].rect)
        };

        let satisfied = self.rules.iter().all(|rule| {
            match (rect_of(rule.anchor), rect_of(rule.relative)) {
                (Some(anchor), Some(relative)) => rule.relation.holds(&anchor, &relative),
                _ => false,
            }
        });
        if !satisfied {
            return false;
        }

        let score = chosen.iter().map(|c| c.confidence).sum::<f32>() / chosen.len() as f32;
        if best.as_ref().map_or(true, |b| score > b.score) {
            *best = Some(SpatialMatch {
                regions: self
                    .ids
                    .iter()
                    .zip(chosen)
                    .map(|(id, candidate)| (*id, candidate.rect))
                    .collect(),
                score,
            });
        }

        self.policy == SearchPolicy::FirstMatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::{MultiScaleMatch, NoOcr, VisionError};
    use image::{ImageBuffer, Rgba};
    use std::collections::HashMap;

    /// Matcher that answers by the template's first red value
    struct KeyedMatcher {
        hits: HashMap<u8, Vec<(i32, i32, f32)>>,
    }

    impl TemplateMatcher for KeyedMatcher {
        fn match_multi_scale(
            &self,
            _frame: &Frame,
            template: &Frame,
            scales: ScaleRange,
        ) -> Result<MultiScaleMatch, VisionError> {
            let key = template.get_pixel(0, 0)[0];
            let hits = self.hits.get(&key).cloned().unwrap_or_default();
            // One hit per band, in band order
            let band = if scales.min < 0.8 {
                0
            } else if scales.min < 1.2 {
                1
            } else {
                2
            };
            match hits.get(band).or(hits.last()) {
                Some(&(x, y, score)) => Ok(MultiScaleMatch {
                    score,
                    x,
                    y,
                    scale: 1.0,
                }),
                None => Ok(MultiScaleMatch {
                    score: 0.0,
                    x: 0,
                    y: 0,
                    scale: 1.0,
                }),
            }
        }
    }

    fn keyed_template(key: u8) -> Arc<Frame> {
        Arc::new(ImageBuffer::from_pixel(10, 10, Rgba([key, 0, 0, 255])))
    }

    fn matcher(hits: Vec<(u8, Vec<(i32, i32, f32)>)>) -> SpatialMatcher {
        SpatialMatcher::new(
            Arc::new(KeyedMatcher {
                hits: hits.into_iter().collect(),
            }),
            Arc::new(NoOcr),
        )
    }

    fn two_templates() -> (SpatialPattern, ElementId, ElementId) {
        let mut pattern = SpatialPattern::new();
        let a = pattern.add_element(Element::Template {
            template: keyed_template(1),
            threshold: 0.8,
        });
        let b = pattern.add_element(Element::Template {
            template: keyed_template(2),
            threshold: 0.8,
        });
        pattern.add_rule(a, b, SpatialRelation::Below);
        (pattern, a, b)
    }

    fn frame() -> Frame {
        Frame::new(100, 100)
    }

    #[test]
    fn test_relation_tests() {
        let anchor = Rect::new(0, 0, 10, 10);
        assert!(SpatialRelation::Below.holds(&anchor, &Rect::new(0, 10, 10, 20)));
        assert!(!SpatialRelation::Below.holds(&anchor, &Rect::new(0, 9, 10, 20)));
        assert!(SpatialRelation::Above.holds(&anchor, &Rect::new(0, -10, 10, 0)));
        assert!(SpatialRelation::RightOf.holds(&anchor, &Rect::new(10, 0, 20, 10)));
        assert!(SpatialRelation::LeftOf.holds(&anchor, &Rect::new(-10, 0, 0, 10)));
    }

    #[test]
    fn test_infer_relation() {
        let anchor = Rect::new(50, 50, 60, 60);
        assert_eq!(SpatialRelation::infer(&anchor, &Rect::new(50, 70, 60, 80)), SpatialRelation::Below);
        assert_eq!(SpatialRelation::infer(&anchor, &Rect::new(50, 0, 60, 40)), SpatialRelation::Above);
        assert_eq!(SpatialRelation::infer(&anchor, &Rect::new(70, 50, 80, 60)), SpatialRelation::RightOf);
        assert_eq!(SpatialRelation::infer(&anchor, &Rect::new(0, 50, 10, 60)), SpatialRelation::LeftOf);
    }

    #[test]
    fn test_below_rule_matches() {
        let (pattern, a, b) = two_templates();
        let spatial = matcher(vec![(1, vec![(0, 0, 0.9)]), (2, vec![(0, 20, 0.95)])]);

        let found = spatial.detect(&frame(), &pattern).unwrap();
        assert_eq!(found.region(a), Some(Rect::new(0, 0, 10, 10)));
        assert_eq!(found.region(b), Some(Rect::new(0, 20, 10, 30)));
        assert!((found.score - 0.925).abs() < 1e-6);
    }

    #[test]
    fn test_below_rule_rejects_above() {
        let (pattern, _, _) = two_templates();
        let spatial = matcher(vec![(1, vec![(0, 0, 0.9)]), (2, vec![(0, -20, 0.95)])]);
        assert!(spatial.detect(&frame(), &pattern).is_none());
    }

    #[test]
    fn test_missing_candidates_fail_fast() {
        let (pattern, _, _) = two_templates();
        let spatial = matcher(vec![(1, vec![(0, 0, 0.9)]), (2, vec![(0, 20, 0.5)])]);
        assert!(spatial.detect(&frame(), &pattern).is_none());

        assert!(spatial.detect(&frame(), &SpatialPattern::new()).is_none());
    }

    #[test]
    fn test_backtracks_over_candidates() {
        let (pattern, _, b) = two_templates();
        // B's first candidate is above A, the second one below
        let spatial = matcher(vec![
            (1, vec![(0, 30, 0.9)]),
            (2, vec![(0, 0, 0.99), (0, 50, 0.85)]),
        ]);

        let found = spatial.detect(&frame(), &pattern).unwrap();
        assert_eq!(found.region(b), Some(Rect::new(0, 50, 10, 60)));
    }

    #[test]
    fn test_first_match_versus_best_score() {
        let (pattern, _, b) = two_templates();
        let hits = vec![
            (1, vec![(0, 0, 0.9)]),
            (2, vec![(0, 20, 0.81), (0, 40, 0.99)]),
        ];

        let first = matcher(hits.clone()).detect(&frame(), &pattern).unwrap();
        assert_eq!(first.region(b), Some(Rect::new(0, 20, 10, 30)));

        let best = matcher(hits)
            .with_policy(SearchPolicy::BestScore)
            .detect(&frame(), &pattern)
            .unwrap();
        assert_eq!(best.region(b), Some(Rect::new(0, 40, 10, 50)));
        assert!(best.score > first.score);
    }

    #[test]
    fn test_color_and_text_elements() {
        let frame: Frame = ImageBuffer::from_fn(40, 40, |_, y| {
            if y >= 30 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 0, 255])
            }
        });

        let mut pattern = SpatialPattern::new();
        let header = pattern.add_element(Element::Color {
            region: Rect::new(0, 0, 40, 10),
            color: 0xFF00_0000,
            tolerance: 5,
        });
        let footer = pattern.add_element(Element::Color {
            region: Rect::new(0, 30, 40, 40),
            color: 0xFFFF_0000,
            tolerance: 5,
        });
        pattern.add_rule(header, footer, SpatialRelation::Below);

        let spatial = matcher(Vec::new());
        let found = spatial.detect(&frame, &pattern).unwrap();
        assert_eq!(found.score, 1.0);

        // NoOcr reads nothing, so a text element never has candidates
        let text = pattern.add_element(Element::Text {
            regex: Regex::new("Start").unwrap(),
        });
        pattern.add_rule(header, text, SpatialRelation::Below);
        assert!(spatial.detect(&frame, &pattern).is_none());
    }
}
