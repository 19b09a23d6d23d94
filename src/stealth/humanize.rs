//! Randomization engine
//!
//! Turns exact delays, points and paths into humanized ones according to a
//! [`RandomizationConfig`]. The engine owns its RNG so tests can seed it.

use std::f64::consts::PI;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{AdaptiveDelayTracker, HumanizationLevel, HumanizationPattern, RandomizationConfig};
use crate::clicker::{ClickTarget, ScreenEdge};
use crate::vision::Point;

/// A click after humanization
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HumanizedClick {
    /// Perturbed position
    pub point: Point,
    /// Delay to wait before touching down
    pub pre_click_delay_ms: u64,
    /// Pressure multiplier (1.0 when pressure variation is off)
    pub pressure: f32,
}

/// A multi-touch target after randomization
#[derive(Debug, Clone, PartialEq)]
pub struct RandomizedClickTarget {
    /// The target as configured
    pub target: ClickTarget,
    /// Position to tap
    pub point: Point,
    /// Stagger delay for this target
    pub delay_ms: u64,
    /// Pressure multiplier
    pub pressure: f32,
    /// Humanized pre-click delay
    pub pre_click_delay_ms: u64,
}

impl RandomizedClickTarget {
    /// Wrap a target without any randomization
    pub fn exact(target: ClickTarget) -> Self {
        Self {
            point: target.point,
            pressure: target.pressure,
            delay_ms: 0,
            pre_click_delay_ms: 0,
            target,
        }
    }
}

/// Source of humanized timing, positions and paths
pub struct RandomizationEngine {
    rng: Mutex<StdRng>,
    adaptive: Mutex<AdaptiveDelayTracker>,
}

impl Default for RandomizationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomizationEngine {
    /// Create an engine seeded from OS entropy
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Create a deterministic engine
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
            adaptive: Mutex::new(AdaptiveDelayTracker::new()),
        }
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Randomize a delay
    ///
    /// Returns `base_ms` unchanged when timing randomization is off or no
    /// variance is configured. Otherwise the result is at least 1 ms.
    pub fn randomize_delay(&self, base_ms: u64, config: &RandomizationConfig) -> u64 {
        if !config.enable_timing_randomization {
            return base_ms;
        }

        let variance = if config.timing_variance_ms > 0 {
            config.timing_variance_ms
        } else if config.timing_variance_percent > 0.0 {
            (base_ms as f64 * config.timing_variance_percent as f64 / 100.0) as u64
        } else {
            0
        };
        if variance == 0 {
            return base_ms;
        }

        let variance = variance as i64;
        let offset = self.rng().gen_range(-variance..=variance);
        let mut delay = base_ms as i64 + offset;

        if config.enable_adaptive_delays {
            delay = self
                .adaptive
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .adjust(delay, config.humanization_level);
        }

        delay.max(1) as u64
    }

    /// Offset a point by a random vector of length at most the variance radius
    pub fn randomize_position(&self, point: Point, config: &RandomizationConfig) -> Point {
        if !config.enable_position_randomization || config.position_variance_radius <= 0.0 {
            return point;
        }

        let mut rng = self.rng();
        let angle = rng.gen::<f64>() * 2.0 * PI;
        let radius = rng.gen::<f64>() * config.position_variance_radius as f64;

        Point::new(
            point.x + (radius * angle.cos()).round() as i32,
            point.y + (radius * angle.sin()).round() as i32,
        )
    }

    /// Humanize a single click using the pattern for the configured level
    pub fn humanize_click(&self, point: Point, config: &RandomizationConfig) -> HumanizedClick {
        let pattern = config.humanization_level.pattern();

        let point = if config.enable_position_randomization {
            self.micro_movement(point, &pattern)
        } else {
            point
        };

        let mut rng = self.rng();
        let (min_delay, max_delay) = pattern.pre_click_delay_ms;
        let pre_click_delay_ms = rng.gen_range(min_delay..=max_delay);

        let pressure = if config.pressure_variation {
            let (low, high) = pattern.pressure_range;
            low + rng.gen::<f32>() * (high - low)
        } else {
            1.0
        };

        HumanizedClick {
            point,
            pre_click_delay_ms,
            pressure,
        }
    }

    fn micro_movement(&self, point: Point, pattern: &HumanizationPattern) -> Point {
        let range = pattern.micro_movement_range;
        let mut rng = self.rng();
        let dx = (rng.gen::<f32>() - 0.5) * 2.0 * range;
        let dy = (rng.gen::<f32>() - 0.5) * 2.0 * range;

        Point::new(point.x + dx as i32, point.y + dy as i32)
    }

    /// Sample a Bezier path from `start` to `end`
    ///
    /// With natural curves disabled the path is just `[start, end]`. Otherwise
    /// `clamp(distance / 10, 2, 20) + 1` points are returned, the first and last
    /// being exactly `start` and `end`.
    pub fn generate_natural_curve(
        &self,
        start: Point,
        end: Point,
        config: &RandomizationConfig,
    ) -> Vec<Point> {
        if !config.natural_curve_enabled {
            return vec![start, end];
        }

        let distance = start.distance(end);
        let steps = ((distance / 10.0) as usize).clamp(2, 20);

        let mut points = Vec::with_capacity(config.humanization_level.pattern().curve_complexity.max(1) + 2);
        points.push((start.x as f64, start.y as f64));
        points.extend(self.control_points(start, end, distance, config.humanization_level));
        points.push((end.x as f64, end.y as f64));

        (0..=steps)
            .map(|i| {
                let (x, y) = de_casteljau(&points, i as f64 / steps as f64);
                Point::new(x.round() as i32, y.round() as i32)
            })
            .collect()
    }

    fn control_points(
        &self,
        start: Point,
        end: Point,
        distance: f64,
        level: HumanizationLevel,
    ) -> Vec<(f64, f64)> {
        // A curve always bends, even without a humanization level
        let count = level.pattern().curve_complexity.max(1);
        let variance = distance * 0.1;
        let mut rng = self.rng();

        (1..=count)
            .map(|i| {
                let t = i as f64 / (count + 1) as f64;
                let base_x = start.x as f64 + (end.x - start.x) as f64 * t;
                let base_y = start.y as f64 + (end.y - start.y) as f64 * t;
                let dx = (rng.gen::<f64>() - 0.5) * 2.0 * variance;
                let dy = (rng.gen::<f64>() - 0.5) * 2.0 * variance;
                (base_x + dx, base_y + dy)
            })
            .collect()
    }

    /// Intervals for a burst of `count` clicks, each at least 1 ms
    pub fn generate_burst_intervals(
        &self,
        base_ms: u64,
        count: usize,
        config: &RandomizationConfig,
    ) -> Vec<u64> {
        let variance = (base_ms as f64 * config.humanization_level.burst_variance()) as i64;
        let mut rng = self.rng();

        (0..count)
            .map(|_| {
                let offset = if variance > 0 {
                    rng.gen_range(-variance..=variance)
                } else {
                    0
                };
                (base_ms as i64 + offset).max(1) as u64
            })
            .collect()
    }

    /// Point near a screen edge, then position-randomized
    pub fn randomize_edge_click(
        &self,
        edge: ScreenEdge,
        offset: f32,
        screen_width: u32,
        screen_height: u32,
        config: &RandomizationConfig,
    ) -> Point {
        let base = edge.anchor(offset, screen_width, screen_height);
        self.randomize_position(base, config)
    }

    /// Randomize each target of a multi-touch gesture
    ///
    /// Target `i` is staggered by `randomize_delay(50 * i)`.
    pub fn randomize_multi_touch(
        &self,
        targets: &[ClickTarget],
        config: &RandomizationConfig,
    ) -> Vec<RandomizedClickTarget> {
        targets
            .iter()
            .enumerate()
            .map(|(index, target)| {
                let point = self.randomize_position(target.point, config);
                let delay_ms = self.randomize_delay(50 * index as u64, config);
                let click = self.humanize_click(point, config);

                RandomizedClickTarget {
                    target: target.clone(),
                    point: click.point,
                    delay_ms,
                    pressure: click.pressure,
                    pre_click_delay_ms: click.pre_click_delay_ms,
                }
            })
            .collect()
    }

    /// Uniform per-axis jitter in `[-jitter_px, jitter_px]`, saturating at the `i32` bounds
    pub fn jitter_point(&self, point: Point, jitter_px: u32) -> Point {
        if jitter_px == 0 {
            return point;
        }

        let j = i32::try_from(jitter_px).unwrap_or(i32::MAX);
        let mut rng = self.rng();
        Point::new(
            point.x.saturating_add(rng.gen_range(-j..=j)),
            point.y.saturating_add(rng.gen_range(-j..=j)),
        )
    }

    /// `base_ms` plus a uniform offset in `[-variance_ms, variance_ms]`, never negative
    pub fn jitter_delay(&self, base_ms: u64, variance_ms: u64) -> u64 {
        if variance_ms == 0 {
            return base_ms;
        }

        let variance = i64::try_from(variance_ms).unwrap_or(i64::MAX);
        let offset = self.rng().gen_range(-variance..=variance);
        if offset >= 0 {
            base_ms.saturating_add(offset.unsigned_abs())
        } else {
            base_ms.saturating_sub(offset.unsigned_abs())
        }
    }
}

/// Evaluate a Bezier curve by repeated linear interpolation
fn de_casteljau(points: &[(f64, f64)], t: f64) -> (f64, f64) {
    match points {
        [] => (0.0, 0.0),
        [only] => *only,
        _ => {
            let reduced: Vec<(f64, f64)> = points
                .windows(2)
                .map(|pair| {
                    let (a, b) = (pair[0], pair[1]);
                    (a.0 * (1.0 - t) + b.0 * t, a.1 * (1.0 - t) + b.1 * t)
                })
                .collect();
            de_casteljau(&reduced, t)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clicker::ClickType;

    fn timing(percent: f32) -> RandomizationConfig {
        RandomizationConfig {
            enable_timing_randomization: true,
            timing_variance_percent: percent,
            ..RandomizationConfig::disabled()
        }
    }

    #[test]
    fn test_disabled_delay_is_exact() {
        let engine = RandomizationEngine::new();
        let config = RandomizationConfig::disabled();
        for _ in 0..100 {
            assert_eq!(engine.randomize_delay(100, &config), 100);
        }
    }

    #[test]
    fn test_delay_variance_bounds() {
        let engine = RandomizationEngine::with_seed(7);
        let config = timing(30.0);

        let mut min_seen = u64::MAX;
        let mut max_seen = 0;
        for _ in 0..1000 {
            let delay = engine.randomize_delay(500, &config);
            assert!((350..=650).contains(&delay));
            min_seen = min_seen.min(delay);
            max_seen = max_seen.max(delay);
        }
        assert!(min_seen < 500);
        assert!(max_seen > 500);
    }

    #[test]
    fn test_explicit_ms_variance_wins_and_clamps() {
        let engine = RandomizationEngine::with_seed(3);
        let config = RandomizationConfig {
            timing_variance_ms: 50,
            ..timing(90.0)
        };
        for _ in 0..1000 {
            let delay = engine.randomize_delay(10, &config);
            assert!((1..=60).contains(&delay));
        }
    }

    #[test]
    fn test_zero_variance_returns_base() {
        let engine = RandomizationEngine::new();
        assert_eq!(engine.randomize_delay(0, &timing(20.0)), 0);
        assert_eq!(engine.randomize_delay(250, &timing(0.0)), 250);
    }

    #[test]
    fn test_position_within_radius() {
        let engine = RandomizationEngine::with_seed(11);
        let config = RandomizationConfig {
            enable_position_randomization: true,
            position_variance_radius: 10.0,
            ..RandomizationConfig::disabled()
        };
        let origin = Point::new(500, 500);

        for _ in 0..1000 {
            let point = engine.randomize_position(origin, &config);
            // Rounding each axis can add up to half a pixel per axis
            assert!(origin.distance(point) <= 10.0 + 0.75);
        }

        let off = RandomizationConfig::disabled();
        assert_eq!(engine.randomize_position(origin, &off), origin);
    }

    #[test]
    fn test_jitter_point_bounds() {
        let engine = RandomizationEngine::with_seed(5);
        let origin = Point::new(100, 200);
        assert_eq!(engine.jitter_point(origin, 0), origin);

        for _ in 0..1000 {
            let point = engine.jitter_point(origin, 4);
            assert!((point.x - origin.x).abs() <= 4);
            assert!((point.y - origin.y).abs() <= 4);
        }
    }

    #[test]
    fn test_jitter_saturates_at_extremes() {
        let engine = RandomizationEngine::with_seed(11);
        let mut moved = false;
        for _ in 0..100 {
            // Must not panic on an empty range or overflow
            let point = engine.jitter_point(Point::new(i32::MAX - 1, i32::MIN + 1), u32::MAX);
            moved |= point != Point::new(i32::MAX - 1, i32::MIN + 1);

            let _ = engine.jitter_delay(u64::MAX - 1, u64::MAX);
            assert!(engine.jitter_delay(0, u64::MAX) <= i64::MAX as u64);
        }
        assert!(moved);
    }

    #[test]
    fn test_jitter_delay_never_negative() {
        let engine = RandomizationEngine::with_seed(9);
        assert_eq!(engine.jitter_delay(40, 0), 40);
        for _ in 0..1000 {
            assert!(engine.jitter_delay(10, 100) <= 110);
        }
    }

    #[test]
    fn test_humanize_click_ranges() {
        let engine = RandomizationEngine::with_seed(1);
        let config = RandomizationConfig {
            enable_position_randomization: true,
            humanization_level: HumanizationLevel::High,
            pressure_variation: true,
            ..RandomizationConfig::disabled()
        };
        let origin = Point::new(300, 300);

        for _ in 0..500 {
            let click = engine.humanize_click(origin, &config);
            assert!((click.point.x - origin.x).abs() <= 10);
            assert!((click.point.y - origin.y).abs() <= 10);
            assert!((20..=100).contains(&click.pre_click_delay_ms));
            assert!((0.7..=1.3).contains(&click.pressure));
        }

        let plain = engine.humanize_click(origin, &RandomizationConfig::disabled());
        assert_eq!(plain.point, origin);
        assert_eq!(plain.pre_click_delay_ms, 0);
        assert_eq!(plain.pressure, 1.0);
    }

    #[test]
    fn test_natural_curve() {
        let engine = RandomizationEngine::with_seed(2);
        let start = Point::new(0, 0);
        let end = Point::new(300, 400);

        let straight = engine.generate_natural_curve(start, end, &RandomizationConfig::disabled());
        assert_eq!(straight, vec![start, end]);

        let config = RandomizationConfig {
            natural_curve_enabled: true,
            humanization_level: HumanizationLevel::Extreme,
            ..RandomizationConfig::disabled()
        };
        let curve = engine.generate_natural_curve(start, end, &config);
        // distance 500 -> 50 steps, clamped to 20
        assert_eq!(curve.len(), 21);
        assert_eq!(curve[0], start);
        assert_eq!(curve[20], end);

        let short = engine.generate_natural_curve(start, Point::new(3, 4), &config);
        assert_eq!(short.len(), 3);
    }

    #[test]
    fn test_natural_curve_bends_without_humanization() {
        let engine = RandomizationEngine::with_seed(4);
        let config = RandomizationConfig {
            natural_curve_enabled: true,
            ..RandomizationConfig::disabled()
        };
        let start = Point::new(0, 0);
        let end = Point::new(0, 1000);

        // One control point with up to 10% of the distance as lateral offset
        let bent = (0..20).any(|_| {
            engine
                .generate_natural_curve(start, end, &config)
                .iter()
                .any(|p| p.x != 0)
        });
        assert!(bent);
    }

    #[test]
    fn test_burst_intervals() {
        let engine = RandomizationEngine::with_seed(4);
        let none = RandomizationConfig::disabled();
        assert_eq!(engine.generate_burst_intervals(100, 3, &none), vec![100, 100, 100]);

        let extreme = RandomizationConfig::for_level(HumanizationLevel::Extreme);
        let intervals = engine.generate_burst_intervals(100, 1000, &extreme);
        assert_eq!(intervals.len(), 1000);
        assert!(intervals.iter().all(|i| (50..=150).contains(i)));
    }

    #[test]
    fn test_edge_click_without_randomization() {
        let engine = RandomizationEngine::new();
        let config = RandomizationConfig::disabled();
        let point = engine.randomize_edge_click(ScreenEdge::Bottom, 0.1, 1000, 2000, &config);
        assert_eq!(point, Point::new(500, 1800));
    }

    #[test]
    fn test_multi_touch_stagger() {
        let engine = RandomizationEngine::new();
        let targets = vec![
            ClickTarget::new(Point::new(10, 10)),
            ClickTarget::new(Point::new(20, 20)).with_click_type(ClickType::Double),
        ];

        let randomized = engine.randomize_multi_touch(&targets, &RandomizationConfig::disabled());
        assert_eq!(randomized.len(), 2);
        assert_eq!(randomized[0].delay_ms, 0);
        assert_eq!(randomized[1].delay_ms, 50);
        assert_eq!(randomized[1].point, Point::new(20, 20));
        assert_eq!(randomized[1].target.click_type, ClickType::Double);
    }

    #[test]
    fn test_seeded_engines_agree() {
        let a = RandomizationEngine::with_seed(42);
        let b = RandomizationEngine::with_seed(42);
        let config = timing(50.0);
        for _ in 0..20 {
            assert_eq!(a.randomize_delay(200, &config), b.randomize_delay(200, &config));
        }
    }
}
