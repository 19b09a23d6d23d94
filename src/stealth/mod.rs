//! Humanization and randomization
//!
//! This module makes automated input look less mechanical:
//! - Timing jitter with optional adaptive blending toward past delays
//! - Position jitter inside a radius
//! - Per-level click humanization (micro movement, pre-click delay, pressure)
//! - Bezier movement curves and burst intervals

pub mod adaptive;
pub mod humanize;

use serde::{Deserialize, Serialize};

pub use adaptive::AdaptiveDelayTracker;
pub use humanize::{HumanizedClick, RandomizationEngine, RandomizedClickTarget};

/// Graded magnitude of humanization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HumanizationLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
    Extreme,
}

impl HumanizationLevel {
    /// Weight given to the historical mean by the adaptive delay tracker
    pub fn blend_factor(self) -> f64 {
        match self {
            Self::None => 0.0,
            Self::Low => 0.1,
            Self::Medium => 0.2,
            Self::High => 0.3,
            Self::Extreme => 0.4,
        }
    }

    /// Fraction of the base interval used as burst variance
    pub fn burst_variance(self) -> f64 {
        match self {
            Self::None => 0.0,
            Self::Low => 0.1,
            Self::Medium => 0.2,
            Self::High => 0.3,
            Self::Extreme => 0.5,
        }
    }

    /// Position variance radius implied by the level, in pixels
    pub fn position_radius(self) -> f32 {
        match self {
            Self::None => 0.0,
            Self::Low => 2.0,
            Self::Medium => 5.0,
            Self::High => 10.0,
            Self::Extreme => 20.0,
        }
    }

    /// Pause between adaptive clicks, in milliseconds
    pub fn adaptive_gap_ms(self) -> u64 {
        match self {
            Self::None => 50,
            Self::Low => 75,
            Self::Medium => 100,
            Self::High => 150,
            Self::Extreme => 200,
        }
    }

    /// Click humanization parameters for this level
    pub fn pattern(self) -> HumanizationPattern {
        match self {
            Self::None => HumanizationPattern {
                micro_movement_range: 0.0,
                pre_click_delay_ms: (0, 0),
                pressure_range: (1.0, 1.0),
                curve_complexity: 0,
            },
            Self::Low => HumanizationPattern {
                micro_movement_range: 2.0,
                pre_click_delay_ms: (0, 20),
                pressure_range: (0.9, 1.1),
                curve_complexity: 1,
            },
            Self::Medium => HumanizationPattern {
                micro_movement_range: 5.0,
                pre_click_delay_ms: (10, 50),
                pressure_range: (0.8, 1.2),
                curve_complexity: 2,
            },
            Self::High => HumanizationPattern {
                micro_movement_range: 10.0,
                pre_click_delay_ms: (20, 100),
                pressure_range: (0.7, 1.3),
                curve_complexity: 3,
            },
            Self::Extreme => HumanizationPattern {
                micro_movement_range: 20.0,
                pre_click_delay_ms: (50, 200),
                pressure_range: (0.5, 1.5),
                curve_complexity: 4,
            },
        }
    }
}

/// Per-level click humanization parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HumanizationPattern {
    /// Maximum micro movement per axis, in pixels
    pub micro_movement_range: f32,
    /// Inclusive pre-click delay range in milliseconds
    pub pre_click_delay_ms: (u64, u64),
    /// Inclusive pressure multiplier range
    pub pressure_range: (f32, f32),
    /// Number of Bezier control points for movement curves
    pub curve_complexity: usize,
}

/// Configuration for randomized input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomizationConfig {
    /// Enable timing jitter
    pub enable_timing_randomization: bool,
    /// Timing variance as a percentage of the base delay
    pub timing_variance_percent: f32,
    /// Timing variance in milliseconds (takes precedence over the percentage)
    pub timing_variance_ms: u64,
    /// Enable position jitter
    pub enable_position_randomization: bool,
    /// Maximum jitter radius in pixels
    pub position_variance_radius: f32,
    /// Blend delays toward the recent average
    pub enable_adaptive_delays: bool,
    /// Humanization level
    pub humanization_level: HumanizationLevel,
    /// Generate curved movement paths
    pub natural_curve_enabled: bool,
    /// Randomize touch pressure
    pub pressure_variation: bool,
}

impl Default for RandomizationConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

impl RandomizationConfig {
    /// No randomization at all
    pub fn disabled() -> Self {
        Self {
            enable_timing_randomization: false,
            timing_variance_percent: 0.0,
            timing_variance_ms: 0,
            enable_position_randomization: false,
            position_variance_radius: 0.0,
            enable_adaptive_delays: false,
            humanization_level: HumanizationLevel::None,
            natural_curve_enabled: false,
            pressure_variation: false,
        }
    }

    /// Config derived from a humanization level alone
    pub fn for_level(level: HumanizationLevel) -> Self {
        Self {
            humanization_level: level,
            enable_position_randomization: level != HumanizationLevel::None,
            position_variance_radius: level.position_radius(),
            ..Self::disabled()
        }
    }

    /// Moderate humanization suitable for most unattended runs
    pub fn balanced() -> Self {
        Self {
            enable_timing_randomization: true,
            timing_variance_percent: 20.0,
            enable_position_randomization: true,
            position_variance_radius: 5.0,
            humanization_level: HumanizationLevel::Medium,
            natural_curve_enabled: true,
            ..Self::disabled()
        }
    }

    /// Every randomization feature at its strongest setting
    pub fn maximum() -> Self {
        Self {
            enable_timing_randomization: true,
            timing_variance_percent: 40.0,
            timing_variance_ms: 0,
            enable_position_randomization: true,
            position_variance_radius: 20.0,
            enable_adaptive_delays: true,
            humanization_level: HumanizationLevel::Extreme,
            natural_curve_enabled: true,
            pressure_variation: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_tables() {
        assert_eq!(HumanizationLevel::None.blend_factor(), 0.0);
        assert_eq!(HumanizationLevel::Extreme.blend_factor(), 0.4);
        assert_eq!(HumanizationLevel::Extreme.burst_variance(), 0.5);
        assert_eq!(HumanizationLevel::Medium.pattern().curve_complexity, 2);
        assert_eq!(HumanizationLevel::High.pattern().pre_click_delay_ms, (20, 100));
    }

    #[test]
    fn test_for_level() {
        let none = RandomizationConfig::for_level(HumanizationLevel::None);
        assert!(!none.enable_position_randomization);
        assert_eq!(none.position_variance_radius, 0.0);

        let high = RandomizationConfig::for_level(HumanizationLevel::High);
        assert!(high.enable_position_randomization);
        assert_eq!(high.position_variance_radius, 10.0);
        assert!(!high.enable_timing_randomization);
    }

    #[test]
    fn test_config_json_defaults() {
        let config: RandomizationConfig =
            serde_json::from_str(r#"{"humanization_level":"low","enable_timing_randomization":true}"#)
                .unwrap();
        assert_eq!(config.humanization_level, HumanizationLevel::Low);
        assert!(config.enable_timing_randomization);
        assert_eq!(config.timing_variance_ms, 0);
    }
}
