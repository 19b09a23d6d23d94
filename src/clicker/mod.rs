//! Multi-target click patterns
//!
//! Higher-level click actions (multi-touch, sequential targets, edge clicks,
//! humanized clicks) and the per-action statistics the coordinator keeps.

pub mod coordinator;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stealth::{HumanizationLevel, RandomizationConfig};
use crate::vision::Point;

pub use coordinator::MultiTargetClickCoordinator;

/// How the points of a [`AdvancedAction::MultiClick`] are played
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickMode {
    /// All taps at once
    Synchronous,
    /// One tap after another with a short gap
    Sequential,
    /// Alternating taps and swipes between consecutive points
    Combined,
    /// Sequential with a gap scaled by humanization level
    Adaptive,
}

/// Kind of touch performed on a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickType {
    #[default]
    Single,
    Double,
    Triple,
    LongPress,
    Custom,
}

/// Named screen edge or corner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenEdge {
    Top,
    Bottom,
    Left,
    Right,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl ScreenEdge {
    /// Point inset from this edge by `offset` (fraction of the screen size)
    ///
    /// Plain edges are centred along their length.
    pub fn anchor(self, offset: f32, width: u32, height: u32) -> Point {
        let (w, h) = (width as i32, height as i32);
        let dx = (width as f32 * offset) as i32;
        let dy = (height as f32 * offset) as i32;

        match self {
            Self::Top => Point::new(w / 2, dy),
            Self::Bottom => Point::new(w / 2, h - dy),
            Self::Left => Point::new(dx, h / 2),
            Self::Right => Point::new(w - dx, h / 2),
            Self::TopLeft => Point::new(dx, dy),
            Self::TopRight => Point::new(w - dx, dy),
            Self::BottomLeft => Point::new(dx, h - dy),
            Self::BottomRight => Point::new(w - dx, h - dy),
        }
    }
}

/// One touch target of a multi-target action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickTarget {
    /// Where to touch
    pub point: Point,
    /// Kind of touch
    #[serde(default)]
    pub click_type: ClickType,
    /// Pressure multiplier
    #[serde(default = "default_pressure")]
    pub pressure: f32,
    /// Hold duration for long presses
    #[serde(default)]
    pub hold_duration_ms: u64,
}

fn default_pressure() -> f32 {
    1.0
}

impl ClickTarget {
    pub fn new(point: Point) -> Self {
        Self {
            point,
            click_type: ClickType::Single,
            pressure: 1.0,
            hold_duration_ms: 0,
        }
    }

    pub fn with_click_type(mut self, click_type: ClickType) -> Self {
        self.click_type = click_type;
        self
    }

    /// Turn the target into a long press held for `hold_ms`
    pub fn long_press(mut self, hold_ms: u64) -> Self {
        self.click_type = ClickType::LongPress;
        self.hold_duration_ms = hold_ms;
        self
    }
}

/// Scheduling options for a [`AdvancedAction::TimedAction`]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Delay before the wrapped action starts
    pub delayed_start_ms: u64,
}

/// Multi-target click action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdvancedAction {
    MultiClick {
        points: Vec<Point>,
        mode: ClickMode,
        delay_ms: u64,
        #[serde(default)]
        randomization: Option<RandomizationConfig>,
    },
    SynchronousClick {
        targets: Vec<ClickTarget>,
        delay_ms: u64,
        #[serde(default)]
        randomization: Option<RandomizationConfig>,
    },
    SequentialClick {
        targets: Vec<ClickTarget>,
        /// Repeat count per target index (missing = 1)
        #[serde(default)]
        loop_counts: BTreeMap<usize, u32>,
        delay_ms: u64,
        #[serde(default)]
        randomization: Option<RandomizationConfig>,
    },
    EdgeClick {
        edge: ScreenEdge,
        offset: f32,
        delay_ms: u64,
        #[serde(default)]
        randomization: Option<RandomizationConfig>,
    },
    SmartClick {
        point: Point,
        level: HumanizationLevel,
        delay_ms: u64,
        #[serde(default)]
        randomization: Option<RandomizationConfig>,
    },
    /// Nested actions; condition evaluation belongs to the caller
    ConditionalClick { actions: Vec<AdvancedAction> },
    TimedAction {
        action: Box<AdvancedAction>,
        #[serde(default)]
        schedule: ScheduleConfig,
    },
}

impl AdvancedAction {
    /// Statistics key for this action variant
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MultiClick { .. } => "MultiClick",
            Self::SynchronousClick { .. } => "SynchronousClick",
            Self::SequentialClick { .. } => "SequentialClick",
            Self::EdgeClick { .. } => "EdgeClick",
            Self::SmartClick { .. } => "SmartClick",
            Self::ConditionalClick { .. } => "ConditionalClick",
            Self::TimedAction { .. } => "TimedAction",
        }
    }
}

/// Running statistics for one action kind
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActionStats {
    /// Attempts so far
    pub total_executions: u64,
    /// Fraction of attempts that succeeded
    pub success_rate: f32,
    /// Mean duration of attempts, in milliseconds
    pub average_execution_ms: u64,
    /// When the last attempt finished
    pub last_execution: Option<DateTime<Utc>>,
    /// Failed attempts
    pub error_count: u64,
}

impl ActionStats {
    /// Fold one attempt into the aggregate
    ///
    /// Averages are updated incrementally from the previous aggregate.
    /// Failed attempts count as zero duration.
    pub fn record(&mut self, duration_ms: u64, success: bool) {
        let n = self.total_executions;
        let hit = if success { 1.0 } else { 0.0 };
        let duration = if success { duration_ms } else { 0 };

        self.success_rate = ((self.success_rate as f64 * n as f64 + hit) / (n + 1) as f64) as f32;
        self.average_execution_ms = (self.average_execution_ms * n + duration) / (n + 1);
        self.total_executions = n + 1;
        self.last_execution = Some(Utc::now());
        if !success {
            self.error_count += 1;
        }
    }
}
