//! Macro actions
//!
//! Actions are plain values. The persisted form is JSON with a `type` tag,
//! and every variant round-trips losslessly.

use serde::{Deserialize, Serialize};

/// One macro action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Click {
        x: i32,
        y: i32,
        /// Delay before the tap
        #[serde(default)]
        delay_ms: u64,
        /// Maximum per-axis position jitter
        #[serde(default)]
        jitter_px: u32,
        /// Maximum delay jitter
        #[serde(default)]
        delay_variance_ms: u64,
    },
    Swipe {
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        #[serde(default = "default_swipe_duration")]
        duration_ms: u32,
        #[serde(default)]
        delay_ms: u64,
        #[serde(default)]
        jitter_px: u32,
        #[serde(default)]
        delay_variance_ms: u64,
    },
    Wait {
        millis: u64,
    },
    InputText {
        text: String,
    },
    /// Replay actions `start_index..=end_index` of the same list `count` times
    Loop {
        start_index: usize,
        end_index: usize,
        count: u32,
    },
}

/// Swipe duration used when none is given
pub const DEFAULT_SWIPE_DURATION_MS: u32 = 100;

fn default_swipe_duration() -> u32 {
    DEFAULT_SWIPE_DURATION_MS
}

impl Action {
    /// Click with no delay or jitter
    pub fn click(x: i32, y: i32) -> Self {
        Self::Click {
            x,
            y,
            delay_ms: 0,
            jitter_px: 0,
            delay_variance_ms: 0,
        }
    }

    /// Swipe with no delay or jitter
    pub fn swipe(x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: u32) -> Self {
        Self::Swipe {
            x1,
            y1,
            x2,
            y2,
            duration_ms,
            delay_ms: 0,
            jitter_px: 0,
            delay_variance_ms: 0,
        }
    }

    /// Set the pre-dispatch delay of a click or swipe; other actions are unchanged
    pub fn with_delay(mut self, delay: u64) -> Self {
        if let Self::Click { delay_ms, .. } | Self::Swipe { delay_ms, .. } = &mut self {
            *delay_ms = delay;
        }
        self
    }

    /// Set jitter and delay variance of a click or swipe; other actions are unchanged
    pub fn with_jitter(mut self, px: u32, variance_ms: u64) -> Self {
        if let Self::Click {
            jitter_px,
            delay_variance_ms,
            ..
        }
        | Self::Swipe {
            jitter_px,
            delay_variance_ms,
            ..
        } = &mut self
        {
            *jitter_px = px;
            *delay_variance_ms = variance_ms;
        }
        self
    }

    /// `(delay_ms, delay_variance_ms)` applied before dispatch
    pub fn timing(&self) -> (u64, u64) {
        match self {
            Self::Click {
                delay_ms,
                delay_variance_ms,
                ..
            }
            | Self::Swipe {
                delay_ms,
                delay_variance_ms,
                ..
            } => (*delay_ms, *delay_variance_ms),
            _ => (0, 0),
        }
    }

    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::Click { .. } => "click",
            Self::Swipe { .. } => "swipe",
            Self::Wait { .. } => "wait",
            Self::InputText { .. } => "input_text",
            Self::Loop { .. } => "loop",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_sequence_round_trip() {
        let actions = vec![
            Action::click(10, 20).with_delay(150).with_jitter(3, 40),
            Action::swipe(0, 100, 0, 900, 350).with_delay(20),
            Action::Wait { millis: 500 },
            Action::InputText {
                text: "hello world".into(),
            },
            Action::Loop {
                start_index: 0,
                end_index: 1,
                count: 4,
            },
        ];

        let json = serde_json::to_string_pretty(&actions).unwrap();
        let back: Vec<Action> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, actions);
    }

    #[test]
    fn test_defaults_when_fields_missing() {
        let action: Action = serde_json::from_str(r#"{"type":"swipe","x1":1,"y1":2,"x2":3,"y2":4}"#).unwrap();
        assert_eq!(action, Action::swipe(1, 2, 3, 4, DEFAULT_SWIPE_DURATION_MS));
    }

    #[test]
    fn test_timing_and_builders() {
        let click = Action::click(1, 1).with_delay(100).with_jitter(2, 25);
        assert_eq!(click.timing(), (100, 25));

        let wait = Action::Wait { millis: 5 }.with_delay(100);
        assert_eq!(wait, Action::Wait { millis: 5 });
        assert_eq!(wait.timing(), (0, 0));
        assert_eq!(wait.name(), "wait");
    }
}
