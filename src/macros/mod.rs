//! Macros and their execution
//!
//! A macro is an ordered list of steps. Each step may be gated by a screen
//! condition and carries a list of actions. The interpreter plays macros
//! against a [`TapInterface`], the manager keeps a registry of them and the
//! script module parses the line-oriented script language into actions.

pub mod action;
pub mod condition;
pub mod interpreter;
pub mod manager;
pub mod recorder;
pub mod script;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::vision::VisionError;

pub use action::Action;
pub use condition::{Condition, ConditionBuilder, Counter, Detectors, TimeWindow};
pub use interpreter::{ExecutionSummary, MacroInterpreter};
pub use manager::{ExecutionResult, MacroInfo, MacroManager, MacroSchedule};
pub use recorder::MacroRecorder;
pub use script::{parse_script, ScriptOutcome, ScriptRunner, ScriptStatement};

/// Gesture sink the interpreter dispatches to
///
/// Calls are synchronous from the interpreter's point of view. An error
/// aborts the running macro.
pub trait TapInterface: Send + Sync {
    /// Tap at a screen position
    fn tap(&self, x: i32, y: i32) -> Result<(), TapError>;

    /// Swipe between two positions over `duration_ms`
    fn swipe(&self, x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: u32) -> Result<(), TapError>;

    /// Type text into the focused field
    fn input_text(&self, text: &str) -> Result<(), TapError>;
}

/// Gesture dispatch errors
#[derive(Debug, thiserror::Error)]
pub enum TapError {
    #[error("Gesture service unavailable")]
    Unavailable,
    #[error("Command `{command}` exited with status {status}")]
    CommandFailed { command: String, status: i32 },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Macro execution errors
#[derive(Debug, thiserror::Error)]
pub enum MacroError {
    #[error("Execution cancelled")]
    Cancelled,
    #[error("Condition not satisfied within {0:?}")]
    GateTimeout(Duration),
    #[error("Gesture dispatch failed: {0}")]
    Tap(#[from] TapError),
    #[error("Frame acquisition failed: {0}")]
    Frame(#[from] VisionError),
    #[error("Macro not found: {0}")]
    NotFound(String),
    #[error("Execution limit reached for macro {0}")]
    LimitReached(String),
    #[error("Execution task failed: {0}")]
    TaskFailed(String),
}

/// A gated group of actions
#[derive(Debug, Default)]
pub struct Step {
    /// Precondition polled until it holds
    pub condition: Option<Condition>,
    /// Actions run once the gate passes
    pub actions: Vec<Action>,
}

impl Step {
    /// Step without a gate
    pub fn new(actions: Vec<Action>) -> Self {
        Self {
            condition: None,
            actions,
        }
    }

    /// Step gated by `condition`
    pub fn gated(condition: Condition, actions: Vec<Action>) -> Self {
        Self {
            condition: Some(condition),
            actions,
        }
    }
}

/// A named, repeatable sequence of steps
#[derive(Debug)]
pub struct Macro {
    pub name: String,
    pub steps: Vec<Step>,
    /// Times the whole step list is played (at least 1)
    pub repeat_count: u32,
}

impl Macro {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            repeat_count: 1,
        }
    }

    /// Single ungated step built from a flat action list
    pub fn from_actions(name: impl Into<String>, actions: Vec<Action>) -> Self {
        let mut m = Self::new(name);
        m.steps.push(Step::new(actions));
        m
    }

    /// Start building a macro
    pub fn builder(name: impl Into<String>) -> MacroBuilder {
        MacroBuilder {
            inner: Self::new(name),
        }
    }

    /// Total number of actions over all steps
    pub fn action_count(&self) -> usize {
        self.steps.iter().map(|s| s.actions.len()).sum()
    }
}

/// Builder for [`Macro`]
#[derive(Debug)]
pub struct MacroBuilder {
    inner: Macro,
}

impl MacroBuilder {
    /// Play the step list `count` times (values below 1 become 1)
    pub fn repeat(mut self, count: u32) -> Self {
        self.inner.repeat_count = count.max(1);
        self
    }

    /// Add a step gated by `condition`
    pub fn wait_until(mut self, condition: Condition, build: impl FnOnce(&mut ActionsBuilder)) -> Self {
        let mut actions = ActionsBuilder::default();
        build(&mut actions);
        self.inner.steps.push(Step::gated(condition, actions.list));
        self
    }

    /// Add an ungated step
    pub fn actions(mut self, build: impl FnOnce(&mut ActionsBuilder)) -> Self {
        let mut actions = ActionsBuilder::default();
        build(&mut actions);
        self.inner.steps.push(Step::new(actions.list));
        self
    }

    pub fn build(self) -> Macro {
        self.inner
    }
}

/// Collects the actions of one step
#[derive(Debug, Default)]
pub struct ActionsBuilder {
    list: Vec<Action>,
}

impl ActionsBuilder {
    pub fn click(&mut self, x: i32, y: i32) -> &mut Self {
        self.push(Action::click(x, y))
    }

    pub fn swipe(&mut self, x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: u32) -> &mut Self {
        self.push(Action::swipe(x1, y1, x2, y2, duration_ms))
    }

    pub fn wait_ms(&mut self, millis: u64) -> &mut Self {
        self.push(Action::Wait { millis })
    }

    pub fn input_text(&mut self, text: impl Into<String>) -> &mut Self {
        self.push(Action::InputText { text: text.into() })
    }

    /// Replay actions `start..=end` of this step `count` times
    pub fn repeat_range(&mut self, start: usize, end: usize, count: u32) -> &mut Self {
        self.push(Action::Loop {
            start_index: start,
            end_index: end,
            count,
        })
    }

    /// Append any action
    pub fn push(&mut self, action: Action) -> &mut Self {
        self.list.push(action);
        self
    }
}

/// Sleep for `duration` unless `token` is cancelled first
pub(crate) async fn sleep_or_cancel(
    token: &CancellationToken,
    duration: Duration,
) -> Result<(), MacroError> {
    if token.is_cancelled() {
        return Err(MacroError::Cancelled);
    }
    if duration.is_zero() {
        return Ok(());
    }

    tokio::select! {
        _ = token.cancelled() => Err(MacroError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
