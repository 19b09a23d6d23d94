//! AutoClicker core - macro execution and screen recognition for Android
//!
//! This library provides the engine behind a screen-driven auto-clicker:
//! macros gated by screen conditions, a line-oriented script language with
//! recoverable checkpoints, template/text/color/motion pattern detection,
//! spatial layout matching and humanized multi-target clicking.
//!
//! Frames come in through a [`vision::FrameProvider`] and gestures go out
//! through a [`macros::TapInterface`]; both are injected, so the engine runs
//! the same against the Android accessibility service, `adb` or test doubles.
//!
//! ## Anti-Detection
//!
//! The `stealth` module provides humanization features to make automation
//! less detectable by adding realistic variance to timing and positions.

pub mod android;
pub mod clicker;
pub mod config;
pub mod macros;
pub mod pattern;
pub mod stealth;
pub mod storage;
pub mod vision;

pub use clicker::{AdvancedAction, ClickTarget, MultiTargetClickCoordinator};
pub use config::Settings;
pub use macros::{
    Action, Condition, Macro, MacroError, MacroInterpreter, MacroManager, ScriptRunner,
    TapInterface,
};
pub use pattern::{PatternRecognitionEngine, SpatialMatcher};
pub use stealth::{RandomizationConfig, RandomizationEngine};
pub use vision::{Frame, FrameProvider, ScreenCapture};
