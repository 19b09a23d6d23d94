//! Runtime settings
//!
//! Defines all configurable options of the engine, with presets for common
//! use.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::macros::{Detectors, MacroInterpreter, MacroManager, ScriptRunner, TapInterface};
use crate::pattern::{PatternRecognitionEngine, RecognitionConfig};
use crate::stealth::{HumanizationLevel, RandomizationConfig};
use crate::storage::{CorrectionStorage, MacroStorage, ScriptStorage, TemplateStorage};
use crate::vision::{FrameProvider, OcrEngine, ScaleRange, TemplateMatcher};

/// Main settings structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Macro interpreter settings
    pub engine: EngineSettings,
    /// Default randomization applied to every action
    pub randomization: RandomizationConfig,
    /// Detector tunables
    pub detection: DetectionSettings,
    /// Macro manager settings
    pub manager: ManagerSettings,
    /// Screen geometry
    pub screen: ScreenSettings,
    /// Root directory for macros, scripts, templates and corrections
    pub storage_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            engine: EngineSettings::default(),
            randomization: RandomizationConfig::default(),
            detection: DetectionSettings::default(),
            manager: ManagerSettings::default(),
            screen: ScreenSettings::default(),
            storage_dir: PathBuf::from("autoclicker"),
        }
    }
}

impl Settings {
    /// Slow, heavily humanized input
    pub fn stealth_preset() -> Self {
        Self {
            engine: EngineSettings {
                poll_interval_ms: 400,
                ..Default::default()
            },
            randomization: RandomizationConfig::maximum(),
            ..Default::default()
        }
    }

    /// Fast polling and no randomization
    pub fn fast_preset() -> Self {
        Self {
            engine: EngineSettings {
                poll_interval_ms: 50,
                ..Default::default()
            },
            randomization: RandomizationConfig::disabled(),
            manager: ManagerSettings {
                scheduler_tick_ms: 250,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Parse settings from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load settings from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    /// Write settings as JSON, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Randomization applied by the interpreter, `None` when everything is off
    pub fn active_randomization(&self) -> Option<RandomizationConfig> {
        let r = &self.randomization;
        let active = r.enable_timing_randomization
            || r.enable_position_randomization
            || r.enable_adaptive_delays
            || r.humanization_level != HumanizationLevel::None;
        active.then(|| r.clone())
    }

    /// Recognition engine tunables
    pub fn recognition(&self) -> RecognitionConfig {
        RecognitionConfig {
            scales: self.detection.pattern_scales,
            motion_threshold: self.detection.motion_threshold,
            history_size: self.detection.history_size,
            text_confidence: self.detection.text_confidence,
        }
    }

    /// Detectors with a pattern engine tuned by these settings
    pub fn detectors(
        &self,
        matcher: Arc<dyn TemplateMatcher>,
        ocr: Arc<dyn OcrEngine>,
    ) -> Detectors {
        let patterns =
            PatternRecognitionEngine::with_config(matcher.clone(), ocr.clone(), self.recognition());
        Detectors::new(matcher, ocr)
            .with_patterns(Arc::new(patterns))
            .with_scales(self.detection.condition_scales)
    }

    /// Interpreter wired with these settings
    pub fn interpreter(
        &self,
        frames: Arc<dyn FrameProvider>,
        tapper: Arc<dyn TapInterface>,
        detectors: Detectors,
    ) -> MacroInterpreter {
        MacroInterpreter::new(frames, tapper)
            .with_detectors(detectors.with_scales(self.detection.condition_scales))
            .with_poll_interval(Duration::from_millis(self.engine.poll_interval_ms))
            .with_gate_timeout(self.engine.gate_timeout_ms.map(Duration::from_millis))
            .with_randomization(self.active_randomization())
    }

    /// Script runner reading templates and corrections from `storage_dir`
    pub fn script_runner(&self, interpreter: Arc<MacroInterpreter>) -> ScriptRunner {
        ScriptRunner::new(interpreter)
            .with_templates(TemplateStorage::new(&self.storage_dir))
            .with_corrections(CorrectionStorage::new(&self.storage_dir))
            .with_template_threshold(self.detection.template_threshold)
    }

    pub fn macro_storage(&self) -> MacroStorage {
        MacroStorage::new(&self.storage_dir)
    }

    pub fn script_storage(&self) -> ScriptStorage {
        ScriptStorage::new(&self.storage_dir)
    }

    /// Manager wired with these settings
    pub fn manager(&self, interpreter: Arc<MacroInterpreter>) -> MacroManager {
        MacroManager::with_config(
            interpreter,
            Duration::from_millis(self.manager.scheduler_tick_ms.max(1)),
            self.manager.history_limit,
        )
    }
}

/// Interpreter settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Gate poll interval (ms)
    pub poll_interval_ms: u64,
    /// Give up on a gate after this long (ms), waits forever when unset
    pub gate_timeout_ms: Option<u64>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 200,
            gate_timeout_ms: None,
        }
    }
}

/// Detector tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Default threshold for template checkpoints
    pub template_threshold: f32,
    /// Scale sweep for template conditions
    pub condition_scales: ScaleRange,
    /// Scale sweep for template patterns
    pub pattern_scales: ScaleRange,
    /// Motion score needed to report an animation
    pub motion_threshold: f32,
    /// Frames kept for motion detection
    pub history_size: usize,
    /// Confidence reported for text pattern matches
    pub text_confidence: f32,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            template_threshold: 0.8,
            condition_scales: ScaleRange::CONDITION,
            pattern_scales: ScaleRange::PATTERN,
            motion_threshold: 0.1,
            history_size: 10,
            text_confidence: 0.9,
        }
    }
}

/// Macro manager settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerSettings {
    /// Scheduler tick (ms)
    pub scheduler_tick_ms: u64,
    /// Execution results kept in history
    pub history_limit: usize,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            scheduler_tick_ms: 1000,
            history_limit: 100,
        }
    }
}

/// Screen geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenSettings {
    pub width: u32,
    pub height: u32,
}

impl Default for ScreenSettings {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 2400,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.engine.poll_interval_ms, 200);
        assert_eq!(settings.engine.gate_timeout_ms, None);
        assert_eq!(settings.detection.template_threshold, 0.8);
        assert_eq!(settings.detection.pattern_scales, ScaleRange::PATTERN);
        assert_eq!(settings.manager.history_limit, 100);
        assert!(settings.active_randomization().is_none());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings =
            Settings::from_json(r#"{"engine":{"gate_timeout_ms":5000},"screen":{"width":720}}"#)
                .unwrap();

        assert_eq!(settings.engine.gate_timeout_ms, Some(5000));
        assert_eq!(settings.engine.poll_interval_ms, 200);
        assert_eq!(settings.screen.width, 720);
        assert_eq!(settings.screen.height, 2400);
        assert_eq!(settings.manager, ManagerSettings::default());
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            Settings::from_json("{not json"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_stealth_preset() {
        let settings = Settings::stealth_preset();
        let randomization = settings.active_randomization().unwrap();
        assert_eq!(randomization.humanization_level, HumanizationLevel::Extreme);
        assert!(settings.engine.poll_interval_ms > Settings::default().engine.poll_interval_ms);
    }

    #[test]
    fn test_fast_preset() {
        let settings = Settings::fast_preset();
        assert!(settings.active_randomization().is_none());
        assert_eq!(settings.engine.poll_interval_ms, 50);
    }

    #[test]
    fn test_recognition_config() {
        let mut settings = Settings::default();
        settings.detection.history_size = 4;
        let config = settings.recognition();
        assert_eq!(config.history_size, 4);
        assert_eq!(config.scales, ScaleRange::PATTERN);
    }

    #[test]
    fn test_storage_under_storage_dir() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            storage_dir: dir.path().to_path_buf(),
            ..Default::default()
        };

        let path = settings
            .macro_storage()
            .save("farm", &[crate::macros::Action::click(1, 2)])
            .unwrap();
        assert!(path.starts_with(dir.path()));
        assert_eq!(settings.macro_storage().list().unwrap(), vec!["farm"]);

        settings.script_storage().save("farm", "tap(1, 2)").unwrap();
        assert_eq!(settings.script_storage().load("farm").unwrap(), "tap(1, 2)");
    }

    #[test]
    fn test_detectors_carry_pattern_engine() {
        let settings = Settings::default();
        let detectors = settings.detectors(
            Arc::new(crate::vision::ImageprocMatcher::new()),
            Arc::new(crate::vision::NoOcr),
        );
        assert!(detectors.patterns.is_some());
        assert_eq!(detectors.scales, ScaleRange::CONDITION);
    }

    #[tokio::test]
    async fn test_script_runner_uses_configured_threshold() {
        use crate::macros::ScriptOutcome;
        use crate::vision::{Frame, MultiScaleMatch, NoOcr, ScreenCapture, VisionError};
        use tokio_util::sync::CancellationToken;

        struct Scores(f32);

        impl TemplateMatcher for Scores {
            fn match_multi_scale(
                &self,
                _frame: &Frame,
                _template: &Frame,
                _scales: ScaleRange,
            ) -> Result<MultiScaleMatch, VisionError> {
                Ok(MultiScaleMatch {
                    score: self.0,
                    x: 0,
                    y: 0,
                    scale: 1.0,
                })
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings {
            storage_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        TemplateStorage::new(dir.path())
            .save("reward", &Frame::new(2, 2))
            .unwrap();

        let frames = Arc::new(ScreenCapture::from_frame(Frame::new(8, 8)));
        let tapper = Arc::new(crate::android::LogTapClient::new());
        let detectors = Detectors::new(Arc::new(Scores(0.85)), Arc::new(NoOcr));
        let interpreter = Arc::new(settings.interpreter(frames, tapper, detectors));

        let script = "matchTemplate(\"reward\")";
        let token = CancellationToken::new();

        let runner = settings.script_runner(interpreter.clone());
        assert_eq!(runner.template_threshold(), 0.8);
        let outcome = runner.run(script, &token).await.unwrap();
        assert_eq!(outcome, ScriptOutcome::Completed { actions: 0 });

        settings.detection.template_threshold = 0.9;
        let outcome = settings
            .script_runner(interpreter)
            .run(script, &token)
            .await
            .unwrap();
        assert!(matches!(outcome, ScriptOutcome::Paused { .. }));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = Settings::fast_preset();
        settings.storage_dir = dir.path().join("data");
        settings.save(&path).unwrap();

        assert_eq!(Settings::load(&path).unwrap(), settings);
        assert!(matches!(
            Settings::load(dir.path().join("missing.json")),
            Err(ConfigError::Io(_))
        ));
    }
}
