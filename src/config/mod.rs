//! Configuration module
//!
//! Engine settings, presets and their JSON persistence.

pub mod settings;

pub use settings::{
    DetectionSettings, EngineSettings, ManagerSettings, ScreenSettings, Settings,
};

/// Settings load/save errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}
