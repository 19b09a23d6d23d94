//! Recorded corrections
//!
//! A correction is the action list a user performed to get past an
//! interruption. Entries are keyed by the interruption they resolve
//! (`text:<literal>` or `template:<name>`); saving a key again replaces the
//! earlier entry.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::StorageError;
use crate::macros::Action;

const FILE_NAME: &str = "corrections.json";

/// Actions that resolve one interruption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionEvent {
    pub interruption_key: String,
    pub actions: Vec<Action>,
}

impl CorrectionEvent {
    pub fn new(interruption_key: impl Into<String>, actions: Vec<Action>) -> Self {
        Self {
            interruption_key: interruption_key.into(),
            actions,
        }
    }
}

/// Corrections kept in a single JSON file
#[derive(Debug, Clone)]
pub struct CorrectionStorage {
    path: PathBuf,
}

impl CorrectionStorage {
    /// Store at `root/corrections.json`
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            path: root.as_ref().join(FILE_NAME),
        }
    }

    /// Save `event`, replacing any entry with the same key
    pub fn save(&self, event: CorrectionEvent) -> Result<(), StorageError> {
        let mut all = self.all()?;
        all.retain(|e| e.interruption_key != event.interruption_key);
        all.push(event);
        self.write(&all)
    }

    pub fn get(&self, interruption_key: &str) -> Result<Option<CorrectionEvent>, StorageError> {
        Ok(self
            .all()?
            .into_iter()
            .find(|e| e.interruption_key == interruption_key))
    }

    /// Remove the entry for `interruption_key`, returning whether it existed
    pub fn remove(&self, interruption_key: &str) -> Result<bool, StorageError> {
        let mut all = self.all()?;
        let before = all.len();
        all.retain(|e| e.interruption_key != interruption_key);
        if all.len() == before {
            return Ok(false);
        }
        self.write(&all)?;
        Ok(true)
    }

    /// Every stored correction, oldest first
    pub fn all(&self) -> Result<Vec<CorrectionEvent>, StorageError> {
        if !self.path.is_file() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&fs::read_to_string(&self.path)?)?)
    }

    fn write(&self, all: &[CorrectionEvent]) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(all)?)?;
        Ok(())
    }
}

/// Key for an unmatched `recognizeText` checkpoint
pub fn text_key(literal: &str) -> String {
    format!("text:{}", literal)
}

/// Key for an unmatched `matchTemplate` checkpoint
pub fn template_key(name: &str) -> String {
    format!("template:{}", name)
}
