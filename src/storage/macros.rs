//! Macro and script persistence

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use super::{FileStore, StorageError};
use crate::macros::Action;

/// Action sequences stored as pretty-printed JSON
#[derive(Debug, Clone)]
pub struct MacroStorage {
    store: FileStore,
}

impl MacroStorage {
    /// Store below `root/macros`
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            store: FileStore::new(root.as_ref().join("macros"), ".json"),
        }
    }

    pub fn dir(&self) -> &Path {
        self.store.dir()
    }

    pub fn save(&self, name: &str, actions: &[Action]) -> Result<PathBuf, StorageError> {
        let path = self.store.path(name)?;
        self.store.ensure_dir()?;
        fs::write(&path, serde_json::to_string_pretty(actions)?)?;
        debug!("Saved macro '{}' ({} actions)", name, actions.len());
        Ok(path)
    }

    pub fn load(&self, name: &str) -> Result<Vec<Action>, StorageError> {
        let path = self.store.existing(name)?;
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    pub fn list(&self) -> Result<Vec<String>, StorageError> {
        self.store.list()
    }

    pub fn delete(&self, name: &str) -> Result<bool, StorageError> {
        self.store.delete(name)
    }
}

/// Script sources stored as plain text
#[derive(Debug, Clone)]
pub struct ScriptStorage {
    store: FileStore,
}

impl ScriptStorage {
    /// Store below `root/scripts`
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            store: FileStore::new(root.as_ref().join("scripts"), ".script"),
        }
    }

    pub fn save(&self, name: &str, source: &str) -> Result<PathBuf, StorageError> {
        let path = self.store.path(name)?;
        self.store.ensure_dir()?;
        fs::write(&path, source)?;
        Ok(path)
    }

    pub fn load(&self, name: &str) -> Result<String, StorageError> {
        Ok(fs::read_to_string(self.store.existing(name)?)?)
    }

    pub fn list(&self) -> Result<Vec<String>, StorageError> {
        self.store.list()
    }

    pub fn delete(&self, name: &str) -> Result<bool, StorageError> {
        self.store.delete(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macro_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MacroStorage::new(dir.path());
        let actions = vec![
            Action::click(540, 1200).with_jitter(4, 30),
            Action::swipe(100, 1500, 100, 300, 400).with_delay(250),
            Action::Wait { millis: 1000 },
            Action::Loop {
                start_index: 0,
                end_index: 2,
                count: 3,
            },
        ];

        let path = storage.save("farm", &actions).unwrap();
        assert!(path.ends_with("macros/farm.json"));
        assert_eq!(storage.load("farm").unwrap(), actions);
        assert_eq!(storage.list().unwrap(), vec!["farm"]);

        assert!(storage.delete("farm").unwrap());
        assert!(matches!(storage.load("farm"), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_rejects_escaping_names() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MacroStorage::new(dir.path());
        assert!(matches!(
            storage.save("../outside", &[]),
            Err(StorageError::InvalidName(_))
        ));
    }

    #[test]
    fn test_script_storage() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ScriptStorage::new(dir.path());

        storage.save("daily", "tap(1, 2)\nwait(100)\n").unwrap();
        storage.save("collect", "tap(3, 4)\n").unwrap();

        assert_eq!(storage.load("daily").unwrap(), "tap(1, 2)\nwait(100)\n");
        assert_eq!(storage.list().unwrap(), vec!["collect", "daily"]);
    }
}
