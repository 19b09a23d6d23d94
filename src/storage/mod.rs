//! On-disk persistence
//!
//! Every store keeps one file per entry, keyed by name, below a common root:
//! - `macros/<name>.json` action sequences ([`MacroStorage`])
//! - `scripts/<name>.script` script sources ([`ScriptStorage`])
//! - `templates/<name>.template.png` template images ([`TemplateStorage`])
//! - `corrections.json` recorded corrections ([`CorrectionStorage`])

pub mod corrections;
pub mod macros;
pub mod templates;

use std::fs;
use std::path::{Path, PathBuf};

pub use corrections::{template_key, text_key, CorrectionEvent, CorrectionStorage};
pub use macros::{MacroStorage, ScriptStorage};
pub use templates::TemplateStorage;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("Invalid storage name: {0:?}")]
    InvalidName(String),
    #[error("No stored entry named {0:?}")]
    NotFound(String),
}

/// Flat directory of `<name><suffix>` files
#[derive(Debug, Clone)]
pub(crate) struct FileStore {
    dir: PathBuf,
    suffix: &'static str,
}

impl FileStore {
    pub(crate) fn new(dir: impl Into<PathBuf>, suffix: &'static str) -> Self {
        Self {
            dir: dir.into(),
            suffix,
        }
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path for `name` after validating it
    pub(crate) fn path(&self, name: &str) -> Result<PathBuf, StorageError> {
        validate_name(name)?;
        Ok(self.dir.join(format!("{}{}", name, self.suffix)))
    }

    /// Path for `name` when the entry exists
    pub(crate) fn existing(&self, name: &str) -> Result<PathBuf, StorageError> {
        let path = self.path(name)?;
        if path.is_file() {
            Ok(path)
        } else {
            Err(StorageError::NotFound(name.to_string()))
        }
    }

    pub(crate) fn ensure_dir(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Stored names, sorted
    pub(crate) fn list(&self) -> Result<Vec<String>, StorageError> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let file_name = entry?.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            match file_name.strip_suffix(self.suffix) {
                Some(name) if !name.is_empty() => names.push(name.to_string()),
                _ => {}
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove `name`, returning whether it existed
    pub(crate) fn delete(&self, name: &str) -> Result<bool, StorageError> {
        let path = self.path(name)?;
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        Ok(true)
    }
}

/// Reject names that would escape the storage directory
pub fn validate_name(name: &str) -> Result<(), StorageError> {
    let invalid = name.is_empty()
        || name.contains("..")
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if invalid {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("daily-login").is_ok());
        assert!(validate_name("farm v2").is_ok());

        for bad in ["", "..", "../etc/passwd", "a/b", "a\\b", "x..y"] {
            assert!(
                matches!(validate_name(bad), Err(StorageError::InvalidName(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested"), ".txt");

        assert!(store.list().unwrap().is_empty());
        store.ensure_dir().unwrap();
        fs::write(store.path("b").unwrap(), "2").unwrap();
        fs::write(store.path("a").unwrap(), "1").unwrap();
        fs::write(dir.path().join("nested").join("ignored.json"), "{}").unwrap();

        assert_eq!(store.list().unwrap(), vec!["a", "b"]);
        assert!(store.existing("a").is_ok());
        assert!(matches!(store.existing("c"), Err(StorageError::NotFound(_))));
        assert!(store.delete("a").unwrap());
        assert!(!store.delete("a").unwrap());
    }
}
