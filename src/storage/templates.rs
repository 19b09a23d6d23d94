//! Template image persistence

use std::path::{Path, PathBuf};

use image::ImageFormat;

use super::{FileStore, StorageError};
use crate::vision::Frame;

/// Template images stored as PNG
#[derive(Debug, Clone)]
pub struct TemplateStorage {
    store: FileStore,
}

impl TemplateStorage {
    /// Store below `root/templates`
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            store: FileStore::new(root.as_ref().join("templates"), ".template.png"),
        }
    }

    pub fn save(&self, name: &str, template: &Frame) -> Result<PathBuf, StorageError> {
        let path = self.store.path(name)?;
        self.store.ensure_dir()?;
        template.save_with_format(&path, ImageFormat::Png)?;
        Ok(path)
    }

    pub fn load(&self, name: &str) -> Result<Frame, StorageError> {
        let path = self.store.existing(name)?;
        Ok(image::open(path)?.to_rgba8())
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
    use image::{ImageBuffer, Rgba};

    #[test]
    fn test_template_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = TemplateStorage::new(dir.path());
        let template: Frame =
            ImageBuffer::from_fn(6, 4, |x, y| Rgba([(x * 40) as u8, (y * 60) as u8, 7, 255]));

        storage.save("reward", &template).unwrap();
        assert_eq!(storage.load("reward").unwrap(), template);
        assert_eq!(storage.list().unwrap(), vec!["reward"]);

        assert!(storage.delete("reward").unwrap());
        assert!(matches!(storage.load("reward"), Err(StorageError::NotFound(_))));
    }
}
