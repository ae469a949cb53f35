//! Deploy to a directory on disk.

use super::{DeployError, Destination};
use crate::render::output_path;
use crate::storage::{LocalStorage, Storage, StorageError};
use std::path::PathBuf;

/// Writes each serving path to its output file under `out_dir`:
/// `/hi/` lands at `hi/index.html`.
pub struct LocalDestination {
    storage: LocalStorage,
}

impl LocalDestination {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage: LocalStorage::new(out_dir),
        }
    }
}

impl Destination for LocalDestination {
    fn kind(&self) -> &'static str {
        "local"
    }

    fn label(&self) -> String {
        self.storage.root().display().to_string()
    }

    fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>, DeployError> {
        match self.storage.read(&output_path(path)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_file(&self, path: &str, bytes: &[u8], _content_type: &str) -> Result<(), DeployError> {
        Ok(self.storage.write(&output_path(path), bytes)?)
    }

    fn delete_file(&self, path: &str) -> Result<(), DeployError> {
        match self.storage.delete(&output_path(path)) {
            Ok(()) | Err(StorageError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn maps_serving_paths_to_files() {
        let tmp = TempDir::new().unwrap();
        let dest = LocalDestination::new(tmp.path());
        dest.write_file("/hi/", b"OK", "text/html").unwrap();
        dest.write_file("/app.css", b"x", "text/css").unwrap();
        assert!(tmp.path().join("hi/index.html").is_file());
        assert!(tmp.path().join("app.css").is_file());
        assert_eq!(dest.read_file("/hi/").unwrap().as_deref(), Some(b"OK".as_slice()));
    }

    #[test]
    fn missing_files_read_as_none_and_delete_quietly() {
        let tmp = TempDir::new().unwrap();
        let dest = LocalDestination::new(tmp.path());
        assert!(dest.read_file("/nope/").unwrap().is_none());
        dest.delete_file("/nope/").unwrap();
    }
}
