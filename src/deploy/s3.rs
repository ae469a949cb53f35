//! Deploy to an S3-compatible bucket.

use super::{DeployError, Destination};
use crate::render::output_path;
use crate::storage::{S3Config, S3Storage, Storage, StorageError};

/// Uploads each serving path as the object for its output file, with the
/// content type the renderer chose.
pub struct S3Destination {
    storage: S3Storage,
    label: String,
}

impl S3Destination {
    pub fn connect(config: &S3Config) -> Result<Self, DeployError> {
        if config.bucket.is_empty() {
            return Err(DeployError::Config("s3 destination needs a bucket".to_string()));
        }
        let storage = S3Storage::connect(config)?;
        let label = match config.prefix.trim_matches('/') {
            "" => format!("s3://{}", storage.bucket_name()),
            prefix => format!("s3://{}/{}", storage.bucket_name(), prefix),
        };
        Ok(Self { storage, label })
    }
}

impl Destination for S3Destination {
    fn kind(&self) -> &'static str {
        "s3"
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>, DeployError> {
        match self.storage.read(&output_path(path)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_file(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<(), DeployError> {
        Ok(self.storage.write_typed(&output_path(path), bytes, content_type)?)
    }

    fn delete_file(&self, path: &str) -> Result<(), DeployError> {
        Ok(self.storage.delete(&output_path(path))?)
    }
}
