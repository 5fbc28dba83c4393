// File-backed fingerprint store: one plain-text file per job

use crate::errors::StorageError;
use crate::storage::{Fingerprint, FingerprintStore};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{debug, instrument};

/// File name of the persisted digest inside each job directory
pub const FINGERPRINT_FILE_NAME: &str = "url-change-trigger-oldmd5";

/// Stores fingerprints at `<base_dir>/<job_id>/url-change-trigger-oldmd5`
#[derive(Debug, Clone)]
pub struct FileFingerprintStore {
    base_dir: PathBuf,
}

impl FileFingerprintStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Path of the fingerprint file for `job_id`.
    ///
    /// Job ids become a single directory name, so separators and relative
    /// components are rejected.
    pub fn fingerprint_path(&self, job_id: &str) -> Result<PathBuf, StorageError> {
        let invalid = job_id.is_empty()
            || job_id == "."
            || job_id == ".."
            || job_id.contains(['/', '\\', '\0']);
        if invalid {
            return Err(StorageError::InvalidJobId(job_id.to_string()));
        }
        Ok(self.base_dir.join(job_id).join(FINGERPRINT_FILE_NAME))
    }
}

#[async_trait]
impl FingerprintStore for FileFingerprintStore {
    #[instrument(skip(self))]
    async fn load(&self, job_id: &str) -> Result<Option<Fingerprint>, StorageError> {
        let path = self.fingerprint_path(job_id)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let digest = contents.trim();
                if digest.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(Fingerprint::new(digest)))
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No fingerprint stored yet");
                Ok(None)
            }
            Err(e) => Err(StorageError::FileSystemError(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    #[instrument(skip(self))]
    async fn save(&self, job_id: &str, digest: &str) -> Result<(), StorageError> {
        let path = self.fingerprint_path(job_id)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        // Write then rename so a crash never leaves a truncated digest
        let staging = path.with_extension("tmp");
        tokio::fs::write(&staging, digest).await?;
        tokio::fs::rename(&staging, &path).await?;

        debug!(path = %path.display(), "Fingerprint saved");
        Ok(())
    }
}
