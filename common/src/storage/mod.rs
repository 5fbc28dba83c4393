// Fingerprint storage: last observed content digest per job

pub mod file;
pub mod memory;

pub use file::FileFingerprintStore;
pub use memory::InMemoryFingerprintStore;

use crate::errors::StorageError;
use async_trait::async_trait;
use std::fmt;

/// Stand-in for a job that has never been fetched; never equal to a hex digest
pub const MISSING_FINGERPRINT: &str = "null";

/// Hex-encoded content digest, compared case-insensitively
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }

    /// Sentinel used when no fingerprint has been persisted yet
    pub fn missing() -> Self {
        Self(MISSING_FINGERPRINT.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, digest: &str) -> bool {
        self.0.eq_ignore_ascii_case(digest)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persistence for per-job fingerprints.
///
/// Only one poll per job is active at a time, so implementations need no
/// per-job locking.
#[async_trait]
pub trait FingerprintStore: Send + Sync {
    /// Load the stored fingerprint, `None` if the job has none yet
    async fn load(&self, job_id: &str) -> Result<Option<Fingerprint>, StorageError>;

    /// Overwrite the stored fingerprint with `digest`
    async fn save(&self, job_id: &str, digest: &str) -> Result<(), StorageError>;
}
