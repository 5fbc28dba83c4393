// Change detection: one poll cycle per invocation
//
// A poll fetches the monitored resource, digests the body, compares the digest
// with the job's stored fingerprint and reports a build request on change.

pub mod http;

pub use http::HttpChangeDetector;

use crate::errors::PollError;
use crate::models::{JobTriggerConfig, PollOutcome};
use async_trait::async_trait;

/// ChangeDetector trait defines the interface the scheduler polls through
#[async_trait]
pub trait ChangeDetector: Send + Sync {
    /// Run one poll cycle for `job_id`.
    ///
    /// Errors are confined to this cycle; nothing is retried here.
    async fn poll(&self, job_id: &str, config: &JobTriggerConfig) -> Result<PollOutcome, PollError>;
}
