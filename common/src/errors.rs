// Error handling framework
// Configuration-time errors fail closed, poll-time errors fail soft.

use crate::policy::FrequencyPolicy;
use thiserror::Error;

/// Direction of a fire-time scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    Forward,
    Backward,
}

impl std::fmt::Display for ScanDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanDirection::Forward => write!(f, "next"),
            ScanDirection::Backward => write!(f, "previous"),
        }
    }
}

/// Schedule-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Invalid schedule expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("No {direction} fire time for '{expression}' within {days} days")]
    Unresolvable {
        expression: String,
        direction: ScanDirection,
        days: i64,
    },
}

/// Policy and job configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("{field} must be greater than 0 seconds")]
    InvalidTimeout { field: &'static str },

    #[error("Timeout needs to be specified. Global configuration is missing.")]
    MissingTimeout,

    #[error("Schedule needs to be specified. Global configuration is missing.")]
    MissingSchedule,

    #[error("Timeout cannot be greater than {max} seconds (maximum timeout), got {timeout}")]
    TimeoutExceedsMax { timeout: u32, max: u32 },

    #[error("Cannot schedule the trigger more frequently than the minimum schedule ('{minimum}'), got '{schedule}'")]
    ScheduleTooFrequent { schedule: String, minimum: String },

    #[error("Default schedule '{default}' is more frequent than minimum schedule '{minimum}'")]
    DefaultScheduleTooFrequent { default: String, minimum: String },

    #[error("Default timeout {default}s is greater than maximum timeout {max}s")]
    DefaultTimeoutExceedsMax { default: u32, max: u32 },
}

/// Outcome of a rejected policy resolution
#[derive(Error, Debug, Clone)]
pub enum ResolveError {
    /// Input could not be resolved at all; nothing should be stored
    #[error(transparent)]
    Invalid(#[from] PolicyError),

    /// Bounds were violated; `corrected` holds the clamped policy
    #[error("Policy bounds violated: {}", summarize(.violations))]
    Violation {
        corrected: Box<FrequencyPolicy>,
        violations: Vec<PolicyError>,
    },
}

impl ResolveError {
    /// The clamped policy, if the failure was a bounds violation
    pub fn corrected(&self) -> Option<&FrequencyPolicy> {
        match self {
            ResolveError::Invalid(_) => None,
            ResolveError::Violation { corrected, .. } => Some(corrected),
        }
    }
}

fn summarize(violations: &[PolicyError]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors fetching the monitored resource
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Timed out after {timeout_seconds} seconds fetching {url}")]
    Timeout { url: String, timeout_seconds: u32 },

    #[error("I/O failure fetching {url}: {reason}")]
    Io { url: String, reason: String },
}

/// Fingerprint storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Filesystem error: {0}")]
    FileSystemError(String),

    #[error("Invalid job id for storage: '{0}'")]
    InvalidJobId(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::FileSystemError(err.to_string())
    }
}

/// Errors of a single poll cycle
#[derive(Error, Debug)]
pub enum PollError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl PollError {
    /// Short label used for logs and metrics
    pub fn reason(&self) -> &'static str {
        match self {
            PollError::Fetch(FetchError::Timeout { .. }) => "timeout",
            PollError::Fetch(FetchError::Io { .. }) => "io",
            PollError::Storage(_) => "storage",
        }
    }
}

/// Trigger scheduler errors
#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("Job '{job_id}' rejected: {source}")]
    Rejected {
        job_id: String,
        #[source]
        source: PolicyError,
    },

    #[error("Job not found: {0}")]
    JobNotFound(String),
}
