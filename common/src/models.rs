// Data models for job triggers and build requests

use crate::schedule::ScheduleSpec;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Raw per-job trigger configuration as received from the host.
///
/// Absent fields are resolved from the global frequency policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTriggerSettings {
    pub url: String,
    #[serde(default)]
    pub timeout_seconds: Option<u32>,
    #[serde(default)]
    pub schedule: Option<String>,
}

impl JobTriggerSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout_seconds: None,
            schedule: None,
        }
    }

    pub fn with_timeout(mut self, timeout_seconds: u32) -> Self {
        self.timeout_seconds = Some(timeout_seconds);
        self
    }

    pub fn with_schedule(mut self, schedule: impl Into<String>) -> Self {
        self.schedule = Some(schedule.into());
        self
    }
}

/// Validated job trigger configuration with every field resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTriggerConfig {
    pub url: Url,
    pub timeout_seconds: u32,
    pub schedule: ScheduleSpec,
}

/// Signal handed to the host when monitored content changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub url: String,
    pub timeout_seconds: u32,
    pub observed_at: DateTime<Utc>,
}

impl BuildRequest {
    pub fn new(config: &JobTriggerConfig, observed_at: DateTime<Utc>) -> Self {
        Self {
            url: config.url.to_string(),
            timeout_seconds: config.timeout_seconds,
            observed_at,
        }
    }
}

/// Result of one poll cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The fingerprint moved; the host should start a build
    Changed(BuildRequest),
    /// Same content as last time, or no digest could be computed
    Unchanged,
}

impl PollOutcome {
    pub fn is_changed(&self) -> bool {
        matches!(self, PollOutcome::Changed(_))
    }
}
