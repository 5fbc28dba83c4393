// Frequency policy: global minimum/default schedule and default/maximum timeout
//
// Administrators bound how often and how long a job may poll. Resolution fills
// in missing tiers from their siblings, clamps defaults that violate a bound,
// and still reports the violation so the administrator sees it.

use crate::errors::{PolicyError, ResolveError, ScheduleError};
use crate::models::{JobTriggerConfig, JobTriggerSettings};
use crate::schedule::ScheduleSpec;
use chrono::{DateTime, Duration, TimeZone};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// Administrative policy input; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyUpdate {
    #[serde(default)]
    pub default_schedule: Option<String>,
    #[serde(default)]
    pub min_schedule: Option<String>,
    #[serde(default)]
    pub default_timeout_seconds: Option<u32>,
    #[serde(default)]
    pub max_timeout_seconds: Option<u32>,
}

/// Resolved, internally consistent policy snapshot
#[derive(Debug, Clone, Default)]
pub struct FrequencyPolicy {
    pub min_schedule: Option<ScheduleSpec>,
    pub default_schedule: Option<ScheduleSpec>,
    /// Fire interval of `min_schedule` at resolution time
    pub min_interval: Option<Duration>,
    pub default_timeout_seconds: Option<u32>,
    pub max_timeout_seconds: Option<u32>,
}

/// Resolve an administrative update into a policy.
///
/// Returns `ResolveError::Violation` with the clamped policy when a default
/// exceeds its bound, and `ResolveError::Invalid` when the input cannot be
/// resolved at all.
pub fn resolve_policy<Z: TimeZone>(
    update: &PolicyUpdate,
    now: &DateTime<Z>,
) -> Result<FrequencyPolicy, ResolveError> {
    let min = parse_optional_schedule(update.min_schedule.as_deref())?;
    let default = parse_optional_schedule(update.default_schedule.as_deref())?;
    let default_timeout = positive(update.default_timeout_seconds, "Default timeout")?;
    let max_timeout = positive(update.max_timeout_seconds, "Maximum timeout")?;

    let mut violations = Vec::new();

    let (min_schedule, mut default_schedule) = inherit(min, default);
    let min_interval = match &min_schedule {
        Some(minimum) => Some(minimum.fire_interval(now).map_err(PolicyError::from)?),
        None => None,
    };

    let default_too_frequent = match (&default_schedule, min_interval) {
        (Some(default), Some(floor)) => {
            is_less_frequent_than(default, floor, now).map_err(PolicyError::from)?
        }
        _ => false,
    };
    if default_too_frequent {
        if let (Some(default), Some(minimum)) = (&default_schedule, &min_schedule) {
            violations.push(PolicyError::DefaultScheduleTooFrequent {
                default: default.to_string(),
                minimum: minimum.to_string(),
            });
        }
        default_schedule = min_schedule.clone();
    }

    let (mut default_timeout_seconds, max_timeout_seconds) = inherit(default_timeout, max_timeout);
    if let (Some(default), Some(max)) = (default_timeout_seconds, max_timeout_seconds) {
        if default > max {
            violations.push(PolicyError::DefaultTimeoutExceedsMax { default, max });
            default_timeout_seconds = Some(max);
        }
    }

    let policy = FrequencyPolicy {
        min_schedule,
        default_schedule,
        min_interval,
        default_timeout_seconds,
        max_timeout_seconds,
    };

    if violations.is_empty() {
        Ok(policy)
    } else {
        Err(ResolveError::Violation {
            corrected: Box::new(policy),
            violations,
        })
    }
}

/// Whether `candidate` fires more often than the floor permits.
///
/// True iff `min_interval` is strictly greater than the candidate's fire
/// interval around `reference`, i.e. the schedule is forbidden as too frequent.
pub fn is_less_frequent_than<Z: TimeZone>(
    candidate: &ScheduleSpec,
    min_interval: Duration,
    reference: &DateTime<Z>,
) -> Result<bool, ScheduleError> {
    let interval = candidate.fire_interval(reference)?;
    Ok(min_interval > interval)
}

/// Validate a job's trigger settings against a policy snapshot
pub fn validate_job_config<Z: TimeZone>(
    settings: &JobTriggerSettings,
    policy: &FrequencyPolicy,
    now: &DateTime<Z>,
) -> Result<JobTriggerConfig, PolicyError> {
    let url = parse_url(&settings.url)?;

    let timeout_seconds = match positive(settings.timeout_seconds, "Timeout")? {
        Some(timeout) => timeout,
        None => policy
            .default_timeout_seconds
            .ok_or(PolicyError::MissingTimeout)?,
    };
    if let Some(max) = policy.max_timeout_seconds {
        if timeout_seconds > max {
            return Err(PolicyError::TimeoutExceedsMax {
                timeout: timeout_seconds,
                max,
            });
        }
    }

    let schedule = match parse_optional_schedule(settings.schedule.as_deref())? {
        Some(schedule) => schedule,
        None => policy
            .default_schedule
            .clone()
            .ok_or(PolicyError::MissingSchedule)?,
    };
    if let (Some(floor), Some(minimum)) = (policy.min_interval, &policy.min_schedule) {
        if is_less_frequent_than(&schedule, floor, now)? {
            return Err(PolicyError::ScheduleTooFrequent {
                schedule: schedule.to_string(),
                minimum: minimum.to_string(),
            });
        }
    }

    Ok(JobTriggerConfig {
        url,
        timeout_seconds,
        schedule,
    })
}

/// Process-wide policy holder.
///
/// Readers clone the current `Arc` snapshot; reconfiguration swaps in a new
/// snapshot in one step, so a validation never observes a partial update.
#[derive(Debug, Default)]
pub struct PolicyStore {
    current: RwLock<Arc<FrequencyPolicy>>,
}

impl PolicyStore {
    pub fn new(policy: FrequencyPolicy) -> Self {
        Self {
            current: RwLock::new(Arc::new(policy)),
        }
    }

    /// Current policy snapshot
    pub fn snapshot(&self) -> Arc<FrequencyPolicy> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Replace the policy wholesale
    pub fn replace(&self, policy: FrequencyPolicy) -> Arc<FrequencyPolicy> {
        let policy = Arc::new(policy);
        match self.current.write() {
            Ok(mut guard) => *guard = Arc::clone(&policy),
            Err(poisoned) => *poisoned.into_inner() = Arc::clone(&policy),
        }
        policy
    }

    /// Resolve `update` and install the result.
    ///
    /// On a bounds violation the clamped policy is installed and the
    /// violation is still returned. Invalid input leaves the current policy
    /// untouched.
    pub fn reconfigure<Z: TimeZone>(
        &self,
        update: &PolicyUpdate,
        now: &DateTime<Z>,
    ) -> Result<Arc<FrequencyPolicy>, ResolveError> {
        match resolve_policy(update, now) {
            Ok(policy) => {
                info!(?update, "Frequency policy updated");
                Ok(self.replace(policy))
            }
            Err(ResolveError::Violation {
                corrected,
                violations,
            }) => {
                warn!(
                    ?update,
                    violations = violations.len(),
                    "Frequency policy out of bounds, installing clamped values"
                );
                self.replace((*corrected).clone());
                Err(ResolveError::Violation {
                    corrected,
                    violations,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Validate job settings against the current snapshot
    pub fn validate_job<Z: TimeZone>(
        &self,
        settings: &JobTriggerSettings,
        now: &DateTime<Z>,
    ) -> Result<JobTriggerConfig, PolicyError> {
        validate_job_config(settings, &self.snapshot(), now)
    }
}

fn inherit<T: Clone>(first: Option<T>, second: Option<T>) -> (Option<T>, Option<T>) {
    match (first, second) {
        (Some(first), None) => (Some(first.clone()), Some(first)),
        (None, Some(second)) => (Some(second.clone()), Some(second)),
        pair => pair,
    }
}

fn parse_optional_schedule(text: Option<&str>) -> Result<Option<ScheduleSpec>, PolicyError> {
    match text.map(str::trim).filter(|t| !t.is_empty()) {
        Some(expression) => Ok(Some(ScheduleSpec::parse(expression)?)),
        None => Ok(None),
    }
}

fn positive(value: Option<u32>, field: &'static str) -> Result<Option<u32>, PolicyError> {
    match value {
        Some(0) => Err(PolicyError::InvalidTimeout { field }),
        other => Ok(other),
    }
}

fn parse_url(text: &str) -> Result<Url, PolicyError> {
    let url = Url::parse(text.trim()).map_err(|e| PolicyError::InvalidUrl {
        url: text.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(PolicyError::InvalidUrl {
            url: text.to_string(),
            reason: format!("unsupported scheme '{}'", scheme),
        }),
    }
}
