// Configuration management with layered configuration (file, env)

use crate::models::JobTriggerSettings;
use crate::policy::PolicyUpdate;
use chrono_tz::Tz;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub scheduler: SchedulerSettings,
    pub policy: PolicyUpdate,
    pub observability: ObservabilitySettings,
    pub jobs: Vec<JobSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// IANA time zone schedules are evaluated in
    pub timezone: String,
    /// Directory holding one fingerprint subdirectory per job
    pub fingerprint_dir: PathBuf,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            fingerprint_dir: PathBuf::from("data/fingerprints"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilitySettings {
    pub log_level: String,
    pub metrics_port: Option<u16>,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_port: None,
        }
    }
}

/// A trigger job declared in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSettings {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub timeout_seconds: Option<u32>,
    #[serde(default)]
    pub schedule: Option<String>,
}

impl JobSettings {
    pub fn trigger_settings(&self) -> JobTriggerSettings {
        JobTriggerSettings {
            url: self.url.clone(),
            timeout_seconds: self.timeout_seconds,
            schedule: self.schedule.clone(),
        }
    }
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Local overrides, not committed to git
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Time zone schedules are evaluated in
    pub fn timezone(&self) -> Result<Tz, String> {
        self.scheduler
            .timezone
            .parse::<Tz>()
            .map_err(|e| format!("Invalid scheduler timezone '{}': {}", self.scheduler.timezone, e))
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.scheduler.fingerprint_dir.as_os_str().is_empty() {
            return Err("Scheduler fingerprint_dir cannot be empty".to_string());
        }
        self.timezone()?;

        if self.observability.log_level.trim().is_empty() {
            return Err("Log level cannot be empty".to_string());
        }
        if self.observability.metrics_port == Some(0) {
            return Err("Metrics port must be greater than 0".to_string());
        }

        let mut seen = HashSet::new();
        for job in &self.jobs {
            if job.id.trim().is_empty() {
                return Err(format!("Job id cannot be empty (url: {})", job.url));
            }
            if !seen.insert(job.id.as_str()) {
                return Err(format!("Duplicate job id: {}", job.id));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn job(id: &str) -> JobSettings {
        JobSettings {
            id: id.to_string(),
            url: "http://example.com/feed".to_string(),
            timeout_seconds: None,
            schedule: None,
        }
    }

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.timezone().unwrap(), chrono_tz::UTC);
    }

    #[test]
    fn test_validation_catches_unknown_timezone() {
        let mut settings = Settings::default();
        settings.scheduler.timezone = "Mars/Olympus_Mons".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_empty_fingerprint_dir() {
        let mut settings = Settings::default();
        settings.scheduler.fingerprint_dir = PathBuf::new();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_duplicate_job_ids() {
        let mut settings = Settings::default();
        settings.jobs = vec![job("nightly"), job("nightly")];
        let err = settings.validate().unwrap_err();
        assert!(err.contains("nightly"));
    }

    #[test]
    fn test_validation_catches_blank_job_id() {
        let mut settings = Settings::default();
        settings.jobs = vec![job("  ")];
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_job_settings_to_trigger_settings() {
        let mut job = job("nightly");
        job.schedule = Some("*/15 * * * *".to_string());
        job.timeout_seconds = Some(20);

        let trigger = job.trigger_settings();
        assert_eq!(trigger.url, "http://example.com/feed");
        assert_eq!(trigger.timeout_seconds, Some(20));
        assert_eq!(trigger.schedule.as_deref(), Some("*/15 * * * *"));
    }

    #[test]
    fn test_load_from_path_reads_default_toml() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            r#"
[scheduler]
timezone = "Europe/Berlin"
fingerprint_dir = "/var/lib/url-trigger"

[policy]
default_schedule = "*/15 * * * *"
min_schedule = "*/5 * * * *"
default_timeout_seconds = 30
max_timeout_seconds = 120

[[jobs]]
id = "nightly"
url = "https://example.com/feed.xml"
schedule = "0 2 * * *"
"#,
        )
        .unwrap();

        let settings = Settings::load_from_path(dir.path()).unwrap();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.timezone().unwrap(), chrono_tz::Europe::Berlin);
        assert_eq!(
            settings.scheduler.fingerprint_dir,
            PathBuf::from("/var/lib/url-trigger")
        );
        assert_eq!(settings.policy.min_schedule.as_deref(), Some("*/5 * * * *"));
        assert_eq!(settings.policy.max_timeout_seconds, Some(120));
        assert_eq!(settings.observability.log_level, "info");
        assert_eq!(settings.jobs.len(), 1);
        assert_eq!(settings.jobs[0].schedule.as_deref(), Some("0 2 * * *"));
        assert_eq!(settings.jobs[0].timeout_seconds, None);
    }

    #[test]
    fn test_local_toml_overrides_default() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            "[observability]\nlog_level = \"info\"\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("local.toml"),
            "[observability]\nlog_level = \"debug\"\nmetrics_port = 9100\n",
        )
        .unwrap();

        let settings = Settings::load_from_path(dir.path()).unwrap();
        assert_eq!(settings.observability.log_level, "debug");
        assert_eq!(settings.observability.metrics_port, Some(9100));
    }
}
