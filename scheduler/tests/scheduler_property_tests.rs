// Property-based tests for the trigger scheduler as wired by the binary

use chrono::Utc;
use common::config::{JobSettings, Settings};
use common::detector::HttpChangeDetector;
use common::policy::PolicyStore;
use common::scheduler::{ChannelBuildRequestSink, TriggerScheduler};
use common::storage::InMemoryFingerprintStore;
use proptest::prelude::*;
use std::sync::Arc;

fn scheduler_for(settings: &Settings) -> (TriggerScheduler, Arc<PolicyStore>) {
    let timezone = settings.timezone().unwrap();
    let policy = Arc::new(PolicyStore::default());
    policy
        .reconfigure(&settings.policy, &Utc::now().with_timezone(&timezone))
        .unwrap();

    let detector = Arc::new(HttpChangeDetector::new(Arc::new(InMemoryFingerprintStore::new())));
    let (sink, _rx) = ChannelBuildRequestSink::new();
    let scheduler = TriggerScheduler::new(policy.clone(), detector, Arc::new(sink), timezone);
    (scheduler, policy)
}

fn settings_with_jobs(count: usize) -> Settings {
    let mut settings = Settings::default();
    settings.policy.default_schedule = Some("0 3 * * *".to_string());
    settings.policy.min_schedule = Some("*/5 * * * *".to_string());
    settings.policy.default_timeout_seconds = Some(30);
    settings.policy.max_timeout_seconds = Some(60);
    settings.jobs = (0..count)
        .map(|i| JobSettings {
            id: format!("job-{}", i),
            url: format!("https://example.com/feeds/{}.xml", i),
            timeout_seconds: None,
            schedule: None,
        })
        .collect();
    settings
}

/// Property: scheduler graceful shutdown
///
/// *For any* set of configured jobs, shutdown stops every job loop and leaves
/// nothing registered.
#[test]
fn property_scheduler_graceful_shutdown() {
    proptest!(ProptestConfig::with_cases(16), |(count in 0usize..8)| {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let settings = settings_with_jobs(count);
            prop_assert!(settings.validate().is_ok());
            let (scheduler, _) = scheduler_for(&settings);

            for job in &settings.jobs {
                scheduler.start(&job.id, &job.trigger_settings()).await.unwrap();
            }
            prop_assert_eq!(scheduler.jobs().await.len(), count);

            scheduler.shutdown().await;
            prop_assert!(scheduler.jobs().await.is_empty());
            Ok(())
        })?;
    });
}

/// Property: configured jobs inherit the policy defaults
///
/// *For any* job timeout within the maximum, the effective configuration keeps
/// it; jobs without one get the default.
#[test]
fn property_jobs_resolve_against_policy() {
    proptest!(ProptestConfig::with_cases(32), |(timeout in proptest::option::of(1u32..=60))| {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let mut settings = settings_with_jobs(1);
            settings.jobs[0].timeout_seconds = timeout;
            let (scheduler, _) = scheduler_for(&settings);

            let job = &settings.jobs[0];
            let config = scheduler.start(&job.id, &job.trigger_settings()).await.unwrap();
            prop_assert_eq!(config.timeout_seconds, timeout.unwrap_or(30));
            prop_assert_eq!(config.schedule.expression(), "0 3 * * *");

            scheduler.shutdown().await;
            Ok(())
        })?;
    });
}

/// Starting jobs after a policy tightening uses the new snapshot
#[tokio::test]
async fn test_policy_reconfiguration_applies_to_new_jobs() {
    let settings = settings_with_jobs(1);
    let (scheduler, policy) = scheduler_for(&settings);
    let job = settings.jobs[0].trigger_settings().with_schedule("*/10 * * * *");

    assert!(scheduler.start("job-0", &job).await.is_ok());

    let mut tightened = settings.policy.clone();
    tightened.min_schedule = Some("0 * * * *".to_string());
    policy.reconfigure(&tightened, &Utc::now()).unwrap();

    assert!(scheduler.start("job-1", &job).await.is_err());
    assert_eq!(scheduler.jobs().await, vec!["job-0".to_string()]);

    scheduler.shutdown().await;
}
