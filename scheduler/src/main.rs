// URL change trigger binary entry point

use anyhow::{Context, Result};
use chrono::Utc;
use common::config::Settings;
use common::detector::HttpChangeDetector;
use common::errors::ResolveError;
use common::policy::PolicyStore;
use common::scheduler::{LogBuildRequestSink, TriggerScheduler};
use common::storage::file::FileFingerprintStore;
use common::telemetry;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load().context("Failed to load configuration")?;

    telemetry::init_logging(&settings.observability.log_level)
        .context("Failed to initialize logging")?;

    info!("Starting URL change trigger");

    settings
        .validate()
        .map_err(|e| anyhow::anyhow!(e))
        .context("Invalid configuration")?;
    let timezone = settings
        .timezone()
        .map_err(|e| anyhow::anyhow!(e))
        .context("Invalid configuration")?;

    info!(
        timezone = %timezone,
        fingerprint_dir = %settings.scheduler.fingerprint_dir.display(),
        jobs = settings.jobs.len(),
        "Configuration loaded"
    );

    if let Some(port) = settings.observability.metrics_port {
        telemetry::init_metrics(port).context("Failed to initialize metrics")?;
    }

    let policy = Arc::new(PolicyStore::default());
    let now = Utc::now().with_timezone(&timezone);
    match policy.reconfigure(&settings.policy, &now) {
        Ok(_) => info!("Frequency policy initialized"),
        Err(ResolveError::Violation { violations, .. }) => {
            for violation in &violations {
                error!(error = %violation, "Frequency policy violation, using clamped value");
            }
        }
        Err(e) => return Err(e).context("Invalid frequency policy"),
    }

    let store = Arc::new(FileFingerprintStore::new(
        settings.scheduler.fingerprint_dir.clone(),
    ));
    let detector = Arc::new(HttpChangeDetector::new(store));
    let scheduler = TriggerScheduler::new(
        policy,
        detector,
        Arc::new(LogBuildRequestSink),
        timezone,
    );

    for job in &settings.jobs {
        if let Err(e) = scheduler.start(&job.id, &job.trigger_settings()).await {
            error!(job_id = %job.id, error = %e, "Failed to start trigger job");
        }
    }

    let running = scheduler.jobs().await;
    if running.is_empty() {
        warn!("No trigger jobs running");
    } else {
        info!(jobs = ?running, "Trigger jobs running");
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C signal, initiating graceful shutdown");

    scheduler.shutdown().await;

    info!("URL change trigger stopped");
    Ok(())
}
