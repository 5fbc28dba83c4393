// Trigger scheduler engine
//
// Every registered job owns one tokio task running a sequential loop: compute
// the next fire time, wait for it or for the stop signal, then poll once.
// Ticks that pass while a poll is running are skipped, never queued.

use crate::detector::ChangeDetector;
use crate::errors::{PolicyError, PollError, TriggerError};
use crate::models::{JobTriggerConfig, JobTriggerSettings, PollOutcome};
use crate::policy::PolicyStore;
use crate::scheduler::sink::BuildRequestSink;
use crate::telemetry;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

struct JobHandle {
    config: JobTriggerConfig,
    generation: u64,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Registry {
    jobs: HashMap<String, JobHandle>,
    /// Per-job in-flight guards; a restarted job shares its predecessor's
    /// guard until every loop holding it has exited
    guards: HashMap<String, Arc<Mutex<()>>>,
    next_generation: u64,
}

impl Registry {
    /// Drop guards that no registered job or running loop still holds
    fn prune_guards(&mut self) {
        let Registry { jobs, guards, .. } = self;
        guards.retain(|id, guard| jobs.contains_key(id) || Arc::strong_count(guard) > 1);
    }
}

/// Drives change detection for every registered job
pub struct TriggerScheduler {
    policy: Arc<PolicyStore>,
    detector: Arc<dyn ChangeDetector>,
    sink: Arc<dyn BuildRequestSink>,
    timezone: Tz,
    registry: Arc<Mutex<Registry>>,
}

impl TriggerScheduler {
    /// Create a scheduler evaluating schedules in `timezone`
    pub fn new(
        policy: Arc<PolicyStore>,
        detector: Arc<dyn ChangeDetector>,
        sink: Arc<dyn BuildRequestSink>,
        timezone: Tz,
    ) -> Self {
        Self {
            policy,
            detector,
            sink,
            timezone,
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    /// Validate `settings` against the current policy and start polling.
    ///
    /// Starting a job id that is already registered replaces it. Returns the
    /// effective configuration.
    #[instrument(skip(self, settings), fields(url = %settings.url))]
    pub async fn start(
        &self,
        job_id: &str,
        settings: &JobTriggerSettings,
    ) -> Result<JobTriggerConfig, TriggerError> {
        let now = Utc::now().with_timezone(&self.timezone);
        let rejected = |source: PolicyError| TriggerError::Rejected {
            job_id: job_id.to_string(),
            source,
        };

        let config = self
            .policy
            .validate_job(settings, &now)
            .map_err(rejected)?;
        let first_fire = config
            .schedule
            .next_fire(&now)
            .map_err(|e| rejected(e.into()))?;

        if let Some(warning) = config.schedule.check_sanity() {
            warn!(schedule = %config.schedule, warning = %warning, "Suspicious schedule");
        }

        let mut registry = self.registry.lock().await;
        self.spawn_job(&mut registry, job_id, config.clone());

        info!(
            schedule = %config.schedule,
            timeout_seconds = config.timeout_seconds,
            first_fire = %first_fire,
            "Trigger job started"
        );
        Ok(config)
    }

    /// Register `config` under `job_id` and spawn its loop, replacing any
    /// job already registered under that id
    fn spawn_job(&self, registry: &mut Registry, job_id: &str, config: JobTriggerConfig) {
        if let Some(previous) = registry.jobs.remove(job_id) {
            info!("Replacing running trigger job");
            let _ = previous.shutdown_tx.send(());
        }

        registry.next_generation += 1;
        let generation = registry.next_generation;
        let in_flight = Arc::clone(registry.guards.entry(job_id.to_string()).or_default());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let job = JobLoop {
            job_id: job_id.to_string(),
            generation,
            config: config.clone(),
            timezone: self.timezone,
            detector: Arc::clone(&self.detector),
            sink: Arc::clone(&self.sink),
            in_flight,
            registry: Arc::clone(&self.registry),
        };
        let task = tokio::spawn(job.run(shutdown_rx));

        registry.jobs.insert(
            job_id.to_string(),
            JobHandle {
                config,
                generation,
                shutdown_tx,
                task,
            },
        );
        telemetry::update_active_jobs(registry.jobs.len());
    }

    /// Deregister a job.
    ///
    /// Interrupts the wait between ticks; a poll already running finishes on
    /// its own.
    #[instrument(skip(self))]
    pub async fn stop(&self, job_id: &str) -> Result<(), TriggerError> {
        let mut registry = self.registry.lock().await;
        let handle = registry
            .jobs
            .remove(job_id)
            .ok_or_else(|| TriggerError::JobNotFound(job_id.to_string()))?;
        let _ = handle.shutdown_tx.send(());
        telemetry::update_active_jobs(registry.jobs.len());

        info!("Trigger job stopped");
        Ok(())
    }

    /// Stop every job and wait for their loops to exit
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        let handles: Vec<(String, JobHandle)> = {
            let mut registry = self.registry.lock().await;
            registry.jobs.drain().collect()
        };
        telemetry::update_active_jobs(0);

        info!(jobs = handles.len(), "Shutting down trigger scheduler");

        for (_, handle) in &handles {
            let _ = handle.shutdown_tx.send(());
        }
        for (job_id, handle) in handles {
            if let Err(e) = handle.task.await {
                error!(job_id = %job_id, error = %e, "Trigger job task failed");
            }
        }

        info!("Trigger scheduler stopped");
    }

    /// Ids of registered jobs, sorted
    pub async fn jobs(&self) -> Vec<String> {
        let registry = self.registry.lock().await;
        let mut ids: Vec<String> = registry.jobs.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Effective configuration of a registered job
    pub async fn config(&self, job_id: &str) -> Option<JobTriggerConfig> {
        let registry = self.registry.lock().await;
        registry.jobs.get(job_id).map(|handle| handle.config.clone())
    }
}

struct JobLoop {
    job_id: String,
    generation: u64,
    config: JobTriggerConfig,
    timezone: Tz,
    detector: Arc<dyn ChangeDetector>,
    sink: Arc<dyn BuildRequestSink>,
    in_flight: Arc<Mutex<()>>,
    registry: Arc<Mutex<Registry>>,
}

impl JobLoop {
    #[instrument(skip_all, fields(job_id = %self.job_id))]
    async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut last_fire: Option<DateTime<Utc>> = None;
        let mut exhausted = false;

        loop {
            // Never fire the same instant twice if the wall clock lags the timer
            let now = Utc::now();
            let from = last_fire.map_or(now, |fired| fired.max(now));

            let next = match self
                .config
                .schedule
                .next_fire(&from.with_timezone(&self.timezone))
            {
                Ok(next) => next.with_timezone(&Utc),
                Err(e) => {
                    warn!(error = %e, "Schedule has no further fire time, ending trigger job");
                    exhausted = true;
                    break;
                }
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            debug!(next_fire = %next, wait_seconds = wait.as_secs(), "Waiting for next fire");

            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    debug!("Shutdown signal received");
                    break;
                }
                _ = sleep(wait) => {}
            }
            last_fire = Some(next);

            let Ok(_guard) = self.in_flight.try_lock() else {
                debug!("Previous poll still running, skipping tick");
                continue;
            };
            let _ = run_cycle(
                &self.job_id,
                &self.config,
                self.detector.as_ref(),
                self.sink.as_ref(),
            )
            .await;
        }

        let JobLoop {
            job_id,
            generation,
            in_flight,
            registry,
            ..
        } = self;
        drop(in_flight);

        let mut registry = registry.lock().await;
        // A replacement registered under the same id keeps running
        let current = registry
            .jobs
            .get(&job_id)
            .is_some_and(|handle| handle.generation == generation);
        if exhausted && current {
            registry.jobs.remove(&job_id);
            telemetry::update_active_jobs(registry.jobs.len());
            info!("Trigger job deregistered");
        }
        registry.prune_guards();

        debug!("Trigger job loop exited");
    }
}

/// Run one poll cycle and route its outcome.
///
/// `Changed` goes to the sink, `Unchanged` is only logged, and errors are
/// logged and counted before being returned.
#[instrument(skip(config, detector, sink), fields(url = %config.url))]
pub async fn run_cycle(
    job_id: &str,
    config: &JobTriggerConfig,
    detector: &dyn ChangeDetector,
    sink: &dyn BuildRequestSink,
) -> Result<PollOutcome, PollError> {
    let started = Instant::now();
    let result = detector.poll(job_id, config).await;
    telemetry::record_poll_duration(job_id, started.elapsed().as_secs_f64());

    match &result {
        Ok(PollOutcome::Changed(request)) => {
            telemetry::record_poll_outcome(job_id, "changed");
            telemetry::record_change_detected(job_id);
            info!("Changes detected, requesting build");

            if let Err(e) = sink.submit(job_id, request.clone()).await {
                error!(error = %e, "Failed to submit build request");
            }
        }
        Ok(PollOutcome::Unchanged) => {
            telemetry::record_poll_outcome(job_id, "unchanged");
            debug!("No changes detected");
        }
        Err(e) => {
            telemetry::record_poll_failure(job_id, e.reason());
            error!(error = %e, reason = e.reason(), "Poll cycle failed");
        }
    }

    result
}
