// Telemetry module for structured logging and metrics

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize structured logging with JSON formatting
///
/// `RUST_LOG` wins over `log_level` when set.
#[tracing::instrument(skip_all)]
pub fn init_logging(log_level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_target(true)
        .with_thread_names(true)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(json_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;

    tracing::info!(
        log_level = log_level,
        "Structured logging initialized with JSON formatting"
    );

    Ok(())
}

/// Initialize Prometheus metrics exporter
///
/// Registers:
/// - url_poll_total: poll cycles by outcome
/// - url_change_detected_total: build requests emitted
/// - url_poll_failed_total: failed poll cycles by reason
/// - url_poll_duration_seconds: poll cycle duration
/// - url_trigger_jobs_active: registered trigger jobs
#[tracing::instrument(skip_all)]
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!("url_poll_total", "Total number of URL poll cycles");
    describe_counter!(
        "url_change_detected_total",
        "Total number of content changes that produced a build request"
    );
    describe_counter!("url_poll_failed_total", "Total number of failed URL poll cycles");
    describe_histogram!(
        "url_poll_duration_seconds",
        "Duration of URL poll cycles in seconds"
    );
    describe_gauge!("url_trigger_jobs_active", "Number of registered trigger jobs");

    tracing::info!(
        metrics_port = metrics_port,
        metrics_endpoint = format!("http://0.0.0.0:{}/metrics", metrics_port),
        "Prometheus metrics exporter initialized"
    );

    Ok(())
}

/// Count a completed poll cycle; `outcome` is `changed` or `unchanged`
#[inline]
pub fn record_poll_outcome(job_id: &str, outcome: &'static str) {
    counter!("url_poll_total", "job_id" => job_id.to_string(), "outcome" => outcome).increment(1);
}

#[inline]
pub fn record_change_detected(job_id: &str) {
    counter!("url_change_detected_total", "job_id" => job_id.to_string()).increment(1);
}

/// Count a failed poll cycle
#[inline]
pub fn record_poll_failure(job_id: &str, reason: &'static str) {
    counter!(
        "url_poll_failed_total",
        "job_id" => job_id.to_string(),
        "reason" => reason
    )
    .increment(1);
}

#[inline]
pub fn record_poll_duration(job_id: &str, duration_seconds: f64) {
    histogram!("url_poll_duration_seconds", "job_id" => job_id.to_string())
        .record(duration_seconds);
}

#[inline]
pub fn update_active_jobs(count: usize) {
    gauge!("url_trigger_jobs_active").set(count as f64);
}
