// HTTP change detector: timed fetch, streaming MD5 digest, fingerprint compare

use crate::detector::ChangeDetector;
use crate::errors::{FetchError, PollError};
use crate::models::{BuildRequest, JobTriggerConfig, PollOutcome};
use crate::storage::{Fingerprint, FingerprintStore};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Url};
use std::error::Error as _;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Polls HTTP(S) resources and persists their fingerprints
pub struct HttpChangeDetector {
    store: Arc<dyn FingerprintStore>,
}

impl HttpChangeDetector {
    pub fn new(store: Arc<dyn FingerprintStore>) -> Self {
        Self { store }
    }

    /// Client whose connect and per-read timeouts both equal the job timeout
    fn build_client(url: &Url, timeout_seconds: u32) -> Result<Client, FetchError> {
        let timeout = Duration::from_secs(u64::from(timeout_seconds));
        Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(|e| FetchError::Io {
                url: url.to_string(),
                reason: format!("Failed to create HTTP client: {}", error_chain(&e)),
            })
    }

    /// Fetch `url` and digest the full body.
    ///
    /// Returns `Ok(None)` when the body is empty and no digest exists.
    #[instrument(skip(self, url), fields(url = %url))]
    pub async fn fetch_digest(
        &self,
        url: &Url,
        timeout_seconds: u32,
    ) -> Result<Option<String>, FetchError> {
        let client = Self::build_client(url, timeout_seconds)?;

        let mut response = client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| classify(url, timeout_seconds, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Io {
                url: url.to_string(),
                reason: format!("server returned HTTP {}", status),
            });
        }

        let mut context = md5::Context::new();
        let mut length = 0usize;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| classify(url, timeout_seconds, e))?
        {
            length += chunk.len();
            context.consume(&chunk);
        }

        if length == 0 {
            debug!("Empty response body, no digest");
            return Ok(None);
        }

        let digest = format!("{:x}", context.compute());
        debug!(bytes = length, digest = %digest, "Response digested");
        Ok(Some(digest))
    }
}

#[async_trait]
impl ChangeDetector for HttpChangeDetector {
    #[instrument(skip(self, config), fields(url = %config.url, timeout_seconds = config.timeout_seconds))]
    async fn poll(&self, job_id: &str, config: &JobTriggerConfig) -> Result<PollOutcome, PollError> {
        info!("Processing URL");

        let Some(current) = self
            .fetch_digest(&config.url, config.timeout_seconds)
            .await?
        else {
            return Ok(PollOutcome::Unchanged);
        };

        let previous = self
            .store
            .load(job_id)
            .await?
            .unwrap_or_else(Fingerprint::missing);

        if previous.matches(&current) {
            debug!(digest = %current, "Content unchanged");
            return Ok(PollOutcome::Unchanged);
        }

        debug!(previous = %previous, current = %current, "Differences found");
        self.store.save(job_id, &current).await?;

        Ok(PollOutcome::Changed(BuildRequest::new(config, Utc::now())))
    }
}

/// Map a transport error onto timeout vs. other I/O failure
fn classify(url: &Url, timeout_seconds: u32, err: reqwest::Error) -> FetchError {
    if is_timeout(&err) {
        FetchError::Timeout {
            url: url.to_string(),
            timeout_seconds,
        }
    } else {
        FetchError::Io {
            url: url.to_string(),
            reason: error_chain(&err),
        }
    }
}

fn is_timeout(err: &reqwest::Error) -> bool {
    if err.is_timeout() {
        return true;
    }
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::TimedOut {
                return true;
            }
        }
        source = cause.source();
    }
    false
}

fn error_chain(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
