// Build request sinks: where detected changes are handed to the host

use crate::models::BuildRequest;
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Host boundary for build requests
#[async_trait]
pub trait BuildRequestSink: Send + Sync {
    /// Hand a build request for `job_id` to the host
    async fn submit(&self, job_id: &str, request: BuildRequest) -> Result<()>;
}

/// Sink that only writes a structured log line
pub struct LogBuildRequestSink;

#[async_trait]
impl BuildRequestSink for LogBuildRequestSink {
    #[tracing::instrument(skip(self, request))]
    async fn submit(&self, job_id: &str, request: BuildRequest) -> Result<()> {
        tracing::info!(
            job_id = job_id,
            url = %request.url,
            timeout_seconds = request.timeout_seconds,
            observed_at = %request.observed_at,
            "Build requested: monitored content changed"
        );
        Ok(())
    }
}

/// Sink forwarding build requests over an unbounded tokio channel
pub struct ChannelBuildRequestSink {
    tx: mpsc::UnboundedSender<(String, BuildRequest)>,
}

impl ChannelBuildRequestSink {
    /// Create the sink together with the receiving end
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, BuildRequest)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl BuildRequestSink for ChannelBuildRequestSink {
    async fn submit(&self, job_id: &str, request: BuildRequest) -> Result<()> {
        self.tx
            .send((job_id.to_string(), request))
            .map_err(|_| anyhow::anyhow!("Build request receiver dropped"))
    }
}
