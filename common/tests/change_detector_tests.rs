// Integration tests for the HTTP change detector and file fingerprint store

use common::detector::{ChangeDetector, HttpChangeDetector};
use common::errors::{FetchError, PollError};
use common::models::{JobTriggerConfig, PollOutcome};
use common::scheduler::{run_cycle, ChannelBuildRequestSink};
use common::storage::{FileFingerprintStore, FingerprintStore};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FEED: &str = "<rss><channel><item>release 1.2.0</item></channel></rss>";

fn trigger_config(url: &str, timeout_seconds: u32) -> JobTriggerConfig {
    JobTriggerConfig {
        url: url.parse().unwrap(),
        timeout_seconds,
        schedule: "*/5 * * * *".parse().unwrap(),
    }
}

fn md5_hex(body: &str) -> String {
    format!("{:x}", md5::compute(body.as_bytes()))
}

async fn serve(body: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_first_poll_changed_then_unchanged() {
    let server = serve(FEED).await;
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileFingerprintStore::new(dir.path()));
    let detector = HttpChangeDetector::new(store.clone());
    let config = trigger_config(&format!("{}/feed.xml", server.uri()), 5);

    let first = detector.poll("nightly", &config).await.unwrap();
    match first {
        PollOutcome::Changed(request) => {
            assert_eq!(request.url, config.url.to_string());
            assert_eq!(request.timeout_seconds, 5);
        }
        PollOutcome::Unchanged => panic!("first poll against an empty store must report a change"),
    }

    let stored = store.load("nightly").await.unwrap().unwrap();
    assert_eq!(stored.as_str(), md5_hex(FEED));

    let second = detector.poll("nightly", &config).await.unwrap();
    assert_eq!(second, PollOutcome::Unchanged);
}

#[tokio::test]
async fn test_content_change_is_detected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string("version 1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string("version 2"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileFingerprintStore::new(dir.path()));
    let detector = HttpChangeDetector::new(store.clone());
    let config = trigger_config(&format!("{}/feed.xml", server.uri()), 5);

    assert!(detector.poll("nightly", &config).await.unwrap().is_changed());
    assert!(detector.poll("nightly", &config).await.unwrap().is_changed());
    assert_eq!(
        store.load("nightly").await.unwrap().unwrap().as_str(),
        md5_hex("version 2")
    );
}

#[tokio::test]
async fn test_uppercase_stored_digest_matches() {
    let server = serve(FEED).await;
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileFingerprintStore::new(dir.path()));
    store
        .save("nightly", &md5_hex(FEED).to_uppercase())
        .await
        .unwrap();

    let detector = HttpChangeDetector::new(store);
    let config = trigger_config(&format!("{}/feed.xml", server.uri()), 5);

    let outcome = detector.poll("nightly", &config).await.unwrap();
    assert_eq!(outcome, PollOutcome::Unchanged);
}

#[tokio::test]
async fn test_empty_body_is_unchanged_without_store_write() {
    let server = serve("").await;
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileFingerprintStore::new(dir.path()));
    let detector = HttpChangeDetector::new(store.clone());
    let config = trigger_config(&format!("{}/feed.xml", server.uri()), 5);

    let outcome = detector.poll("nightly", &config).await.unwrap();
    assert_eq!(outcome, PollOutcome::Unchanged);
    assert!(store.load("nightly").await.unwrap().is_none());
}

#[tokio::test]
async fn test_server_error_fails_cycle() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileFingerprintStore::new(dir.path()));
    let detector = HttpChangeDetector::new(store.clone());
    let config = trigger_config(&format!("{}/feed.xml", server.uri()), 5);

    let err = detector.poll("nightly", &config).await.unwrap_err();
    assert!(matches!(err, PollError::Fetch(FetchError::Io { .. })));
    assert_eq!(err.reason(), "io");
    assert!(store.load("nightly").await.unwrap().is_none());
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(FEED)
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileFingerprintStore::new(dir.path()));
    let detector = HttpChangeDetector::new(store.clone());
    let config = trigger_config(&format!("{}/feed.xml", server.uri()), 1);

    let err = detector.poll("nightly", &config).await.unwrap_err();
    assert!(
        matches!(err, PollError::Fetch(FetchError::Timeout { timeout_seconds: 1, .. })),
        "expected timeout, got {err:?}"
    );
    assert!(store.load("nightly").await.unwrap().is_none());
}

#[tokio::test]
async fn test_unreachable_host_leaves_fingerprint_untouched() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileFingerprintStore::new(dir.path()));
    store.save("nightly", &md5_hex(FEED)).await.unwrap();

    let detector = HttpChangeDetector::new(store.clone());
    let config = trigger_config("http://127.0.0.1:1/feed.xml", 1);
    let (sink, mut rx) = ChannelBuildRequestSink::new();

    let err = run_cycle("nightly", &config, &detector, &sink)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PollError::Fetch(FetchError::Io { .. } | FetchError::Timeout { .. })
    ));
    assert_eq!(
        store.load("nightly").await.unwrap().unwrap().as_str(),
        md5_hex(FEED)
    );
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_run_cycle_delivers_build_request() {
    let server = serve(FEED).await;
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileFingerprintStore::new(dir.path()));
    let detector = HttpChangeDetector::new(store);
    let config = trigger_config(&format!("{}/feed.xml", server.uri()), 5);
    let (sink, mut rx) = ChannelBuildRequestSink::new();

    run_cycle("nightly", &config, &detector, &sink).await.unwrap();
    run_cycle("nightly", &config, &detector, &sink).await.unwrap();

    let (job_id, request) = rx.try_recv().unwrap();
    assert_eq!(job_id, "nightly");
    assert_eq!(request.url, config.url.to_string());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_jobs_keep_separate_fingerprints() {
    let server = serve(FEED).await;
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileFingerprintStore::new(dir.path()));
    let detector = HttpChangeDetector::new(store);
    let config = trigger_config(&format!("{}/feed.xml", server.uri()), 5);

    assert!(detector.poll("nightly", &config).await.unwrap().is_changed());
    assert!(detector.poll("release", &config).await.unwrap().is_changed());
    assert!(!detector.poll("nightly", &config).await.unwrap().is_changed());
}
