//! Scan session lifecycle: at-most-one scan, results snapshot, events,
//! and report files on disk.

use std::time::Duration;

use probely::{ScanEvent, ScanSession, ScannerBuilder, StartScanError, Technique};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

async fn vulnerable_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(|request: &Request| {
            let value = request
                .url
                .query_pairs()
                .find(|(key, _)| key == "id")
                .map(|(_, value)| value.into_owned())
                .unwrap_or_default();
            let body = if value.contains('\'') && !value.to_uppercase().contains("UNION") {
                "SQLSTATE[HY000]: General error: 1 near \"''\": syntax error"
            } else {
                "Hello"
            };
            ResponseTemplate::new(200).set_body_string(body)
        })
        .mount(&server)
        .await;
    server
}

async fn wait_until_idle(session: &ScanSession) {
    for _ in 0..600 {
        if !session.status() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("scan did not finish in time");
}

#[tokio::test]
async fn full_scan_updates_results_and_reports() {
    let server = vulnerable_server().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let session = ScanSession::new(dir.path());
    let mut events = session.subscribe();

    let config = ScannerBuilder::new()
        .with_delay(0.0)
        .with_max_retries(0)
        .with_quiet(true)
        .into_config();
    session
        .start_scan(&format!("{}/?id=1", server.uri()), config)
        .expect("scan starts");

    assert!(session.status());
    wait_until_idle(&session).await;

    let snapshot = session.results().await;
    assert!(snapshot.count >= 1);
    assert_eq!(snapshot.count, snapshot.results.len());
    assert!(snapshot.updated_at.is_some());
    assert!(snapshot
        .results
        .iter()
        .any(|finding| finding.technique == Technique::ErrorBased));

    assert!(dir.path().join("latest_scan.json").exists());
    let mut saw_update = false;
    while let Ok(event) = events.try_recv() {
        if event == ScanEvent::Update {
            saw_update = true;
        }
    }
    assert!(saw_update);
}

#[tokio::test]
async fn concurrent_scan_requests_are_rejected() {
    let server = vulnerable_server().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let session = ScanSession::new(dir.path());

    let config = ScannerBuilder::new()
        .with_delay(0.0)
        .with_max_retries(0)
        .with_quiet(true)
        .into_config();
    session
        .start_scan(&format!("{}/?id=1", server.uri()), config.clone())
        .expect("first scan starts");

    let second = session.start_scan(&format!("{}/?id=1", server.uri()), config);
    assert!(matches!(second, Err(StartScanError::Busy)));

    wait_until_idle(&session).await;

    // Once idle the slot opens again.
    let config = ScannerBuilder::new()
        .with_delay(0.0)
        .with_max_retries(0)
        .with_quiet(true)
        .into_config();
    session
        .start_scan(&format!("{}/?id=1", server.uri()), config)
        .expect("scan restarts after idle");
    wait_until_idle(&session).await;
}
