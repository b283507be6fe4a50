//! Connection lifecycle integration tests.
//!
//! These tests run batches end to end through the embedded queue backend
//! and the reqwest fetcher against a local axum server:
//! connect -> send (push, execute, poll, reorder) -> close

use std::net::TcpListener as StdTcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Path;
use axum::http::{Method, StatusCode};
use axum::routing::{any, get};
use axum::Router;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_test::{assert_err, assert_ok};

use fetchfleet_core::{
    CapacityError, CapacityReservation, CapacityService, Connection, ConnectionConfig,
    ConnectionError, FailureKind, HttpConfig, LocalQueueService, QueueService, Request,
    ReqwestFetcher, ReservationSpec,
};

/// Local HTTP server the fetch jobs talk to.
struct TestServer {
    base: String,
    handle: JoinHandle<()>,
}

impl TestServer {
    async fn start() -> Self {
        let app = Router::new()
            .route("/status/{code}", get(status))
            .route("/slow", get(slow))
            .route("/echo", any(echo));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base: format!("http://{}", addr),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn status(Path(code): Path<u16>) -> (StatusCode, String) {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST);
    (status, format!("status {}", code))
}

async fn slow() -> &'static str {
    tokio::time::sleep(Duration::from_secs(3)).await;
    "finally"
}

async fn echo(method: Method, body: String) -> String {
    format!("{} {}", method, body)
}

fn closed_port_url() -> String {
    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}/", port)
}

/// Joins the error domains a reserved batch can fail in.
#[derive(Debug)]
#[allow(dead_code)]
enum BatchError {
    Capacity(CapacityError),
    Connection(ConnectionError),
}

impl From<CapacityError> for BatchError {
    fn from(e: CapacityError) -> Self {
        BatchError::Capacity(e)
    }
}

impl From<ConnectionError> for BatchError {
    fn from(e: ConnectionError) -> Self {
        BatchError::Connection(e)
    }
}

/// Test helper wiring a connection to the embedded backend.
struct TestHarness {
    service: Arc<LocalQueueService>,
    connection: Connection,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_config(ConnectionConfig {
            max_parallel_jobs: 4,
            poll_interval_ms: 5,
            info_check_every: 2,
            ..Default::default()
        })
    }

    fn with_config(config: ConnectionConfig) -> Self {
        let service = Arc::new(LocalQueueService::new());
        let fetcher = Arc::new(
            ReqwestFetcher::new(HttpConfig {
                timeout_secs: 10,
                ..Default::default()
            })
            .expect("Failed to create fetcher"),
        );
        let connection = Connection::new(config, service.clone(), fetcher);
        Self {
            service,
            connection,
        }
    }
}

#[tokio::test]
async fn test_batch_results_follow_input_order() {
    let server = TestServer::start().await;
    let harness = TestHarness::new();
    harness.connection.connect().await.unwrap();

    let codes: Vec<u16> = vec![200, 404, 201, 500, 200, 204, 418, 200, 302, 200, 503, 200];
    let urls: Vec<String> = codes
        .iter()
        .map(|code| server.url(&format!("/status/{}", code)))
        .collect();

    let results = harness.connection.send(&urls).await.unwrap();

    assert_eq!(results.len(), codes.len());
    for (code, result) in codes.iter().zip(&results) {
        let response = result.as_ref().unwrap().as_response().unwrap();
        assert_eq!(response.status_code, *code);
    }
    harness.connection.close().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_batches_on_one_connection() {
    let server = TestServer::start().await;
    let harness = TestHarness::new();
    harness.connection.connect().await.unwrap();

    let ok_codes: Vec<u16> = (200..220).collect();
    let error_codes: Vec<u16> = (400..420).collect();
    let to_urls = |codes: &[u16]| -> Vec<String> {
        codes
            .iter()
            .map(|code| server.url(&format!("/status/{}", code)))
            .collect()
    };
    let (ok_urls, error_urls) = (to_urls(&ok_codes), to_urls(&error_codes));

    let (ok_results, error_results) = tokio::join!(
        harness.connection.send(&ok_urls),
        harness.connection.send(&error_urls)
    );

    for (codes, results) in [(&ok_codes, ok_results), (&error_codes, error_results)] {
        let results = assert_ok!(results);
        assert_eq!(results.len(), codes.len());
        for (code, result) in codes.iter().zip(&results) {
            let response = result.as_ref().unwrap().as_response().unwrap();
            assert_eq!(response.status_code, *code);
        }
    }
    harness.connection.close().await.unwrap();
}

#[tokio::test]
async fn test_request_ids_correlate_with_inputs() {
    let server = TestServer::start().await;
    let harness = TestHarness::new();
    harness.connection.connect().await.unwrap();

    let requests: Vec<Request> = (0..6)
        .map(|i| Request::get(server.url(&format!("/status/{}", 200 + i))))
        .collect();

    let results = harness.connection.send(requests.clone()).await.unwrap();

    for (request, result) in requests.iter().zip(&results) {
        assert_eq!(result.as_ref().unwrap().request_id(), request.id());
    }
    harness.connection.close().await.unwrap();
}

#[tokio::test]
async fn test_failed_fetch_does_not_abort_batch() {
    let server = TestServer::start().await;
    let harness = TestHarness::new();
    harness.connection.connect().await.unwrap();

    let results = harness
        .connection
        .send(vec![server.url("/status/200"), closed_port_url()])
        .await
        .unwrap();

    assert_eq!(results[0].as_ref().unwrap().as_response().unwrap().status_code, 200);
    let error = results[1].as_ref().unwrap().as_error().unwrap();
    assert_eq!(error.error.kind, FailureKind::Connect);
    harness.connection.close().await.unwrap();
}

#[tokio::test]
async fn test_post_with_body_and_callbacks() {
    let server = TestServer::start().await;
    let harness = TestHarness::new();
    harness.connection.connect().await.unwrap();

    let bodies = Arc::new(std::sync::Mutex::new(Vec::new()));
    let errors = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&bodies);
    let failed = Arc::clone(&errors);
    let request = Request::builder(server.url("/echo"))
        .method("POST")
        .extra_arg("body", "hello")
        .on_success(harness.connection.registry(), move |response| {
            seen.lock().unwrap().push(response.text().to_string());
        })
        .on_error(harness.connection.registry(), move |_| {
            failed.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();

    let outcome = harness.connection.send_one(request).await.unwrap();

    assert!(outcome.unwrap().is_success());
    assert_eq!(*bodies.lock().unwrap(), vec!["POST hello".to_string()]);
    assert_eq!(errors.load(Ordering::SeqCst), 0);
    assert!(harness.connection.registry().is_empty());
    harness.connection.close().await.unwrap();
}

#[tokio::test]
async fn test_deadline_returns_partial_results() {
    let server = TestServer::start().await;
    let harness = TestHarness::with_config(ConnectionConfig {
        poll_interval_ms: 5,
        info_check_every: 2,
        send_timeout_ms: Some(500),
        ..Default::default()
    });
    harness.connection.connect().await.unwrap();

    let results = harness
        .connection
        .send(vec![server.url("/status/200"), server.url("/slow")])
        .await
        .unwrap();

    assert!(results[0].is_some());
    assert!(results[1].is_none());
    harness.connection.close().await.unwrap();
    assert!(harness.service.queue_names().await.is_empty());
}

#[tokio::test]
async fn test_session_queues_live_between_connect_and_close() {
    let harness = TestHarness::new();

    let queues = harness.connection.connect().await.unwrap();

    let names = harness.service.queue_names().await;
    assert_eq!(names.len(), 2);
    assert!(names.contains(&queues.submission.name().to_string()));
    assert!(names.contains(&queues.result.name().to_string()));
    assert_eq!(
        harness.connection.session_queues().await,
        Some(queues.clone())
    );

    harness.connection.close().await.unwrap();
    assert!(harness.service.queue_names().await.is_empty());
    assert!(harness.service.info(&queues.submission).await.is_err());
}

#[tokio::test]
async fn test_reconnect_uses_fresh_queues() {
    let harness = TestHarness::new();

    let first = harness.connection.connect().await.unwrap();
    harness.connection.close().await.unwrap();
    let second = harness.connection.connect().await.unwrap();

    assert_ne!(first.session_id, second.session_id);
    harness.connection.close().await.unwrap();
}

#[tokio::test]
async fn test_precondition_errors() {
    let harness = TestHarness::new();

    assert!(matches!(
        harness.connection.send(["http://127.0.0.1/"]).await,
        Err(ConnectionError::NotConnected)
    ));
    assert_err!(harness.connection.close().await);
    assert_ok!(harness.connection.connect().await);
    assert!(matches!(
        harness.connection.send(["mailto:someone@example.com"]).await,
        Err(ConnectionError::InvalidRequest(_))
    ));
    assert_ok!(harness.connection.close().await);
    assert_err!(harness.connection.close().await);
}

#[tokio::test]
async fn test_run_session_connects_and_closes() {
    let server = TestServer::start().await;
    let harness = TestHarness::new();
    let url = server.url("/status/200");

    let results = harness
        .connection
        .run_session(|c| async move { c.send([url]).await }.boxed())
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert!(!harness.connection.is_connected().await);
    assert!(harness.service.queue_names().await.is_empty());
}

#[tokio::test]
async fn test_reservation_held_around_batch() {
    let server = TestServer::start().await;
    let harness = TestHarness::new();
    let capacity: Arc<dyn CapacityService> = harness.service.clone();
    let spec = ReservationSpec::new("s1", 4).with_max_duration(Duration::from_secs(3600));

    let results = CapacityReservation::scoped(capacity, spec, |_| async {
        assert_eq!(harness.service.active_reservations().await.len(), 1);
        harness.connection.connect().await?;
        let results = harness.connection.send([server.url("/status/200")]).await?;
        harness.connection.close().await?;
        Ok::<_, BatchError>(results)
    })
    .await;

    assert_eq!(results.unwrap().len(), 1);
    assert!(harness.service.active_reservations().await.is_empty());
}
