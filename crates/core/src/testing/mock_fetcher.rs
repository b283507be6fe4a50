//! Mock fetcher for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::fetcher::Fetcher;
use crate::request::Request;
use crate::response::{ErrorResponse, FailureKind, FetchFailure, Outcome, Response};

#[derive(Debug, Clone)]
enum Scripted {
    Response {
        status_code: u16,
        body: Vec<u8>,
        headers: HashMap<String, String>,
    },
    Failure(FetchFailure),
}

/// Mock implementation of the Fetcher trait.
///
/// URLs without a scripted answer get a 200 whose body is the URL itself,
/// which makes ordering assertions easy.
///
/// # Example
///
/// ```rust,ignore
/// let fetcher = MockFetcher::new();
/// fetcher.set_response("http://a/", 404, b"gone".to_vec()).await;
/// fetcher.set_failure("http://b/", FailureKind::Timeout, "timed out").await;
/// fetcher.set_delay("http://c/", Duration::from_millis(50)).await;
/// ```
#[derive(Debug, Default)]
pub struct MockFetcher {
    scripted: Arc<RwLock<HashMap<String, Scripted>>>,
    delays: Arc<RwLock<HashMap<String, Duration>>>,
    calls: Arc<RwLock<Vec<String>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `url` with the given status and body.
    pub async fn set_response(&self, url: &str, status_code: u16, body: Vec<u8>) {
        self.scripted.write().await.insert(
            url.to_string(),
            Scripted::Response {
                status_code,
                body,
                headers: HashMap::new(),
            },
        );
    }

    /// Answer `url` with a response carrying headers.
    pub async fn set_response_with_headers(
        &self,
        url: &str,
        status_code: u16,
        body: Vec<u8>,
        headers: HashMap<String, String>,
    ) {
        self.scripted.write().await.insert(
            url.to_string(),
            Scripted::Response {
                status_code,
                body,
                headers,
            },
        );
    }

    /// Fail every fetch of `url`.
    pub async fn set_failure(&self, url: &str, kind: FailureKind, message: &str) {
        self.scripted.write().await.insert(
            url.to_string(),
            Scripted::Failure(FetchFailure::new(kind, message)),
        );
    }

    /// Delay every fetch of `url`.
    pub async fn set_delay(&self, url: &str, delay: Duration) {
        self.delays.write().await.insert(url.to_string(), delay);
    }

    /// URLs fetched so far, in call order.
    pub async fn calls(&self) -> Vec<String> {
        self.calls.read().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.read().await.len()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch(&self, request: &Request) -> Outcome {
        self.calls.write().await.push(request.url().to_string());

        let delay = self.delays.read().await.get(request.url()).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.scripted.read().await.get(request.url()).cloned();
        match scripted {
            Some(Scripted::Response {
                status_code,
                body,
                headers,
            }) => Response::new(request.id(), status_code, body, headers).into(),
            Some(Scripted::Failure(failure)) => ErrorResponse::new(request.id(), failure).into(),
            None => Response::new(
                request.id(),
                200,
                request.url().as_bytes().to_vec(),
                HashMap::new(),
            )
            .into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unscripted_url_echoes() {
        let fetcher = MockFetcher::new();
        let request = Request::get("http://dummy/echo");

        let outcome = fetcher.fetch(&request).await;

        let response = outcome.as_response().unwrap();
        assert_eq!(response.status_code, 200);
        assert_eq!(response.content, b"http://dummy/echo");
        assert_eq!(fetcher.call_count().await, 1);
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let fetcher = MockFetcher::new();
        fetcher
            .set_failure("http://dummy/x", FailureKind::Timeout, "slow")
            .await;

        let outcome = fetcher.fetch(&Request::get("http://dummy/x")).await;

        let error = outcome.as_error().unwrap();
        assert_eq!(error.error.kind, FailureKind::Timeout);
        assert_eq!(error.error.message, "slow");
    }
}
