//! Types for connections.

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::codec::CodecError;
use crate::queue::{QueueError, QueueHandle, QueueInfo};
use crate::request::Request;

/// Name prefix of the queue requests are pushed onto.
pub const REQUEST_QUEUE_PREFIX: &str = "fetchfleet_request_";

/// Name prefix of the queue outcomes arrive on.
pub const RESULT_QUEUE_PREFIX: &str = "fetchfleet_result_";

/// Errors that can occur while driving a connection.
///
/// Failures of individual fetches are never reported here; they come back
/// as [`Outcome::Failure`](crate::response::Outcome::Failure) values.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection is not connected")]
    NotConnected,

    #[error("connection is already connected")]
    AlreadyConnected,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("queue service error: {0}")]
    Queue(#[from] QueueError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// One element of a batch: a bare URL or a fully built request.
#[derive(Debug, Clone)]
pub enum RequestInput {
    Url(String),
    Request(Request),
}

impl RequestInput {
    /// Turn the input into a request with a usable URL.
    pub fn into_request(self) -> Result<Request, ConnectionError> {
        let request = self.into_unvalidated();
        validate_url(request.url())?;
        Ok(request)
    }

    pub(crate) fn into_unvalidated(self) -> Request {
        match self {
            RequestInput::Url(url) => Request::get(url),
            RequestInput::Request(request) => request,
        }
    }
}

impl From<&str> for RequestInput {
    fn from(url: &str) -> Self {
        RequestInput::Url(url.to_string())
    }
}

impl From<String> for RequestInput {
    fn from(url: String) -> Self {
        RequestInput::Url(url)
    }
}

impl From<&String> for RequestInput {
    fn from(url: &String) -> Self {
        RequestInput::Url(url.clone())
    }
}

impl From<Request> for RequestInput {
    fn from(request: Request) -> Self {
        RequestInput::Request(request)
    }
}

/// Accept absolute http(s) URLs with a host.
pub(crate) fn validate_url(url: &str) -> Result<(), ConnectionError> {
    let parsed = Url::parse(url)
        .map_err(|e| ConnectionError::InvalidRequest(format!("{}: {}", url, e)))?;

    match parsed.scheme() {
        "http" | "https" if parsed.has_host() => Ok(()),
        "http" | "https" => Err(ConnectionError::InvalidRequest(format!(
            "{}: missing host",
            url
        ))),
        scheme => Err(ConnectionError::InvalidRequest(format!(
            "{}: unsupported scheme `{}`",
            url, scheme
        ))),
    }
}

/// Queues owned by one connected session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionQueues {
    /// `<UTC yyyymmddHHMMSS>_<random hex>`, shared by both queue names.
    pub session_id: String,
    pub submission: QueueHandle,
    pub result: QueueHandle,
}

impl SessionQueues {
    /// Fresh queue names for a session starting at `now`.
    pub fn generate(now: DateTime<Utc>) -> Self {
        let session_id = format!(
            "{}_{}",
            now.format("%Y%m%d%H%M%S"),
            Uuid::new_v4().simple()
        );
        Self {
            submission: QueueHandle::new(format!("{}{}", REQUEST_QUEUE_PREFIX, session_id)),
            result: QueueHandle::new(format!("{}{}", RESULT_QUEUE_PREFIX, session_id)),
            session_id,
        }
    }
}

/// A batch is complete once the submission queue has nothing waiting,
/// queued or running and every outcome has been taken off the result queue.
pub fn batch_completed(submission: &QueueInfo, result_count: usize) -> bool {
    submission.is_idle() && result_count == 0
}
