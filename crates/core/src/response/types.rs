//! Response, error response and the tagged outcome wrapping both.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Category of a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The request or connection timed out.
    Timeout,
    /// Could not establish a connection.
    Connect,
    /// Redirect policy violated (loop, too many hops).
    Redirect,
    /// Reading the response body failed.
    Body,
    /// Decoding the response failed.
    Decode,
    /// The request could not be built or sent.
    Request,
    /// Anything else.
    Other,
}

impl FailureKind {
    /// Returns the string representation for logs and output.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Connect => "connect",
            FailureKind::Redirect => "redirect",
            FailureKind::Body => "body",
            FailureKind::Decode => "decode",
            FailureKind::Request => "request",
            FailureKind::Other => "other",
        }
    }
}

/// Structured failure information for a job that did not produce a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl FetchFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind.as_str(), self.message)
    }
}

/// A completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Id of the request this response answers.
    pub request_id: String,
    /// HTTP status code.
    pub status_code: u16,
    /// Raw response body.
    pub content: Vec<u8>,
    /// Response headers (lowercase names, repeated values joined with ", ").
    pub headers: HashMap<String, String>,
}

impl Response {
    pub fn new(
        request_id: impl Into<String>,
        status_code: u16,
        content: Vec<u8>,
        headers: HashMap<String, String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            status_code,
            content,
            headers,
        }
    }

    /// True for 2xx status codes.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Body decoded as UTF-8, with invalid sequences replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A job that ran but failed before producing a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Id of the request this failure belongs to.
    pub request_id: String,
    pub error: FetchFailure,
}

impl ErrorResponse {
    pub fn new(request_id: impl Into<String>, error: FetchFailure) -> Self {
        Self {
            request_id: request_id.into(),
            error,
        }
    }
}

/// Result of executing one request: a response or an error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success(Response),
    Failure(ErrorResponse),
}

impl Outcome {
    /// Id of the originating request.
    pub fn request_id(&self) -> &str {
        match self {
            Outcome::Success(r) => &r.request_id,
            Outcome::Failure(e) => &e.request_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn as_response(&self) -> Option<&Response> {
        match self {
            Outcome::Success(r) => Some(r),
            Outcome::Failure(_) => None,
        }
    }

    pub fn as_error(&self) -> Option<&ErrorResponse> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(e) => Some(e),
        }
    }

    /// Label used for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::Failure(_) => "failure",
        }
    }
}

impl From<Response> for Outcome {
    fn from(response: Response) -> Self {
        Outcome::Success(response)
    }
}

impl From<ErrorResponse> for Outcome {
    fn from(error: ErrorResponse) -> Self {
        Outcome::Failure(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_accessors() {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "text/plain".to_string());
        let response = Response::new("req-1", 200, b"dummy".to_vec(), headers);

        assert_eq!(response.status_code, 200);
        assert_eq!(response.text(), "dummy");
        assert_eq!(response.header("content-type"), Some("text/plain"));
        assert!(response.is_success());
    }

    #[test]
    fn test_non_2xx_is_not_success() {
        let response = Response::new("req-1", 404, Vec::new(), HashMap::new());
        assert!(!response.is_success());
        // Still a successful exchange from the job's point of view
        assert!(Outcome::from(response).is_success());
    }

    #[test]
    fn test_outcome_request_id() {
        let ok = Outcome::from(Response::new("a", 200, Vec::new(), HashMap::new()));
        let failed = Outcome::from(ErrorResponse::new(
            "b",
            FetchFailure::new(FailureKind::Timeout, "timed out"),
        ));

        assert_eq!(ok.request_id(), "a");
        assert_eq!(failed.request_id(), "b");
        assert_eq!(ok.label(), "success");
        assert_eq!(failed.label(), "failure");
        assert!(failed.as_response().is_none());
        assert_eq!(failed.as_error().unwrap().error.kind, FailureKind::Timeout);
    }

    #[test]
    fn test_failure_display() {
        let failure = FetchFailure::new(FailureKind::Connect, "connection refused");
        assert_eq!(failure.to_string(), "connect error: connection refused");
    }

    #[test]
    fn test_outcome_json_is_tagged() {
        let failed = Outcome::from(ErrorResponse::new(
            "b",
            FetchFailure::new(FailureKind::Timeout, "timed out"),
        ));
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["failure"]["request_id"], "b");
        assert_eq!(json["failure"]["error"]["kind"], "timeout");
    }
}
