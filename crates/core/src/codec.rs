//! Transport encoding for values crossing the queue boundary.
//!
//! Requests travel to workers and outcomes travel back as opaque byte
//! payloads. Values are serialized with bincode and compressed with zstd,
//! which keeps large response bodies cheap to move through the queues.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Default zstd level for transport payloads.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 9;

/// Errors that can occur while encoding or decoding a payload.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to serialize payload: {0}")]
    Serialize(String),

    #[error("failed to deserialize payload: {0}")]
    Deserialize(String),

    #[error("failed to compress payload: {0}")]
    Compress(#[source] std::io::Error),

    #[error("failed to decompress payload: {0}")]
    Decompress(#[source] std::io::Error),
}

/// bincode + zstd codec shared by the submission and result paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportCodec {
    level: i32,
}

impl Default for TransportCodec {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_LEVEL)
    }
}

impl TransportCodec {
    /// Create a codec with the given zstd compression level (1-22).
    pub fn new(level: i32) -> Self {
        Self { level }
    }

    /// Compression level used when encoding.
    pub fn level(&self) -> i32 {
        self.level
    }

    /// Serialize and compress a value.
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        let raw = bincode::serialize(value).map_err(|e| CodecError::Serialize(e.to_string()))?;
        zstd::encode_all(raw.as_slice(), self.level).map_err(CodecError::Compress)
    }

    /// Decompress and deserialize a value.
    pub fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T, CodecError> {
        let raw = zstd::decode_all(payload).map_err(CodecError::Decompress)?;
        bincode::deserialize(&raw).map_err(|e| CodecError::Deserialize(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Request;
    use crate::response::{ErrorResponse, FailureKind, FetchFailure, Outcome, Response};
    use std::collections::HashMap;

    fn sample_response() -> Response {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "text/html".to_string());
        Response::new("abc123", 200, b"<!DOCTYPE html>".to_vec(), headers)
    }

    #[test]
    fn test_response_survives_transport() {
        let codec = TransportCodec::default();
        let response = sample_response();

        let encoded = codec.encode(&response).unwrap();
        let decoded: Response = codec.decode(&encoded).unwrap();

        assert_eq!(decoded, response);
    }

    #[test]
    fn test_error_response_survives_transport() {
        let codec = TransportCodec::default();
        let error = ErrorResponse::new(
            "abc123",
            FetchFailure::new(FailureKind::Connect, "connection refused"),
        );

        let encoded = codec.encode(&Outcome::from(error.clone())).unwrap();
        let decoded: Outcome = codec.decode(&encoded).unwrap();

        assert_eq!(decoded, Outcome::Failure(error));
    }

    #[test]
    fn test_request_with_extra_args_survives_transport() {
        let codec = TransportCodec::new(1);
        let request = Request::builder("http://example.com/search")
            .method("POST")
            .header("x-api-key", "secret")
            .extra_arg("timeout_secs", 5)
            .extra_arg("json", serde_json::json!({"q": "rust", "page": 2}))
            .build()
            .unwrap();

        let encoded = codec.encode(&request).unwrap();
        let decoded: Request = codec.decode(&encoded).unwrap();

        assert_eq!(decoded, request);
        assert_eq!(decoded.extra_args()["timeout_secs"], 5);
    }

    #[test]
    fn test_repetitive_content_is_compressed() {
        let codec = TransportCodec::default();
        let body = "<p>hello</p>".repeat(2_000).into_bytes();
        let response = Response::new("abc123", 200, body.clone(), HashMap::new());

        let encoded = codec.encode(&response).unwrap();

        assert!(encoded.len() < body.len() / 10);
    }

    #[test]
    fn test_decode_garbage_fails_decompress() {
        let codec = TransportCodec::default();
        let result: Result<Response, _> = codec.decode(b"definitely not zstd");
        assert!(matches!(result, Err(CodecError::Decompress(_))));
    }

    #[test]
    fn test_decode_wrong_shape_fails_deserialize() {
        let codec = TransportCodec::default();
        let encoded = codec.encode(&7u8).unwrap();
        let result: Result<Response, _> = codec.decode(&encoded);
        assert!(matches!(result, Err(CodecError::Deserialize(_))));
    }
}
