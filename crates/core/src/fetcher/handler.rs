//! Worker-side job handler.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::codec::TransportCodec;
use crate::queue::{JobError, JobHandler};
use crate::request::Request;
use crate::response::Outcome;

use super::types::Fetcher;

/// Decodes a request payload, executes it, and encodes the outcome for the
/// result queue.
pub struct FetchJobHandler {
    fetcher: Arc<dyn Fetcher>,
    codec: TransportCodec,
}

impl FetchJobHandler {
    pub fn new(fetcher: Arc<dyn Fetcher>, codec: TransportCodec) -> Self {
        Self { fetcher, codec }
    }
}

#[async_trait]
impl JobHandler for FetchJobHandler {
    async fn handle(&self, payload: Vec<u8>) -> Result<Vec<u8>, JobError> {
        let request: Request = self
            .codec
            .decode(&payload)
            .map_err(|e| JobError(format!("undecodable request: {}", e)))?;

        debug!(
            request_id = request.id(),
            method = %request.method(),
            url = request.url(),
            fetcher = self.fetcher.name(),
            "Executing fetch"
        );

        let outcome = request.call(self.fetcher.as_ref()).await;
        match &outcome {
            Outcome::Success(response) => debug!(
                request_id = request.id(),
                status = response.status_code,
                bytes = response.content.len(),
                "Fetch completed"
            ),
            Outcome::Failure(error) => debug!(
                request_id = request.id(),
                error = %error.error,
                "Fetch failed"
            ),
        }

        self.codec
            .encode(&outcome)
            .map_err(|e| JobError(format!("unencodable outcome: {}", e)))
    }
}
