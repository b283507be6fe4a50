//! Types for fetch execution.

use async_trait::async_trait;
use thiserror::Error;

use crate::request::Request;
use crate::response::Outcome;

/// Errors raised while setting up a fetcher.
#[derive(Debug, Error)]
pub enum FetcherError {
    #[error("Failed to create HTTP client: {0}")]
    ClientBuild(String),
}

/// Performs the HTTP exchange described by a [`Request`].
///
/// Implementations never fail: transport and protocol errors are reported
/// as [`Outcome::Failure`] so one bad job cannot abort its batch.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetcher name for logging.
    fn name(&self) -> &str;

    /// Execute the request.
    async fn fetch(&self, request: &Request) -> Outcome;
}
