//! HTTP fetch execution.
//!
//! This module provides a `Fetcher` trait for performing a single request,
//! the reqwest-backed implementation, and the job handler that runs fetches
//! on the worker side of the submission queue.

mod config;
mod handler;
mod reqwest_fetcher;
mod types;

pub use config::HttpConfig;
pub use handler::FetchJobHandler;
pub use reqwest_fetcher::ReqwestFetcher;
pub use types::*;
