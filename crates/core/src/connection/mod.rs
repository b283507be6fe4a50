//! Client-side batch orchestration over a queue service.
//!
//! A [`Connection`] drives one session at a time:
//! - **connect**: create a submission and a result queue, attach the fetch handler
//! - **send**: push a batch, poll results, dispatch callbacks, return outcomes in input order
//! - **close**: delete both queues and drop registered callbacks

mod config;
mod runner;
mod types;

pub use config::ConnectionConfig;
pub use runner::Connection;
pub use types::{
    batch_completed, ConnectionError, RequestInput, SessionQueues, REQUEST_QUEUE_PREFIX,
    RESULT_QUEUE_PREFIX,
};
