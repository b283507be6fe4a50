//! Queue service abstraction.
//!
//! This module provides a `QueueService` trait for the elastic worker queue
//! that executes fetch jobs, plus an embedded in-process backend.

mod local;
mod types;

pub use local::{LocalQueueService, LocalReservation};
pub use types::*;
