//! Types for queue service operations.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by a queue service.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Queue already exists: {0}")]
    AlreadyExists(String),

    #[error("Queue already has a handler attached: {0}")]
    AlreadyAttached(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Queue service unavailable: {0}")]
    Unavailable(String),
}

/// Reference to a named queue on the service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueHandle {
    name: String,
}

impl QueueHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Work counters of a queue with an attached handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueInfo {
    /// Items waiting to be picked up by a worker.
    pub pending_count: usize,
    /// Jobs currently running.
    pub processing_jobs: usize,
    /// Jobs picked up and waiting to start.
    pub queued_jobs: usize,
}

impl QueueInfo {
    /// True when nothing is waiting, queued or running.
    pub fn is_idle(&self) -> bool {
        self.pending_count == 0 && self.processing_jobs == 0 && self.queued_jobs == 0
    }
}

/// How a handler is bound to a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachOptions {
    /// Upper bound on concurrently running jobs.
    pub max_parallel_jobs: usize,
    /// Execution profile the jobs run on.
    pub core_type: String,
}

/// A job failed without producing an output item.
#[derive(Debug, Error)]
#[error("job failed: {0}")]
pub struct JobError(pub String);

/// Per-item work executed by the queue service.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Process one payload and return the item to forward to the output queue.
    async fn handle(&self, payload: Vec<u8>) -> Result<Vec<u8>, JobError>;
}

/// Queue service abstraction.
///
/// Items are opaque byte payloads. A queue with an attached handler runs the
/// handler for every item it receives and forwards each output to the
/// attached output queue.
#[async_trait]
pub trait QueueService: Send + Sync {
    /// Service name for logging.
    fn name(&self) -> &str;

    /// Create a queue.
    async fn create(&self, name: &str) -> Result<QueueHandle, QueueError>;

    /// Delete a queue, detaching any handler. Jobs in flight are not drained.
    async fn delete(&self, queue: &QueueHandle) -> Result<(), QueueError>;

    /// Enqueue a batch of items atomically.
    async fn push(&self, queue: &QueueHandle, items: Vec<Vec<u8>>) -> Result<(), QueueError>;

    /// Take every available item, waiting up to `timeout` for the first one.
    /// A zero timeout never waits.
    async fn pop(&self, queue: &QueueHandle, timeout: Duration)
        -> Result<Vec<Vec<u8>>, QueueError>;

    /// Bind a handler to `queue`, forwarding outputs to `output`.
    async fn attach(
        &self,
        queue: &QueueHandle,
        handler: std::sync::Arc<dyn JobHandler>,
        output: &QueueHandle,
        options: AttachOptions,
    ) -> Result<(), QueueError>;

    /// Work counters for a queue.
    async fn info(&self, queue: &QueueHandle) -> Result<QueueInfo, QueueError>;

    /// Number of items currently stored in a queue.
    async fn count(&self, queue: &QueueHandle) -> Result<usize, QueueError>;
}
