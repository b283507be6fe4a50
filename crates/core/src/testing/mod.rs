//! Testing utilities and mock implementations.
//!
//! Mocks for the queue service, the capacity service and the fetcher, so a
//! whole connection can be exercised without a worker backend or network.
//!
//! # Example
//!
//! ```rust,ignore
//! use fetchfleet_core::testing::{MockFetcher, MockQueueService, OutputOrder};
//!
//! let queues = Arc::new(MockQueueService::new());
//! let fetcher = Arc::new(MockFetcher::new());
//!
//! queues.set_output_order(OutputOrder::Reversed).await;
//! fetcher.set_response("http://a/", 404, Vec::new()).await;
//!
//! let connection = Connection::new(config, queues.clone(), fetcher.clone());
//! ```

mod mock_capacity;
mod mock_fetcher;
mod mock_queue_service;

pub use mock_capacity::MockCapacityService;
pub use mock_fetcher::MockFetcher;
pub use mock_queue_service::{MockQueueService, OutputOrder, QueueOperation, RecordedAttach};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::collections::HashMap;

    use crate::response::{ErrorResponse, FailureKind, FetchFailure, Outcome, Response};

    /// A successful outcome with a text body.
    pub fn success(request_id: &str, status_code: u16, body: &str) -> Outcome {
        Response::new(request_id, status_code, body.as_bytes().to_vec(), HashMap::new()).into()
    }

    /// A failed outcome.
    pub fn failure(request_id: &str, kind: FailureKind, message: &str) -> Outcome {
        ErrorResponse::new(request_id, FetchFailure::new(kind, message)).into()
    }

    /// `count` distinct URLs on a dummy host.
    pub fn urls(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("http://dummy/{}", i)).collect()
    }
}
