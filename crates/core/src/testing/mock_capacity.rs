//! Mock capacity service for testing.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

use crate::capacity::{CapacityError, CapacityService, ReservationId, ReservationSpec};

/// Mock implementation of the CapacityService trait.
///
/// Grants every request with ids counting up from 1 and records each call.
#[derive(Debug)]
pub struct MockCapacityService {
    next_id: AtomicU64,
    requests: RwLock<Vec<ReservationSpec>>,
    releases: RwLock<Vec<ReservationId>>,
    fail_next_request: RwLock<bool>,
    fail_next_release: RwLock<bool>,
}

impl Default for MockCapacityService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCapacityService {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            requests: RwLock::new(Vec::new()),
            releases: RwLock::new(Vec::new()),
            fail_next_request: RwLock::new(false),
            fail_next_release: RwLock::new(false),
        }
    }

    /// Specs passed to `request`, in call order.
    pub async fn request_calls(&self) -> Vec<ReservationSpec> {
        self.requests.read().await.clone()
    }

    /// Ids passed to `release`, in call order.
    pub async fn release_calls(&self) -> Vec<ReservationId> {
        self.releases.read().await.clone()
    }

    /// Make the next `request` fail with `Unavailable`.
    pub async fn fail_next_request(&self) {
        *self.fail_next_request.write().await = true;
    }

    /// Make the next `release` fail with `Unavailable`. The call is still
    /// recorded.
    pub async fn fail_next_release(&self) {
        *self.fail_next_release.write().await = true;
    }
}

#[async_trait]
impl CapacityService for MockCapacityService {
    async fn request(
        &self,
        core_type: &str,
        num_cores: u32,
        max_duration: Option<Duration>,
    ) -> Result<ReservationId, CapacityError> {
        self.requests.write().await.push(ReservationSpec {
            core_type: core_type.to_string(),
            num_cores,
            max_duration,
        });

        if std::mem::take(&mut *self.fail_next_request.write().await) {
            return Err(CapacityError::Unavailable("simulated failure".to_string()));
        }

        Ok(ReservationId(self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    async fn release(&self, id: ReservationId) -> Result<(), CapacityError> {
        self.releases.write().await.push(id);

        if std::mem::take(&mut *self.fail_next_release.write().await) {
            return Err(CapacityError::Unavailable("simulated failure".to_string()));
        }
        Ok(())
    }
}
