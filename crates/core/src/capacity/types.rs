//! Types for capacity reservations.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported while reserving or releasing capacity.
#[derive(Debug, Error)]
pub enum CapacityError {
    #[error("Invalid reservation: {0}")]
    InvalidSpec(String),

    #[error("Unknown reservation: {0}")]
    UnknownReservation(ReservationId),

    #[error("Capacity service unavailable: {0}")]
    Unavailable(String),
}

/// Identifier of a granted reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReservationId(pub u64);

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What to reserve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationSpec {
    /// Execution profile of the reserved cores.
    pub core_type: String,
    /// Number of cores.
    pub num_cores: u32,
    /// Lifetime of the reservation; `None` leaves it to the service.
    #[serde(default)]
    pub max_duration: Option<Duration>,
}

impl ReservationSpec {
    pub fn new(core_type: impl Into<String>, num_cores: u32) -> Self {
        Self {
            core_type: core_type.into(),
            num_cores,
            max_duration: None,
        }
    }

    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = Some(max_duration);
        self
    }

    /// Reject specs no service could grant.
    pub fn validate(&self) -> Result<(), CapacityError> {
        if self.core_type.trim().is_empty() {
            return Err(CapacityError::InvalidSpec(
                "core_type cannot be empty".to_string(),
            ));
        }
        if self.num_cores == 0 {
            return Err(CapacityError::InvalidSpec(
                "num_cores must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Reserved execution capacity on the worker service.
#[async_trait]
pub trait CapacityService: Send + Sync {
    /// Reserve `num_cores` cores of `core_type`.
    async fn request(
        &self,
        core_type: &str,
        num_cores: u32,
        max_duration: Option<Duration>,
    ) -> Result<ReservationId, CapacityError>;

    /// Return a reservation.
    async fn release(&self, id: ReservationId) -> Result<(), CapacityError>;
}
