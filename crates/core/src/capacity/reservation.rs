//! Scoped capacity reservation.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tracing::{error, info, warn};

use crate::metrics;

use super::types::{CapacityError, CapacityService, ReservationId, ReservationSpec};

/// A granted reservation. Released exactly once: explicitly through
/// [`release`](Self::release), or in the background when dropped.
pub struct CapacityReservation {
    service: Arc<dyn CapacityService>,
    id: ReservationId,
    spec: ReservationSpec,
    acquired_at: DateTime<Utc>,
    released: bool,
}

impl std::fmt::Debug for CapacityReservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapacityReservation")
            .field("id", &self.id)
            .field("spec", &self.spec)
            .field("acquired_at", &self.acquired_at)
            .field("released", &self.released)
            .finish()
    }
}

impl CapacityReservation {
    /// Request capacity from the service.
    pub async fn acquire(
        service: Arc<dyn CapacityService>,
        spec: ReservationSpec,
    ) -> Result<Self, CapacityError> {
        spec.validate()?;

        let id = service
            .request(&spec.core_type, spec.num_cores, spec.max_duration)
            .await?;

        metrics::RESERVATIONS.with_label_values(&["acquired"]).inc();
        info!(
            reservation = %id,
            core_type = %spec.core_type,
            num_cores = spec.num_cores,
            "Acquired capacity reservation"
        );

        Ok(Self {
            service,
            id,
            spec,
            acquired_at: Utc::now(),
            released: false,
        })
    }

    /// Acquire, run `f`, and release on every exit path.
    ///
    /// A panic inside `f` is resumed after the release completes.
    pub async fn scoped<F, Fut, T, E>(
        service: Arc<dyn CapacityService>,
        spec: ReservationSpec,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(ReservationId) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CapacityError>,
    {
        let reservation = Self::acquire(service, spec).await?;
        let id = reservation.id();

        let result = AssertUnwindSafe(async move { f(id).await })
            .catch_unwind()
            .await;
        let released = reservation.release().await;

        match result {
            Err(panic) => {
                if let Err(e) = released {
                    error!(reservation = %id, error = %e, "Failed to release reservation");
                }
                std::panic::resume_unwind(panic)
            }
            Ok(Err(e)) => {
                if let Err(release_err) = released {
                    warn!(reservation = %id, error = %release_err, "Failed to release reservation");
                }
                Err(e)
            }
            Ok(Ok(value)) => {
                released?;
                Ok(value)
            }
        }
    }

    pub fn id(&self) -> ReservationId {
        self.id
    }

    pub fn spec(&self) -> &ReservationSpec {
        &self.spec
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// Return the capacity to the service.
    pub async fn release(mut self) -> Result<(), CapacityError> {
        self.released = true;
        let held_for = Utc::now() - self.acquired_at;
        self.service.release(self.id).await?;

        metrics::RESERVATIONS.with_label_values(&["released"]).inc();
        info!(
            reservation = %self.id,
            held_secs = held_for.num_seconds(),
            "Released capacity reservation"
        );
        Ok(())
    }
}

impl Drop for CapacityReservation {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let service = Arc::clone(&self.service);
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(reservation = %id, "Reservation dropped without release, releasing in background");
                handle.spawn(async move {
                    match service.release(id).await {
                        Ok(()) => metrics::RESERVATIONS.with_label_values(&["released"]).inc(),
                        Err(e) => error!(reservation = %id, error = %e, "Background release failed"),
                    }
                });
            }
            Err(_) => {
                error!(reservation = %id, "Reservation dropped outside a runtime and was not released");
            }
        }
    }
}
