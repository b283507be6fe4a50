//! Reserved execution capacity held independently of any batch.

mod reservation;
mod types;

pub use reservation::CapacityReservation;
pub use types::*;
