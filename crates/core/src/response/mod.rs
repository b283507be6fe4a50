//! Outcomes of executed requests.
//!
//! An outcome carries only the id of the request it answers, never the
//! request itself, so it can travel back from a worker as plain data.

mod types;

pub use types::*;
