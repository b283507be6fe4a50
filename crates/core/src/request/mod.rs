//! Fetch requests and their callback registry.

mod registry;
mod types;

pub use registry::{CallbackRegistry, ErrorCallback, SuccessCallback};
pub use types::*;
