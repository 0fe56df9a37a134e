//! Runtime service: the object the HTTP layer talks to.

mod service;
mod types;

pub use service::TtsService;
pub use types::{HealthReport, ModelInfoReport, VariantInfo};
