//! Application state shared by every handler

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};

use voxserve_core::{ServerConfig, TtsService};

use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<TtsService>,
    /// Bounds concurrent synthesis requests
    pub request_semaphore: Arc<Semaphore>,
    /// Per-request synthesis timeout (seconds)
    pub request_timeout_secs: u64,
    /// Static browser UI served as the fallback route
    pub ui_dir: PathBuf,
}

impl AppState {
    pub fn new(service: Arc<TtsService>, server: &ServerConfig) -> Self {
        Self {
            service,
            request_semaphore: Arc::new(Semaphore::new(server.max_concurrent_requests.max(1))),
            request_timeout_secs: server.request_timeout_secs,
            ui_dir: server.ui_dir.clone(),
        }
    }

    /// Acquire a permit for concurrent request processing
    pub async fn acquire_permit(&self) -> Result<SemaphorePermit<'_>, ApiError> {
        self.request_semaphore
            .acquire()
            .await
            .map_err(|_| ApiError::unavailable("Server is shutting down"))
    }
}
