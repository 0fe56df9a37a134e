//! Health and service description endpoints

use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::AppState;
use voxserve_core::{HealthReport, ModelSize};

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.service.health().await)
}

#[derive(Serialize)]
pub struct ServiceInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
    pub model_size: ModelSize,
    pub endpoints: Vec<&'static str>,
}

/// Short description of the service and its routes
pub async fn service_info(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        name: "voxserve",
        version: env!("CARGO_PKG_VERSION"),
        description: env!("CARGO_PKG_DESCRIPTION"),
        model_size: state.service.model_size(),
        endpoints: vec![
            "GET /api/health",
            "GET /api/voices",
            "GET /api/languages",
            "GET /api/models",
            "POST /api/models/{variant}/load",
            "POST /api/models/{variant}/unload",
            "POST /api/tts/custom-voice",
            "POST /api/tts/voice-design",
            "POST /api/tts/voice-clone",
        ],
    })
}
