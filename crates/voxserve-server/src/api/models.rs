//! Model management API endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;
use voxserve_core::{parse_model_variant, ModelInfoReport, ModelVariant, RegistryEntry};

#[derive(Serialize)]
pub struct LoadResponse {
    pub status: &'static str,
    pub message: String,
    pub entry: RegistryEntry,
}

#[derive(Serialize)]
pub struct UnloadResponse {
    pub status: &'static str,
    pub message: String,
}

/// Loaded models, device and catalog
pub async fn list_models(State(state): State<AppState>) -> Json<ModelInfoReport> {
    Json(state.service.model_info().await)
}

/// Load a model into memory
pub async fn load_model(
    State(state): State<AppState>,
    Path(variant): Path<String>,
) -> Result<Json<LoadResponse>, ApiError> {
    let variant = parse_variant(&variant)?;
    info!("Loading model: {}", variant);

    let entry = state.service.load_variant(variant).await?;

    Ok(Json(LoadResponse {
        status: "loaded",
        message: format!("Model {} loaded ({})", variant, entry.resource_id),
        entry,
    }))
}

/// Unload a model from memory
pub async fn unload_model(
    State(state): State<AppState>,
    Path(variant): Path<String>,
) -> Result<Json<UnloadResponse>, ApiError> {
    let variant = parse_variant(&variant)?;
    info!("Unloading model: {}", variant);

    let response = if state.service.unload_variant(variant).await {
        UnloadResponse {
            status: "unloaded",
            message: format!("Model {} unloaded", variant),
        }
    } else {
        UnloadResponse {
            status: "not_loaded",
            message: format!("Model {} was not loaded", variant),
        }
    };
    Ok(Json(response))
}

fn parse_variant(s: &str) -> Result<ModelVariant, ApiError> {
    parse_model_variant(s).map_err(ApiError::from)
}
