//! API route definitions

mod catalog;
mod health;
mod models;
mod tts;

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderName,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};

use crate::state::AppState;

/// Response headers carrying synthesis statistics
pub const HEADER_DURATION: &str = "x-audio-duration-secs";
pub const HEADER_GENERATION_TIME: &str = "x-generation-time-ms";
pub const HEADER_RTF: &str = "x-rtf";
pub const HEADER_SAMPLE_RATE: &str = "x-sample-rate";
pub const HEADER_REQUEST_ID: &str = "x-request-id";

/// Upload ceiling for voice-clone reference clips
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    let ui_dir = state.ui_dir.clone();
    let index_file = ui_dir.join("index.html");

    let api_routes = Router::new()
        .route("/", get(health::service_info))
        .route("/health", get(health::health_check))
        .route("/voices", get(catalog::list_voices))
        .route("/languages", get(catalog::list_languages))
        .route("/models", get(models::list_models))
        .route("/models/:variant/load", post(models::load_model))
        .route("/models/:variant/unload", post(models::unload_model))
        .route("/tts/custom-voice", post(tts::custom_voice))
        .route("/tts/voice-design", post(tts::voice_design))
        .route(
            "/tts/voice-clone",
            post(tts::voice_clone).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        );

    let expose = [
        HEADER_DURATION,
        HEADER_GENERATION_TIME,
        HEADER_RTF,
        HEADER_SAMPLE_RATE,
        HEADER_REQUEST_ID,
    ]
    .map(HeaderName::from_static);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(expose);

    // Static UI with SPA fallback
    let static_files = ServeDir::new(ui_dir).not_found_service(ServeFile::new(index_file));

    Router::new()
        .nest("/api", api_routes)
        .route("/health", get(health::health_check))
        .fallback_service(static_files)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
