//! API error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

/// API error type
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.into(),
        }
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: msg.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("{} {}", self.status, self.message);
        }
        let body = Json(json!({
            "status": "error",
            "message": self.message,
            "code": self.status.as_u16(),
        }));
        (self.status, body).into_response()
    }
}

impl From<voxserve_core::Error> for ApiError {
    fn from(err: voxserve_core::Error) -> Self {
        use voxserve_core::Error;

        match &err {
            Error::InvalidRequest(msg) => ApiError::bad_request(msg.clone()),
            Error::UnknownVariant(_) => ApiError::not_found(err.to_string()),
            // Audio faults reaching a handler come from uploaded payloads.
            Error::Audio(_) => ApiError::bad_request(err.to_string()),
            _ => ApiError::internal(err.to_string()),
        }
    }
}
