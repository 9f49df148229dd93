//! HTTP response mapping
//!
//! Maps domain errors to status codes at the web boundary. Handlers stay
//! thin: they return `AppResult<Json<T>>` and the mapping below does the
//! rest.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::errors::AppError;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation { .. } | AppError::DuplicateStream { .. } => {
                StatusCode::BAD_REQUEST
            }
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Persistence(_) | AppError::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = json!({
            "error": self.to_string(),
            "timestamp": chrono::Utc::now(),
        });
        (status, Json(body)).into_response()
    }
}
