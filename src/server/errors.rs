//! Consistent JSON error responses.

use crate::error::ApiError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::JobNotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", self.to_string()),
            ApiError::Cancelled(_) => json_error(StatusCode::CONFLICT, "cancelled", self.to_string()),
            ApiError::Decode(_) => {
                json_error(StatusCode::UNPROCESSABLE_ENTITY, "decode_failed", self.to_string())
            }
            ApiError::Provider(_) | ApiError::CircuitOpen { .. } => {
                json_error(StatusCode::BAD_GATEWAY, "provider_error", self.to_string())
            }
            ApiError::ConfigError(_) | ApiError::Render(_) | ApiError::Internal(_) => json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                self.to_string(),
            ),
        }
    }
}
