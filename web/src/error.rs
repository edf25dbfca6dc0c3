//! API error types

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use breaker_events::{ParseEventTypeError, RegistryError};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    InvalidEventType(#[from] ParseEventTypeError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::InvalidEventType(_) => (StatusCode::BAD_REQUEST, "INVALID_EVENT_TYPE"),
            ApiError::Registry(RegistryError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, "CIRCUIT_BREAKER_NOT_FOUND")
            }
            ApiError::Registry(RegistryError::AlreadyExists(_)) => {
                (StatusCode::CONFLICT, "CIRCUIT_BREAKER_ALREADY_EXISTS")
            }
            ApiError::Registry(RegistryError::Transition(_)) => {
                (StatusCode::CONFLICT, "INVALID_STATE_TRANSITION")
            }
            ApiError::Registry(RegistryError::Config(_)) => {
                (StatusCode::BAD_REQUEST, "INVALID_CONFIGURATION")
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
