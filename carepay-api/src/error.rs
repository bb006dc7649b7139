//! HTTP error mapping
//!
//! Translates engine errors into status codes without leaking internal
//! detail for processor failures; transient errors are retried inside the
//! engine and should never reach a response in normal operation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use carepay_engine::error::PayoutError;

#[derive(Debug)]
pub struct ApiError(pub PayoutError);

impl From<PayoutError> for ApiError {
    fn from(err: PayoutError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            PayoutError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            PayoutError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            PayoutError::AccountCreation(msg) => (StatusCode::CONFLICT, msg.clone()),
            PayoutError::AccountNotReady(msg) => (StatusCode::CONFLICT, msg.clone()),
            PayoutError::StateTransition { .. } | PayoutError::InvariantViolation(_) => {
                (StatusCode::CONFLICT, self.0.to_string())
            }
            other => {
                error!(error = %other, "internal error serving request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
