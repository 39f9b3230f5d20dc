use crate::errors::{ApiError, ServiceError};
use crate::ApiResponse;
use axum::{
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use validator::Validate;

/// Standard success envelope
pub fn success_response<T: Serialize>(data: T) -> Response {
    Json(ApiResponse::success(data)).into_response()
}

/// Success envelope with a human-readable message
pub fn message_response<T: Serialize>(message: impl Into<String>, data: T) -> Response {
    Json(ApiResponse::success_with_message(message.into(), data)).into_response()
}

/// Validate request input
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ApiError> {
    input
        .validate()
        .map_err(|e| ApiError::ValidationError(format!("Validation failed: {}", e)))
}

/// Map service errors to API errors
pub fn map_service_error(err: ServiceError) -> ApiError {
    ApiError::ServiceError(err)
}
