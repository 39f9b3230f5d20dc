use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::services::payments::PaymentError;
use crate::tracing::{log_error, ErrorKind};
use crate::ApiResponse;

/// Machine-readable error block of the response envelope
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "code": "PRESCRIPTION_PENDING",
    "details": "Prescription approval pending for Amoxicillin 500mg"
}))]
pub struct ErrorBody {
    /// Stable error code clients can branch on
    #[schema(example = "PRESCRIPTION_PENDING")]
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// References reported when a captured payment could not be turned into an order.
#[derive(Debug, Clone, Serialize)]
pub struct InconsistentCheckout {
    pub payment_ref: String,
    pub order_ref: Option<String>,
    pub reason: String,
    pub support_contact: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    ValidationError(String),

    #[error("Quantity must be at least 1")]
    InvalidQuantity,

    #[error("{0} is already in the cart")]
    DuplicateLine(String),

    #[error("Amount mismatch: expected {expected}, received {claimed}")]
    AmountMismatch { expected: String, claimed: String },

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Insufficient stock for {0}")]
    InsufficientStock(String),

    #[error("Prescription approval pending for {0}")]
    PrescriptionPending(String),

    #[error("Payment {0} has not been captured")]
    PaymentNotCaptured(String),

    #[error("Payment verification failed: {0}")]
    PaymentVerificationFailed(String),

    #[error("Cart changed since the payment order was created")]
    CartChanged,

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(Uuid),

    #[error("Checkout inconsistent after payment {}: {}", .0.payment_ref, .0.reason)]
    Inconsistent(Box<InconsistentCheckout>),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Circuit breaker open")]
    CircuitBreakerOpen,

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl From<PaymentError> for ServiceError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::CircuitOpen => ServiceError::CircuitBreakerOpen,
            other => ServiceError::ExternalServiceError(other.to_string()),
        }
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_)
            | Self::InvalidQuantity
            | Self::DuplicateLine(_)
            | Self::AmountMismatch { .. }
            | Self::EmptyCart
            | Self::InsufficientStock(_)
            | Self::PaymentNotCaptured(_)
            | Self::PaymentVerificationFailed(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::PrescriptionPending(_) | Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::CartChanged | Self::ConcurrentModification(_) => StatusCode::CONFLICT,
            Self::CircuitBreakerOpen => StatusCode::SERVICE_UNAVAILABLE,
            Self::DatabaseError(_)
            | Self::Inconsistent(_)
            | Self::ExternalServiceError(_)
            | Self::InternalError(_)
            | Self::SerializationError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code placed in `error.code`.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::InvalidQuantity => "INVALID_QUANTITY",
            Self::DuplicateLine(_) => "DUPLICATE_LINE",
            Self::AmountMismatch { .. } => "AMOUNT_MISMATCH",
            Self::EmptyCart => "EMPTY_CART",
            Self::InsufficientStock(_) => "INSUFFICIENT_STOCK",
            Self::PrescriptionPending(_) => "PRESCRIPTION_PENDING",
            Self::PaymentNotCaptured(_) => "PAYMENT_NOT_CAPTURED",
            Self::PaymentVerificationFailed(_) => "PAYMENT_VERIFICATION_FAILED",
            Self::CartChanged => "CART_CHANGED",
            Self::ConcurrentModification(_) => "CONCURRENT_MODIFICATION",
            Self::Inconsistent(_) => "CHECKOUT_INCONSISTENT",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::ExternalServiceError(_) => "PAYMENT_GATEWAY_ERROR",
            Self::CircuitBreakerOpen => "SERVICE_UNAVAILABLE",
            Self::DatabaseError(_)
            | Self::InternalError(_)
            | Self::SerializationError(_)
            | Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_)
            | Self::InternalError(_)
            | Self::SerializationError(_)
            | Self::Other(_) => "Internal server error".to_string(),
            Self::ExternalServiceError(_) => "Payment gateway error".to_string(),
            Self::CircuitBreakerOpen => "Service temporarily unavailable".to_string(),
            Self::Inconsistent(_) => {
                "Payment succeeded but order failed. Our team has been notified.".to_string()
            }
            Self::ConcurrentModification(_) => {
                "The cart was modified concurrently, please retry".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Payload placed in `data` for errors that carry client-relevant references.
    pub fn response_data(&self) -> Option<Value> {
        match self {
            Self::Inconsistent(info) => Some(json!({
                "paymentId": info.payment_ref,
                "orderId": info.order_ref,
                "supportContact": info.support_contact,
            })),
            _ => None,
        }
    }

    fn log_kind(&self) -> ErrorKind {
        match self {
            Self::DatabaseError(_) => ErrorKind::Database,
            Self::Inconsistent(_) => ErrorKind::Checkout,
            Self::ExternalServiceError(_) | Self::CircuitBreakerOpen => ErrorKind::External,
            _ => ErrorKind::Internal,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            log_error(&self, self.log_kind(), Some("request failed"));
        }

        let body = ApiResponse::<Value>::failure(
            self.response_message(),
            ErrorBody {
                code: self.error_code().to_string(),
                details: None,
            },
            self.response_data(),
        );

        (status, Json(body)).into_response()
    }
}

/// API Error type for HTTP responses
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Service error: {0}")]
    ServiceError(#[from] ServiceError),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Bad request: {message}")]
    BadRequest {
        message: String,
        error_code: Option<String>,
    },

    #[error("Unauthorized")]
    Unauthorized,
}

impl From<DbErr> for ApiError {
    fn from(err: DbErr) -> Self {
        ApiError::ServiceError(ServiceError::DatabaseError(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Delegate to ServiceError's unified status/message methods when applicable
        let (status, message, error) = match self {
            ApiError::ServiceError(service_error) => return service_error.into_response(),
            ApiError::ValidationError(details) => (
                StatusCode::BAD_REQUEST,
                "Validation failed".to_string(),
                ErrorBody {
                    code: "VALIDATION_ERROR".to_string(),
                    details: Some(details),
                },
            ),
            ApiError::BadRequest {
                message,
                error_code,
            } => (
                StatusCode::BAD_REQUEST,
                message,
                ErrorBody {
                    code: error_code.unwrap_or_else(|| "BAD_REQUEST".to_string()),
                    details: None,
                },
            ),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Unauthorized".to_string(),
                ErrorBody {
                    code: "UNAUTHORIZED".to_string(),
                    details: None,
                },
            ),
        };

        (status, Json(ApiResponse::<Value>::failure(message, error, None))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> Value {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn service_error_response_includes_request_id() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("req-123"), async {
                ServiceError::NotFound("Cart not found".into()).into_response()
            })
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let payload = body_json(response).await;
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["requestId"], "req-123");
        assert_eq!(payload["error"]["code"], "NOT_FOUND");
        assert_eq!(payload["message"], "Cart not found");
    }

    #[tokio::test]
    async fn inconsistent_checkout_exposes_refs_and_support_contact() {
        let err = ServiceError::Inconsistent(Box::new(InconsistentCheckout {
            payment_ref: "pay_123".into(),
            order_ref: Some("order_456".into()),
            reason: "stock race".into(),
            support_contact: "help@pharmacy.example".into(),
        }));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let payload = body_json(response).await;
        assert_eq!(payload["error"]["code"], "CHECKOUT_INCONSISTENT");
        assert_eq!(
            payload["message"],
            "Payment succeeded but order failed. Our team has been notified."
        );
        assert_eq!(payload["data"]["paymentId"], "pay_123");
        assert_eq!(payload["data"]["orderId"], "order_456");
        assert_eq!(payload["data"]["supportContact"], "help@pharmacy.example");
    }

    #[tokio::test]
    async fn api_validation_error_carries_details() {
        let response = ApiError::ValidationError("quantity: range".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let payload = body_json(response).await;
        assert_eq!(payload["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(payload["error"]["details"], "quantity: range");
    }

    #[test]
    fn service_error_status_code_mapping() {
        assert_eq!(ServiceError::InvalidQuantity.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ServiceError::DuplicateLine("Paracetamol".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ServiceError::EmptyCart.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ServiceError::InsufficientStock("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::PrescriptionPending("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ServiceError::PaymentNotCaptured("pay_1".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ServiceError::CartChanged.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            ServiceError::ConcurrentModification(Uuid::new_v4()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::Unauthorized("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ServiceError::ExternalServiceError("timeout".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ServiceError::CircuitBreakerOpen.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn response_message_hides_internal_details() {
        assert_eq!(
            ServiceError::DatabaseError(DbErr::Custom("constraint users_pkey".into()))
                .response_message(),
            "Internal server error"
        );
        assert_eq!(
            ServiceError::ExternalServiceError("401 from gateway: bad key".into())
                .response_message(),
            "Payment gateway error"
        );
        assert_eq!(
            ServiceError::InsufficientStock("Cetirizine 10mg".into()).response_message(),
            "Insufficient stock for Cetirizine 10mg"
        );
    }

    #[test]
    fn payment_errors_map_to_gateway_failures() {
        assert!(matches!(
            ServiceError::from(PaymentError::CircuitOpen),
            ServiceError::CircuitBreakerOpen
        ));
        assert!(matches!(
            ServiceError::from(PaymentError::Http("connection reset".into())),
            ServiceError::ExternalServiceError(_)
        ));
    }
}
