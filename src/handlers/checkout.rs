use crate::handlers::common::{map_service_error, message_response, validate_input};
use crate::{
    auth::AuthUser,
    entities::PaymentMethod,
    errors::{ApiError, ErrorBody},
    services::{PaymentOrder, PlaceOrderRequest, PlacedOrder},
    ApiResponse, AppState,
};
use axum::{
    extract::{Json, State},
    response::IntoResponse,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Deserialize, Serialize, Validate, ToSchema)]
pub struct CreatePaymentOrderRequest {
    /// Amount the client expects to pay, in major units
    pub amount: Decimal,
}

#[derive(Debug, Deserialize, Serialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    #[validate(length(min = 1, max = 128))]
    pub payment_id: String,
    #[validate(length(min = 1, max = 128))]
    pub order_id: String,
    #[validate(length(max = 256))]
    pub signature: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BuyMedicineRequest {
    pub payment_method: PaymentMethod,
    pub total_amount: Option<Decimal>,
    #[validate(length(max = 128))]
    pub payment_id: Option<String>,
    #[validate(length(max = 128))]
    pub order_id: Option<String>,
    #[validate(length(max = 256))]
    pub signature: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/v1/cart/payment/gateway/create-order",
    summary = "Create gateway payment order",
    request_body = CreatePaymentOrderRequest,
    responses(
        (status = 200, description = "Gateway order created", body = ApiResponse<PaymentOrder>),
        (status = 400, description = "Invalid amount, empty cart or amount mismatch", body = ErrorBody),
        (status = 403, description = "Prescription approval pending", body = ErrorBody),
        (status = 500, description = "Payment gateway error", body = ErrorBody),
    ),
    security(("Bearer" = [])),
    tag = "checkout"
)]
pub async fn create_payment_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreatePaymentOrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let order = state
        .services
        .checkout
        .create_payment_order(user.user_id, payload.amount)
        .await
        .map_err(map_service_error)?;

    Ok(message_response("Payment order created", order))
}

#[utoipa::path(
    post,
    path = "/api/v1/cart/payment/gateway/verify",
    summary = "Verify gateway payment and place order",
    request_body = VerifyPaymentRequest,
    responses(
        (status = 200, description = "Order placed", body = ApiResponse<PlacedOrder>),
        (status = 400, description = "Payment not captured or verification failed", body = ErrorBody),
        (status = 403, description = "Payment was started from another account", body = ErrorBody),
        (status = 500, description = "Payment succeeded but order failed", body = ErrorBody),
    ),
    security(("Bearer" = [])),
    tag = "checkout"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<VerifyPaymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let checkout = &state.services.checkout;
    let placed = checkout
        .place_order(PlaceOrderRequest {
            user_id: user.user_id,
            payment_method: checkout.gateway_method(),
            total_amount_claimed: None,
            payment_ref: Some(payload.payment_id),
            order_ref: Some(payload.order_id),
            signature: payload.signature,
        })
        .await
        .map_err(map_service_error)?;

    Ok(message_response("Payment verified and order placed", placed))
}

#[utoipa::path(
    post,
    path = "/api/v1/buy-medicine",
    summary = "Place order",
    description = "Cash on delivery, or an online payment that was already captured by the gateway",
    request_body = BuyMedicineRequest,
    responses(
        (status = 200, description = "Order placed", body = ApiResponse<PlacedOrder>),
        (status = 400, description = "Validation, stock or payment failure", body = ErrorBody),
        (status = 403, description = "Prescription approval pending or payment from another account", body = ErrorBody),
        (status = 409, description = "Cart changed during checkout", body = ErrorBody),
        (status = 500, description = "Payment succeeded but order failed", body = ErrorBody),
    ),
    security(("Bearer" = [])),
    tag = "checkout"
)]
pub async fn buy_medicine(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<BuyMedicineRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let placed = state
        .services
        .checkout
        .place_order(PlaceOrderRequest {
            user_id: user.user_id,
            payment_method: payload.payment_method,
            total_amount_claimed: payload.total_amount,
            payment_ref: payload.payment_id,
            order_ref: payload.order_id,
            signature: payload.signature,
        })
        .await
        .map_err(map_service_error)?;

    Ok(message_response("Order placed successfully", placed))
}
