//! Pharmacist back office: prescription review and projection repair.

use crate::handlers::common::{map_service_error, message_response, success_response, validate_input};
use crate::{
    errors::{ApiError, ErrorBody},
    services::PendingPrescriptionLine,
    ApiResponse, AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Serialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApproveCartItemRequest {
    pub is_approved: bool,
}

#[derive(Debug, Deserialize, Serialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BulkApproveRequest {
    pub user_id: Uuid,
    pub approve: bool,
}

#[utoipa::path(
    put,
    path = "/api/v1/medicines/approve-cart-item/{item_id}",
    summary = "Approve or reject one prescription line",
    params(("item_id" = Uuid, Path, description = "Cart line id")),
    request_body = ApproveCartItemRequest,
    responses(
        (status = 200, description = "Line updated"),
        (status = 403, description = "Admin role required", body = ErrorBody),
        (status = 404, description = "Cart line not found", body = ErrorBody),
    ),
    security(("Bearer" = [])),
    tag = "prescriptions"
)]
pub async fn approve_cart_item(
    State(state): State<AppState>,
    Path(item_id): Path<Uuid>,
    Json(payload): Json<ApproveCartItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let line = state
        .services
        .prescriptions
        .set_approval(item_id, payload.is_approved)
        .await
        .map_err(map_service_error)?;

    let verb = if line.is_approved { "approved" } else { "rejected" };
    Ok(message_response(
        format!("Cart item {}", verb),
        json!({
            "id": line.id,
            "medicineId": line.medicine_id,
            "quantity": line.quantity,
            "prescriptionRequired": line.prescription_required,
            "isApproved": line.is_approved,
        }),
    ))
}

#[utoipa::path(
    put,
    path = "/api/v1/medicines/bulk-approve-cart-items",
    summary = "Approve or reject every prescription line in a user's cart",
    request_body = BulkApproveRequest,
    responses(
        (status = 200, description = "Lines updated"),
        (status = 404, description = "User has no cart", body = ErrorBody),
    ),
    security(("Bearer" = [])),
    tag = "prescriptions"
)]
pub async fn bulk_approve_cart_items(
    State(state): State<AppState>,
    Json(payload): Json<BulkApproveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let changed = state
        .services
        .prescriptions
        .bulk_set_approval(payload.user_id, payload.approve)
        .await
        .map_err(map_service_error)?;

    let verb = if payload.approve { "approved" } else { "rejected" };
    Ok(message_response(
        format!("{} items {}", changed, verb),
        json!({ "updated": changed }),
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/medicines/prescription-cart/{user_id}",
    summary = "List prescription lines awaiting review",
    params(("user_id" = Uuid, Path, description = "Cart owner")),
    responses(
        (status = 200, description = "Pending lines in cart order", body = ApiResponse<Vec<PendingPrescriptionLine>>),
        (status = 404, description = "User has no cart", body = ErrorBody),
    ),
    security(("Bearer" = [])),
    tag = "prescriptions"
)]
pub async fn prescription_cart(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let lines = state
        .services
        .prescriptions
        .pending_lines(user_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(lines))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/users/{user_id}/order-history/rebuild",
    summary = "Rebuild a user's order history from stored orders",
    params(("user_id" = Uuid, Path, description = "User whose history is rebuilt")),
    responses(
        (status = 200, description = "History rebuilt"),
        (status = 404, description = "User not found", body = ErrorBody),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn rebuild_order_history(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let entries = state
        .services
        .order_history
        .rebuild_for_user(user_id)
        .await
        .map_err(map_service_error)?;

    Ok(message_response(
        "Order history rebuilt",
        json!({ "userId": user_id, "entries": entries }),
    ))
}
