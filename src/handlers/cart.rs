use crate::handlers::common::{map_service_error, success_response, validate_input};
use crate::{
    auth::AuthUser,
    errors::{ApiError, ErrorBody},
    services::CartView,
    ApiResponse, AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Serialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddToCartRequest {
    pub medicine_id: Uuid,
    /// Must be at least 1
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Serialize, Validate, ToSchema)]
pub struct UpdateQuantityRequest {
    pub quantity: i32,
}

#[utoipa::path(
    post,
    path = "/api/v1/cart/add",
    summary = "Add medicine to cart",
    request_body = AddToCartRequest,
    responses(
        (status = 200, description = "Line added", body = ApiResponse<CartView>),
        (status = 400, description = "Invalid quantity or medicine already in cart", body = ErrorBody),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 404, description = "User or medicine not found", body = ErrorBody),
    ),
    security(("Bearer" = [])),
    tag = "cart"
)]
pub async fn add_to_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<AddToCartRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let cart = state
        .services
        .cart
        .add_line(user.user_id, payload.medicine_id, payload.quantity)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

#[utoipa::path(
    put,
    path = "/api/v1/cart/update/{medicine_id}",
    summary = "Change line quantity",
    params(("medicine_id" = Uuid, Path, description = "Medicine in the cart")),
    request_body = UpdateQuantityRequest,
    responses(
        (status = 200, description = "Quantity updated", body = ApiResponse<CartView>),
        (status = 400, description = "Invalid quantity", body = ErrorBody),
        (status = 404, description = "Cart or line not found", body = ErrorBody),
    ),
    security(("Bearer" = [])),
    tag = "cart"
)]
pub async fn update_cart_line(
    State(state): State<AppState>,
    user: AuthUser,
    Path(medicine_id): Path<Uuid>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let cart = state
        .services
        .cart
        .update_quantity(user.user_id, medicine_id, payload.quantity)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

#[utoipa::path(
    delete,
    path = "/api/v1/cart/delete/{medicine_id}",
    summary = "Remove medicine from cart",
    description = "Removing a medicine that is not in the cart succeeds without changes",
    params(("medicine_id" = Uuid, Path, description = "Medicine to remove")),
    responses(
        (status = 200, description = "Line removed", body = ApiResponse<CartView>),
        (status = 404, description = "User has no cart", body = ErrorBody),
    ),
    security(("Bearer" = [])),
    tag = "cart"
)]
pub async fn remove_cart_line(
    State(state): State<AppState>,
    user: AuthUser,
    Path(medicine_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let cart = state
        .services
        .cart
        .remove_line(user.user_id, medicine_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

#[utoipa::path(
    get,
    path = "/api/v1/cart",
    summary = "Get cart",
    responses(
        (status = 200, description = "Cart with catalog details", body = ApiResponse<CartView>),
        (status = 404, description = "Cart not found", body = ErrorBody),
    ),
    security(("Bearer" = [])),
    tag = "cart"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let cart = state
        .services
        .cart
        .get_cart(user.user_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}
