use crate::handlers::common::{map_service_error, success_response};
use crate::{
    auth::AuthUser,
    entities::{order_history, OrderStatus},
    errors::ApiError,
    ApiResponse, AppState,
};
use axum::{extract::State, response::IntoResponse};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderHistoryEntry {
    pub order_id: Uuid,
    pub order_date: DateTime<Utc>,
    pub total_amount: Decimal,
    pub status: OrderStatus,
}

impl From<order_history::Model> for OrderHistoryEntry {
    fn from(model: order_history::Model) -> Self {
        Self {
            order_id: model.order_id,
            order_date: model.order_date,
            total_amount: model.total_amount,
            status: model.status,
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/history",
    summary = "List the caller's orders",
    responses(
        (status = 200, description = "Newest first", body = ApiResponse<Vec<OrderHistoryEntry>>),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn order_history(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let entries: Vec<OrderHistoryEntry> = state
        .services
        .order_history
        .list_for_user(user.user_id)
        .await
        .map_err(map_service_error)?
        .into_iter()
        .map(OrderHistoryEntry::from)
        .collect();

    Ok(success_response(entries))
}
