use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::time::Instant;
use utoipa::ToSchema;

use crate::{db, ApiResponse, AppState};

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub database: String,
    pub latency_ms: u64,
}

#[utoipa::path(
    get,
    path = "/api/v1/health",
    summary = "Database health",
    responses(
        (status = 200, description = "Service and database are up", body = ApiResponse<HealthStatus>),
        (status = 503, description = "Database unreachable"),
    ),
    tag = "health"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let start = Instant::now();
    let database = db::check_connection(&state.db).await;
    let latency_ms = start.elapsed().as_millis() as u64;

    let (code, db_status) = match database {
        Ok(()) => (StatusCode::OK, "up"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "down"),
    };

    let health = HealthStatus {
        status: db_status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: db_status.to_string(),
        latency_ms,
    };
    (code, Json(ApiResponse::success(health)))
}
