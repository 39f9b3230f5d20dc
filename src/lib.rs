//! Medicart API library
//!
//! Online pharmacy backend: per-user carts, the prescription approval gate,
//! checkout orchestration and payment gateway reconciliation.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod services;
pub mod tracing;
pub mod webhooks;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer};
use utoipa::ToSchema;

use crate::auth::{AuthRouterExt, AuthService, ADMIN_ROLE};
use crate::errors::ErrorBody;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<config::AppConfig>,
    pub event_sender: Arc<events::EventSender>,
    pub services: handlers::AppServices,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Envelope shared by every JSON response
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    fn new(
        status: ResponseStatus,
        message: Option<String>,
        data: Option<T>,
        error: Option<ErrorBody>,
    ) -> Self {
        Self {
            status,
            message,
            data,
            error,
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn success(data: T) -> Self {
        Self::new(ResponseStatus::Success, None, Some(data), None)
    }

    pub fn success_with_message(message: String, data: T) -> Self {
        Self::new(ResponseStatus::Success, Some(message), Some(data), None)
    }

    pub fn failure(message: String, error: ErrorBody, data: Option<T>) -> Self {
        Self::new(ResponseStatus::Error, Some(message), data, Some(error))
    }
}

/// Routes served under `/api/v1`
pub fn api_v1_routes() -> Router<AppState> {
    let customer = Router::new()
        .route("/cart", get(handlers::cart::get_cart))
        .route("/cart/add", post(handlers::cart::add_to_cart))
        .route(
            "/cart/update/:medicine_id",
            put(handlers::cart::update_cart_line),
        )
        .route(
            "/cart/delete/:medicine_id",
            delete(handlers::cart::remove_cart_line),
        )
        .route(
            "/cart/payment/gateway/create-order",
            post(handlers::checkout::create_payment_order),
        )
        .route(
            "/cart/payment/gateway/verify",
            post(handlers::checkout::verify_payment),
        )
        .route("/buy-medicine", post(handlers::checkout::buy_medicine))
        .route("/orders/history", get(handlers::orders::order_history))
        .with_auth();

    let admin = Router::new()
        .route(
            "/medicines/approve-cart-item/:item_id",
            put(handlers::admin::approve_cart_item),
        )
        .route(
            "/medicines/bulk-approve-cart-items",
            put(handlers::admin::bulk_approve_cart_items),
        )
        .route(
            "/medicines/prescription-cart/:user_id",
            get(handlers::admin::prescription_cart),
        )
        .route(
            "/admin/users/:user_id/order-history/rebuild",
            post(handlers::admin::rebuild_order_history),
        )
        .with_role(ADMIN_ROLE);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .merge(customer)
        .merge(admin)
}

/// Full application router with the request-scoped layers. CORS is added by the binary.
pub fn build_app(state: AppState, auth_service: Arc<AuthService>) -> Router {
    let cfg = state.config.clone();

    Router::new()
        .nest("/api/v1", api_v1_routes())
        .route("/api-docs/openapi.json", get(openapi::openapi_json))
        .layer(DefaultBodyLimit::max(cfg.max_body_size))
        .layer(TimeoutLayer::new(cfg.request_timeout()))
        .layer(crate::tracing::configure_http_tracing())
        .layer(CompressionLayer::new())
        .layer(axum::middleware::from_fn_with_state(
            auth_service,
            auth::provide_auth_service,
        ))
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state)
}
