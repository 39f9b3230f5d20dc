use axum::Json;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Medicart API",
        version = "0.1.0",
        description = r#"
# Medicart pharmacy checkout API

Cart management, prescription review and checkout for an online pharmacy.

## Authentication

Every endpoint except health and this document requires a bearer JWT issued by the
identity service:

```
Authorization: Bearer <your-jwt-token>
```

Prescription review and order-history repair require the `admin` role.

## Responses

All responses share one envelope:

```json
{
  "status": "error",
  "message": "Prescription approval pending for Amoxicillin 500mg",
  "error": { "code": "PRESCRIPTION_PENDING" },
  "requestId": "4f1c...",
  "timestamp": "2024-06-01T00:00:00Z"
}
```

When a payment was captured but the order could not be recorded the API answers
500 with `error.code = "CHECKOUT_INCONSISTENT"` and the payment references in `data`.
        "#,
        contact(name = "Medicart Support", email = "support@medicart.example"),
    ),
    servers((url = "http://localhost:8080", description = "Local development")),
    tags(
        (name = "cart", description = "Cart lines and totals"),
        (name = "checkout", description = "Gateway orders and order placement"),
        (name = "prescriptions", description = "Prescription review (admin)"),
        (name = "orders", description = "Order history"),
        (name = "health", description = "Health check")
    ),
    paths(
        crate::handlers::cart::add_to_cart,
        crate::handlers::cart::update_cart_line,
        crate::handlers::cart::remove_cart_line,
        crate::handlers::cart::get_cart,
        crate::handlers::checkout::create_payment_order,
        crate::handlers::checkout::verify_payment,
        crate::handlers::checkout::buy_medicine,
        crate::handlers::admin::approve_cart_item,
        crate::handlers::admin::bulk_approve_cart_items,
        crate::handlers::admin::prescription_cart,
        crate::handlers::admin::rebuild_order_history,
        crate::handlers::orders::order_history,
        crate::handlers::health::health_check,
    ),
    components(
        schemas(
            crate::errors::ErrorBody,
            crate::entities::PaymentMethod,
            crate::entities::PaymentStatus,
            crate::entities::OrderStatus,
            crate::services::CartView,
            crate::services::CartLineView,
            crate::services::PaymentOrder,
            crate::services::PlacedOrder,
            crate::services::PendingPrescriptionLine,
            crate::handlers::cart::AddToCartRequest,
            crate::handlers::cart::UpdateQuantityRequest,
            crate::handlers::checkout::CreatePaymentOrderRequest,
            crate::handlers::checkout::VerifyPaymentRequest,
            crate::handlers::checkout::BuyMedicineRequest,
            crate::handlers::admin::ApproveCartItemRequest,
            crate::handlers::admin::BulkApproveRequest,
            crate::handlers::orders::OrderHistoryEntry,
            crate::handlers::health::HealthStatus,
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "Bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Serves the generated document at `/api-docs/openapi.json`.
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDocV1::openapi())
}
