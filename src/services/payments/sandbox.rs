use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use super::{GatewayOrder, GatewayOrderRequest, GatewayPayment, PaymentBridge, PaymentError};

/// In-process gateway for development and tests.
///
/// Orders are kept in memory; payments only exist once [`SandboxGateway::capture`]
/// or [`SandboxGateway::authorize_only`] simulates the customer paying.
#[derive(Default)]
pub struct SandboxGateway {
    orders: DashMap<String, GatewayOrder>,
    payments: DashMap<String, GatewayPayment>,
}

impl SandboxGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order(&self, order_ref: &str) -> Option<GatewayOrder> {
        self.orders.get(order_ref).map(|o| o.value().clone())
    }

    /// Records a captured payment of `amount_minor` against `order_ref`.
    pub fn capture(&self, order_ref: &str, amount_minor: i64) -> String {
        let currency = self
            .order(order_ref)
            .map(|o| o.currency)
            .unwrap_or_else(|| "INR".to_string());
        self.record(order_ref, amount_minor, currency, "captured", true)
    }

    /// Records a payment that was authorized but never captured.
    pub fn authorize_only(&self, order_ref: &str) -> String {
        let (amount, currency) = self
            .order(order_ref)
            .map(|o| (o.amount_minor, o.currency))
            .unwrap_or((0, "INR".to_string()));
        self.record(order_ref, amount, currency, "authorized", false)
    }

    fn record(
        &self,
        order_ref: &str,
        amount_minor: i64,
        currency: String,
        status: &str,
        captured: bool,
    ) -> String {
        let id = format!("pay_sbx_{}", Uuid::new_v4().simple());
        self.payments.insert(
            id.clone(),
            GatewayPayment {
                id: id.clone(),
                order_id: Some(order_ref.to_string()),
                status: status.to_string(),
                captured,
                amount_minor,
                currency,
            },
        );
        id
    }
}

#[async_trait]
impl PaymentBridge for SandboxGateway {
    fn provider(&self) -> &'static str {
        "sandbox"
    }

    async fn create_order(
        &self,
        request: GatewayOrderRequest,
    ) -> Result<GatewayOrder, PaymentError> {
        if request.amount_minor <= 0 {
            return Err(PaymentError::InvalidAmount(request.amount_minor.to_string()));
        }
        let order = GatewayOrder {
            id: format!("order_sbx_{}", Uuid::new_v4().simple()),
            amount_minor: request.amount_minor,
            currency: request.currency,
        };
        debug!(gateway_order_id = %order.id, receipt = %request.receipt, "Sandbox order created");
        self.orders.insert(order.id.clone(), order.clone());
        Ok(order)
    }

    async fn verify(&self, payment_ref: &str) -> Result<GatewayPayment, PaymentError> {
        self.payments
            .get(payment_ref)
            .map(|p| p.value().clone())
            .ok_or_else(|| PaymentError::NotFound(payment_ref.to_string()))
    }
}
