use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, instrument};

use super::{
    check_reference, decode_response, guarded_send, http_client, GatewayOrder,
    GatewayOrderRequest, GatewayPayment, PaymentBridge, PaymentError,
};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::webhooks::SignatureGenerator;

#[derive(Debug, Deserialize)]
struct RazorpayOrder {
    id: String,
    amount: i64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct RazorpayPayment {
    id: String,
    order_id: Option<String>,
    status: String,
    amount: i64,
    currency: String,
}

/// Razorpay Orders/Payments API client
pub struct RazorpayGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
    signer: SignatureGenerator,
    breaker: CircuitBreaker,
}

impl RazorpayGateway {
    pub fn new(
        base_url: String,
        key_id: String,
        key_secret: String,
        timeout: Duration,
        breaker_config: CircuitBreakerConfig,
    ) -> Result<Self, PaymentError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            key_id,
            signer: SignatureGenerator::new(key_secret.clone()),
            key_secret,
            breaker: CircuitBreaker::new("razorpay", breaker_config),
        })
    }
}

#[async_trait]
impl PaymentBridge for RazorpayGateway {
    fn provider(&self) -> &'static str {
        "razorpay"
    }

    #[instrument(skip(self, request), fields(receipt = %request.receipt))]
    async fn create_order(
        &self,
        request: GatewayOrderRequest,
    ) -> Result<GatewayOrder, PaymentError> {
        let body = json!({
            "amount": request.amount_minor,
            "currency": request.currency,
            "receipt": request.receipt,
            "payment_capture": 1,
            "notes": request.notes,
        });

        let builder = self
            .client
            .post(format!("{}/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body);

        let response = guarded_send(&self.breaker, builder).await?;
        let order: RazorpayOrder = decode_response(response, &request.receipt).await?;
        debug!(gateway_order_id = %order.id, "Razorpay order created");

        Ok(GatewayOrder {
            id: order.id,
            amount_minor: order.amount,
            currency: order.currency,
        })
    }

    #[instrument(skip(self))]
    async fn verify(&self, payment_ref: &str) -> Result<GatewayPayment, PaymentError> {
        let payment_ref = check_reference(payment_ref)?;
        let builder = self
            .client
            .get(format!("{}/payments/{}", self.base_url, payment_ref))
            .basic_auth(&self.key_id, Some(&self.key_secret));

        let response = guarded_send(&self.breaker, builder).await?;
        let payment: RazorpayPayment = decode_response(response, payment_ref).await?;

        Ok(GatewayPayment {
            captured: payment.status == "captured",
            id: payment.id,
            order_id: payment.order_id,
            status: payment.status,
            amount_minor: payment.amount,
            currency: payment.currency,
        })
    }

    /// Razorpay checkout signs `"{order_id}|{payment_id}"` with the key secret.
    fn verify_checkout_signature(
        &self,
        order_ref: &str,
        payment_ref: &str,
        signature: &str,
    ) -> Option<bool> {
        Some(
            self.signer
                .verify(&format!("{}|{}", order_ref, payment_ref), signature),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> RazorpayGateway {
        RazorpayGateway::new(
            "http://localhost:1/v1/".into(),
            "rzp_test_key".into(),
            "rzp_test_secret".into(),
            Duration::from_secs(1),
            CircuitBreakerConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn base_url_is_normalized() {
        assert_eq!(gateway().base_url, "http://localhost:1/v1");
    }

    #[test]
    fn checkout_signature_round_trip() {
        let gw = gateway();
        let sig = SignatureGenerator::new("rzp_test_secret".into()).sign("order_A|pay_B");
        assert_eq!(gw.verify_checkout_signature("order_A", "pay_B", &sig), Some(true));
        assert_eq!(gw.verify_checkout_signature("order_A", "pay_C", &sig), Some(false));
    }
}
