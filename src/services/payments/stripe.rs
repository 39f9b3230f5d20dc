use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

use super::{
    check_reference, decode_response, guarded_send, http_client, GatewayOrder,
    GatewayOrderRequest, GatewayPayment, PaymentBridge, PaymentError,
};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    amount: i64,
    #[serde(default)]
    amount_received: i64,
    currency: String,
    status: String,
}

/// Stripe PaymentIntents client. The intent id doubles as the order ref.
pub struct StripeGateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
    breaker: CircuitBreaker,
}

impl StripeGateway {
    pub fn new(
        base_url: String,
        secret_key: String,
        timeout: Duration,
        breaker_config: CircuitBreakerConfig,
    ) -> Result<Self, PaymentError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key,
            breaker: CircuitBreaker::new("stripe", breaker_config),
        })
    }

    fn intent_form(request: &GatewayOrderRequest) -> Vec<(String, String)> {
        let mut form = vec![
            ("amount".to_string(), request.amount_minor.to_string()),
            ("currency".to_string(), request.currency.to_ascii_lowercase()),
            ("metadata[receipt]".to_string(), request.receipt.clone()),
        ];
        form.extend(
            request
                .notes
                .iter()
                .map(|(k, v)| (format!("metadata[{}]", k), v.clone())),
        );
        form
    }
}

#[async_trait]
impl PaymentBridge for StripeGateway {
    fn provider(&self) -> &'static str {
        "stripe"
    }

    #[instrument(skip(self, request), fields(receipt = %request.receipt))]
    async fn create_order(
        &self,
        request: GatewayOrderRequest,
    ) -> Result<GatewayOrder, PaymentError> {
        let builder = self
            .client
            .post(format!("{}/payment_intents", self.base_url))
            .bearer_auth(&self.secret_key)
            .form(&Self::intent_form(&request));

        let response = guarded_send(&self.breaker, builder).await?;
        let intent: PaymentIntent = decode_response(response, &request.receipt).await?;
        debug!(intent_id = %intent.id, "Stripe payment intent created");

        Ok(GatewayOrder {
            id: intent.id,
            amount_minor: intent.amount,
            currency: intent.currency.to_ascii_uppercase(),
        })
    }

    #[instrument(skip(self))]
    async fn verify(&self, payment_ref: &str) -> Result<GatewayPayment, PaymentError> {
        let payment_ref = check_reference(payment_ref)?;
        let builder = self
            .client
            .get(format!("{}/payment_intents/{}", self.base_url, payment_ref))
            .bearer_auth(&self.secret_key);

        let response = guarded_send(&self.breaker, builder).await?;
        let intent: PaymentIntent = decode_response(response, payment_ref).await?;

        Ok(GatewayPayment {
            captured: intent.status == "succeeded",
            order_id: Some(intent.id.clone()),
            id: intent.id,
            status: intent.status,
            amount_minor: intent.amount_received,
            currency: intent.currency.to_ascii_uppercase(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn form_flattens_notes_into_metadata() {
        let mut notes = BTreeMap::new();
        notes.insert("userId".to_string(), "u1".to_string());
        let form = StripeGateway::intent_form(&GatewayOrderRequest {
            amount_minor: 4200,
            currency: "INR".into(),
            receipt: "order_1".into(),
            notes,
        });
        assert!(form.contains(&("currency".into(), "inr".into())));
        assert!(form.contains(&("metadata[userId]".into(), "u1".into())));
        assert!(form.contains(&("amount".into(), "4200".into())));
    }
}
