use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::SignatureGenerator;
use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::events::{Event, EventHandler};

pub const TIMESTAMP_HEADER: &str = "X-Timestamp";
pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Alert body posted to the operator webhook
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorAlert {
    #[serde(rename = "type")]
    pub alert_type: String,
    pub user_id: Uuid,
    pub payment_ref: String,
    pub order_ref: Option<String>,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Notifies operators about captured payments that have no order.
#[derive(Clone)]
pub struct OperatorAlertService {
    client: reqwest::Client,
    webhook_url: Option<String>,
    signature_generator: Option<Arc<SignatureGenerator>>,
    max_retries: u32,
    backoff_base: Duration,
}

impl OperatorAlertService {
    pub fn new(
        webhook_url: Option<String>,
        webhook_secret: Option<String>,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("webhook client: {}", e)))?;

        Ok(Self {
            client,
            webhook_url,
            signature_generator: webhook_secret
                .map(|secret| Arc::new(SignatureGenerator::new(secret))),
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
        })
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self, ServiceError> {
        Self::new(
            cfg.operator_webhook_url.clone(),
            cfg.operator_webhook_secret.clone(),
        )
    }

    /// Overrides the first retry delay; later retries double it.
    pub fn with_backoff(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Deliver an alert with retry and exponential backoff
    #[instrument(skip(self, alert), fields(payment_ref = %alert.payment_ref))]
    pub async fn send_alert(&self, alert: &OperatorAlert) -> Result<(), ServiceError> {
        let Some(webhook_url) = self.webhook_url.as_deref() else {
            error!(
                user_id = %alert.user_id,
                payment_ref = %alert.payment_ref,
                order_ref = ?alert.order_ref,
                reason = %alert.reason,
                "No operator webhook configured; manual reconciliation required"
            );
            return Ok(());
        };

        let body = serde_json::to_string(alert)?;
        let timestamp = Utc::now().timestamp().to_string();
        let signature = self
            .signature_generator
            .as_ref()
            .map(|gen| gen.sign_payload(&timestamp, &body));

        for attempt in 1..=self.max_retries {
            let mut request = self
                .client
                .post(webhook_url)
                .header("Content-Type", "application/json")
                .header(TIMESTAMP_HEADER, &timestamp)
                .body(body.clone());

            if let Some(ref sig) = signature {
                request = request.header(SIGNATURE_HEADER, sig);
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    info!("Operator alert delivered to {}", webhook_url);
                    return Ok(());
                }
                Ok(response) => warn!(
                    "Operator alert rejected with status: {} (attempt {}/{})",
                    response.status(),
                    attempt,
                    self.max_retries
                ),
                Err(e) => warn!(
                    "Operator alert delivery error: {} (attempt {}/{})",
                    e, attempt, self.max_retries
                ),
            }

            if attempt < self.max_retries {
                tokio::time::sleep(self.backoff_base * 2_u32.pow(attempt - 1)).await;
            }
        }

        error!(
            payment_ref = %alert.payment_ref,
            "Operator alert delivery failed after {} attempts",
            self.max_retries
        );
        Err(ServiceError::ExternalServiceError(format!(
            "Failed to deliver operator alert after {} retries",
            self.max_retries
        )))
    }
}

#[async_trait]
impl EventHandler for OperatorAlertService {
    async fn handle_event(&self, event: Event) -> Result<(), String> {
        let Event::CheckoutInconsistent {
            user_id,
            payment_ref,
            order_ref,
            reason,
            occurred_at,
        } = event
        else {
            return Ok(());
        };

        let alert = OperatorAlert {
            alert_type: "checkout_inconsistent".to_string(),
            user_id,
            payment_ref,
            order_ref,
            reason,
            occurred_at,
        };
        self.send_alert(&alert).await.map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_serializes_in_camel_case() {
        let alert = OperatorAlert {
            alert_type: "checkout_inconsistent".into(),
            user_id: Uuid::nil(),
            payment_ref: "pay_1".into(),
            order_ref: None,
            reason: "stock race".into(),
            occurred_at: Utc::now(),
        };
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["type"], "checkout_inconsistent");
        assert_eq!(json["paymentRef"], "pay_1");
        assert!(json.get("occurredAt").is_some());
    }

    #[tokio::test]
    async fn other_events_are_ignored() {
        let service = OperatorAlertService::new(None, None).unwrap();
        let result = service
            .handle_event(Event::OrderHistoryRebuilt {
                user_id: Uuid::new_v4(),
                entries: 1,
            })
            .await;
        assert!(result.is_ok());
    }
}
