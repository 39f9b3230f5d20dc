//! Payment gateway bridge.
//!
//! Checkout talks to exactly one gateway, chosen from configuration at
//! start-up and injected as `Arc<dyn PaymentBridge>`. Amounts cross this
//! boundary in minor units (paise, cents).

pub mod razorpay;
pub mod sandbox;
pub mod stripe;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, Response, StatusCode};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
use crate::config::AppConfig;

pub use razorpay::RazorpayGateway;
pub use sandbox::SandboxGateway;
pub use stripe::StripeGateway;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("gateway request failed: {0}")]
    Http(String),

    #[error("gateway returned {status}: {message}")]
    Gateway { status: u16, message: String },

    #[error("unexpected gateway response: {0}")]
    Decode(String),

    #[error("{0} not found at gateway")]
    NotFound(String),

    #[error("payment gateway circuit open")]
    CircuitOpen,

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("malformed gateway reference: {0:?}")]
    InvalidReference(String),

    #[error("payment gateway misconfigured: {0}")]
    Config(String),
}

impl From<reqwest::Error> for PaymentError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            PaymentError::Decode(err.to_string())
        } else {
            PaymentError::Http(err.to_string())
        }
    }
}

impl From<CircuitBreakerError<PaymentError>> for PaymentError {
    fn from(err: CircuitBreakerError<PaymentError>) -> Self {
        match err {
            CircuitBreakerError::CircuitOpen => PaymentError::CircuitOpen,
            CircuitBreakerError::Inner(inner) => inner,
        }
    }
}

/// Remote order creation request. `amount_minor` is in the currency's minor unit.
#[derive(Debug, Clone)]
pub struct GatewayOrderRequest {
    pub amount_minor: i64,
    pub currency: String,
    pub receipt: String,
    pub notes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayOrder {
    pub id: String,
    pub amount_minor: i64,
    pub currency: String,
}

/// Gateway view of a payment at verification time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayPayment {
    pub id: String,
    /// Gateway order the payment belongs to, when the gateway reports one
    pub order_id: Option<String>,
    pub status: String,
    pub captured: bool,
    pub amount_minor: i64,
    pub currency: String,
}

impl GatewayPayment {
    pub fn amount(&self) -> Decimal {
        from_minor_units(self.amount_minor)
    }
}

#[async_trait]
pub trait PaymentBridge: Send + Sync {
    /// Short provider name stored on quotes ("razorpay", "stripe", "sandbox")
    fn provider(&self) -> &'static str;

    async fn create_order(&self, request: GatewayOrderRequest)
        -> Result<GatewayOrder, PaymentError>;

    async fn verify(&self, payment_ref: &str) -> Result<GatewayPayment, PaymentError>;

    /// Checks a client-supplied checkout signature. `None` when the provider
    /// has no such signature scheme.
    fn verify_checkout_signature(
        &self,
        _order_ref: &str,
        _payment_ref: &str,
        _signature: &str,
    ) -> Option<bool> {
        None
    }
}

/// Converts a major-unit amount to minor units, rounding half away from zero.
pub fn to_minor_units(amount: Decimal) -> Result<i64, PaymentError> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| PaymentError::InvalidAmount(amount.to_string()))
}

pub fn from_minor_units(amount_minor: i64) -> Decimal {
    Decimal::new(amount_minor, 2)
}

/// Receipt identifier sent with gateway orders
pub fn receipt_for(now: DateTime<Utc>) -> String {
    format!("order_{}", now.timestamp_millis())
}

/// Gateway ids are `[A-Za-z0-9_]` only; anything else never reaches a URL path.
pub fn check_reference(reference: &str) -> Result<&str, PaymentError> {
    let well_formed = !reference.is_empty()
        && reference.len() <= 128
        && reference
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_');
    if well_formed {
        Ok(reference)
    } else {
        Err(PaymentError::InvalidReference(reference.to_string()))
    }
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, PaymentError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| PaymentError::Config(e.to_string()))
}

/// Sends `request` through `breaker`. Transport errors and 5xx responses
/// count as breaker failures; 4xx responses are returned for the caller to map.
pub(crate) async fn guarded_send(
    breaker: &CircuitBreaker,
    request: RequestBuilder,
) -> Result<Response, PaymentError> {
    breaker
        .call(move || async move {
            let response = request.send().await?;
            let status = response.status();
            if status.is_server_error() {
                let message = response.text().await.unwrap_or_default();
                return Err(PaymentError::Gateway {
                    status: status.as_u16(),
                    message,
                });
            }
            Ok(response)
        })
        .await
        .map_err(PaymentError::from)
}

/// Decodes a successful response or maps a client error.
pub(crate) async fn decode_response<T: DeserializeOwned>(
    response: Response,
    reference: &str,
) -> Result<T, PaymentError> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(PaymentError::NotFound(reference.to_string()));
    }
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), reference, "Gateway rejected request");
        return Err(PaymentError::Gateway {
            status: status.as_u16(),
            message,
        });
    }
    response
        .json::<T>()
        .await
        .map_err(|e| PaymentError::Decode(e.to_string()))
}

fn breaker_config(cfg: &AppConfig) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: cfg.circuit_breaker_failure_threshold,
        timeout: cfg.circuit_breaker_timeout(),
        ..Default::default()
    }
}

/// Builds the configured gateway. Called once at start-up.
pub fn build_bridge(cfg: &AppConfig) -> Result<Arc<dyn PaymentBridge>, PaymentError> {
    let provider = cfg.payment_provider.to_ascii_lowercase();
    info!(provider = %provider, "Configuring payment gateway");

    match provider.as_str() {
        "sandbox" => Ok(Arc::new(SandboxGateway::new())),
        "razorpay" => {
            let key_id = cfg
                .razorpay_key_id
                .clone()
                .ok_or_else(|| PaymentError::Config("razorpay_key_id is not set".into()))?;
            let key_secret = cfg
                .razorpay_key_secret
                .clone()
                .ok_or_else(|| PaymentError::Config("razorpay_key_secret is not set".into()))?;
            Ok(Arc::new(RazorpayGateway::new(
                cfg.razorpay_api_base.clone(),
                key_id,
                key_secret,
                cfg.payment_timeout(),
                breaker_config(cfg),
            )?))
        }
        "stripe" => {
            let secret_key = cfg
                .stripe_secret_key
                .clone()
                .ok_or_else(|| PaymentError::Config("stripe_secret_key is not set".into()))?;
            Ok(Arc::new(StripeGateway::new(
                cfg.stripe_api_base.clone(),
                secret_key,
                cfg.payment_timeout(),
                breaker_config(cfg),
            )?))
        }
        other => Err(PaymentError::Config(format!(
            "unknown payment provider '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[rstest]
    #[case(dec!(10), 1000)]
    #[case(dec!(12.345), 1235)]
    #[case(dec!(12.344), 1234)]
    #[case(dec!(0.005), 1)]
    #[case(dec!(-0.005), -1)]
    fn minor_units_round_half_away_from_zero(#[case] amount: Decimal, #[case] expected: i64) {
        assert_eq!(to_minor_units(amount).unwrap(), expected);
    }

    #[test]
    fn minor_units_convert_back_exactly() {
        assert_eq!(from_minor_units(5025), dec!(50.25));
    }

    #[test]
    fn receipt_uses_epoch_millis() {
        let at = Utc.timestamp_millis_opt(1_717_000_000_123).unwrap();
        assert_eq!(receipt_for(at), "order_1717000000123");
    }

    #[rstest]
    #[case("pay_Rzp123")]
    #[case("pi_3PxYz_secret")]
    fn gateway_ids_pass_reference_check(#[case] reference: &str) {
        assert_eq!(check_reference(reference).unwrap(), reference);
    }

    #[rstest]
    #[case("")]
    #[case("../orders")]
    #[case("pay_1?expand=all")]
    #[case("pay_1/refunds")]
    #[case("pay 1")]
    #[case("pay_%2e%2e")]
    fn path_characters_fail_reference_check(#[case] reference: &str) {
        assert!(matches!(
            check_reference(reference),
            Err(PaymentError::InvalidReference(_))
        ));
    }

    #[test]
    fn unknown_provider_is_a_config_error() {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".into(),
            "x".repeat(64),
            "127.0.0.1".into(),
            8080,
            "development".into(),
        );
        cfg.payment_provider = "paypal".into();
        assert!(matches!(build_bridge(&cfg), Err(PaymentError::Config(_))));

        cfg.payment_provider = "razorpay".into();
        assert!(matches!(build_bridge(&cfg), Err(PaymentError::Config(_))));

        cfg.payment_provider = "sandbox".into();
        assert_eq!(build_bridge(&cfg).unwrap().provider(), "sandbox");
    }
}
