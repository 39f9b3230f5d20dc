//! Checkout orchestration.
//!
//! `place_order` runs in two phases. Phase 1 reads the cart, catalog and
//! payment state without writing anything, so a rejection leaves every row
//! as it was. Phase 2 is a single transaction that decrements stock with a
//! guarded update, writes the order, its lines and the history projection,
//! consumes the payment quote and clears the cart. The transaction is opened
//! only after the gateway has answered. Online payments are verified and
//! matched to a quote of the same user before phase 1 starts.
//!
//! Once the gateway reports a captured payment the caller gets either an
//! order or [`ServiceError::Inconsistent`], never a plain rejection.

use crate::{
    config::AppConfig,
    entities::{
        cart, cart_line, medicine, order, order_history, order_line, payment_quote, user,
        OrderStatus, PaymentMethod, PaymentStatus, PrescriptionStatus,
    },
    errors::{InconsistentCheckout, ServiceError},
    events::{Event, EventSender},
    services::{
        cart::{find_cart, lines_in_order, medicines_for},
        payments::{receipt_for, to_minor_units, GatewayOrderRequest, GatewayPayment, PaymentBridge},
        prescription::{is_cart_purchasable, is_line_purchasable},
    },
};
use chrono::{DateTime, Duration, Utc};
use metrics::{counter, histogram};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait,
    QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use strum::Display;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Checkout knobs taken from configuration.
#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub amount_tolerance: Decimal,
    pub delivery_days: i64,
    pub currency: String,
    pub support_contact: String,
}

impl From<&AppConfig> for CheckoutSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            amount_tolerance: cfg.checkout_amount_tolerance,
            delivery_days: cfg.delivery_estimate_days,
            currency: cfg.payment_currency.to_ascii_uppercase(),
            support_contact: cfg.support_contact.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum CheckoutState {
    Idle,
    Validating,
    StockReserving,
    PaymentVerifying,
    OrderPersisting,
    CartClearing,
    Completed,
    Rejected,
    Inconsistent,
}

#[derive(Debug, Clone)]
pub struct PlaceOrderRequest {
    pub user_id: Uuid,
    pub payment_method: PaymentMethod,
    pub total_amount_claimed: Option<Decimal>,
    pub payment_ref: Option<String>,
    pub order_ref: Option<String>,
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlacedOrder {
    pub order_id: Uuid,
    pub total_amount: Decimal,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub order_status: OrderStatus,
    pub estimated_delivery: DateTime<Utc>,
    /// True when an existing order was returned for an already recorded payment
    pub replayed: bool,
}

impl PlacedOrder {
    fn from_model(order: order::Model, replayed: bool) -> Self {
        Self {
            order_id: order.id,
            total_amount: order.total_amount,
            currency: order.currency,
            payment_method: order.payment_method,
            payment_status: order.payment_status,
            order_status: order.order_status,
            estimated_delivery: order.estimated_delivery,
            replayed,
        }
    }
}

/// Gateway order handed to the client to start payment
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOrder {
    pub order_id: String,
    /// Minor currency units
    pub amount: i64,
    pub currency: String,
    pub provider: String,
}

/// Outcome of the read-only phase
struct ValidatedCart {
    cart: cart::Model,
    lines: Vec<cart_line::Model>,
    medicines: HashMap<Uuid, medicine::Model>,
    computed_total: Decimal,
}

/// Everything phase 2 needs to write the order
struct OrderDraft<'a> {
    user_id: Uuid,
    method: PaymentMethod,
    total_amount: Decimal,
    payment_status: PaymentStatus,
    payment_ref: Option<&'a str>,
    order_ref: Option<&'a str>,
}

#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    bridge: Arc<dyn PaymentBridge>,
    settings: CheckoutSettings,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        bridge: Arc<dyn PaymentBridge>,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            db,
            event_sender,
            bridge,
            settings,
        }
    }

    pub fn provider(&self) -> &'static str {
        self.bridge.provider()
    }

    /// Payment method recorded for orders settled through the configured gateway.
    pub fn gateway_method(&self) -> PaymentMethod {
        match self.bridge.provider() {
            "stripe" => PaymentMethod::Stripe,
            _ => PaymentMethod::Razorpay,
        }
    }

    fn transition(&self, user_id: Uuid, state: CheckoutState) {
        debug!(user_id = %user_id, state = %state, "Checkout state");
    }

    /// Creates the remote payment order for the current cart and records a quote.
    #[instrument(skip(self))]
    pub async fn create_payment_order(
        &self,
        user_id: Uuid,
        amount: Decimal,
    ) -> Result<PaymentOrder, ServiceError> {
        if amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Valid amount is required".to_string(),
            ));
        }

        let db = &*self.db;
        let cart = find_cart(db, user_id).await?.ok_or(ServiceError::EmptyCart)?;
        let lines = lines_in_order(db, cart.id).await?;
        if lines.is_empty() {
            return Err(ServiceError::EmptyCart);
        }
        let medicines = medicines_for(db, &lines).await?;

        if !is_cart_purchasable(&lines) {
            let pending = lines
                .iter()
                .filter(|l| !is_line_purchasable(l))
                .map(|l| medicine_name(&medicines, l.medicine_id))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(ServiceError::PrescriptionPending(pending));
        }

        let computed = live_total(&lines, &medicines)?;
        if (amount - computed).abs() > self.settings.amount_tolerance {
            info!(user_id = %user_id, %amount, %computed, "Payment order amount mismatch");
            return Err(ServiceError::AmountMismatch {
                expected: computed.to_string(),
                claimed: amount.to_string(),
            });
        }

        let mut notes = BTreeMap::new();
        notes.insert("userId".to_string(), user_id.to_string());
        notes.insert("cartId".to_string(), cart.id.to_string());

        let now = Utc::now();
        let gateway_order = self
            .bridge
            .create_order(GatewayOrderRequest {
                amount_minor: to_minor_units(computed)?,
                currency: self.settings.currency.clone(),
                receipt: receipt_for(now),
                notes,
            })
            .await?;

        payment_quote::ActiveModel {
            gateway_order_id: Set(gateway_order.id.clone()),
            user_id: Set(user_id),
            cart_id: Set(cart.id),
            cart_version: Set(cart.version),
            amount: Set(computed),
            currency: Set(gateway_order.currency.clone()),
            provider: Set(self.bridge.provider().to_string()),
            created_at: Set(now),
            consumed_at: Set(None),
        }
        .insert(db)
        .await?;

        info!(
            user_id = %user_id,
            gateway_order_id = %gateway_order.id,
            amount = %computed,
            "Created payment order"
        );
        self.event_sender
            .send_or_log(Event::PaymentOrderCreated {
                user_id,
                gateway_order_id: gateway_order.id.clone(),
                amount: computed,
            })
            .await;

        Ok(PaymentOrder {
            order_id: gateway_order.id,
            amount: gateway_order.amount_minor,
            currency: gateway_order.currency,
            provider: self.bridge.provider().to_string(),
        })
    }

    /// Turns the user's cart into an order.
    #[instrument(skip(self, request), fields(user_id = %request.user_id, method = %request.payment_method))]
    pub async fn place_order(&self, request: PlaceOrderRequest) -> Result<PlacedOrder, ServiceError> {
        let started = Instant::now();
        let method = request.payment_method.to_string();
        let user_id = request.user_id;

        let result = self.run_checkout(request).await;

        match &result {
            Ok(placed) if !placed.replayed => {
                self.transition(user_id, CheckoutState::Completed);
                counter!("medicart_checkout.completed", 1, "method" => method);
                histogram!("medicart_checkout.duration_seconds", started.elapsed().as_secs_f64());
            }
            Ok(_) => {
                counter!("medicart_checkout.replayed", 1);
            }
            Err(ServiceError::Inconsistent(_)) => {
                self.transition(user_id, CheckoutState::Inconsistent);
            }
            Err(e) => {
                self.transition(user_id, CheckoutState::Rejected);
                counter!("medicart_checkout.rejected", 1, "code" => e.error_code());
            }
        }

        result
    }

    async fn run_checkout(&self, request: PlaceOrderRequest) -> Result<PlacedOrder, ServiceError> {
        let PlaceOrderRequest {
            user_id,
            payment_method,
            total_amount_claimed,
            payment_ref,
            order_ref,
            signature,
        } = request;

        self.transition(user_id, CheckoutState::Idle);
        self.transition(user_id, CheckoutState::Validating);
        let order_ref = order_ref.filter(|o| !o.trim().is_empty());

        if !payment_method.requires_gateway() {
            let validated = self.validate(user_id, order_ref.as_deref()).await?;
            if let Some(claimed) = total_amount_claimed {
                if (claimed - validated.computed_total).abs() > self.settings.amount_tolerance {
                    info!(%claimed, computed = %validated.computed_total, "Claimed total mismatch");
                    return Err(ServiceError::AmountMismatch {
                        expected: validated.computed_total.to_string(),
                        claimed: claimed.to_string(),
                    });
                }
            }
            let draft = OrderDraft {
                user_id,
                method: payment_method,
                total_amount: validated.computed_total,
                payment_status: PaymentStatus::Pending,
                payment_ref: None,
                order_ref: order_ref.as_deref(),
            };
            let order = self.persist_order(&validated, &draft).await?;
            return Ok(self.order_placed(order, payment_method).await);
        }

        let payment_ref = payment_ref
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| {
                ServiceError::ValidationError("Payment id is required for online payments".to_string())
            })?;
        self.check_method_matches_provider(payment_method)?;

        if let Some(existing) = self.find_order_for_payment(&payment_ref).await? {
            if existing.user_id != user_id {
                return Err(ServiceError::Forbidden(
                    "Payment belongs to another account".to_string(),
                ));
            }
            info!(order_id = %existing.id, "Replaying checkout for recorded payment");
            return Ok(PlacedOrder::from_model(existing, true));
        }

        self.transition(user_id, CheckoutState::PaymentVerifying);
        let payment = self
            .verify_payment(&payment_ref, order_ref.as_deref(), signature.as_deref())
            .await?;
        let quoted_for = payment.order_id.as_deref().or(order_ref.as_deref());
        let quote = self.owned_quote(user_id, &payment_ref, quoted_for).await?;
        let order_ref = order_ref.unwrap_or(quote.gateway_order_id);

        // The payment is captured and ours: every failure below needs reconciliation.
        let validated = match self.validate(user_id, Some(&order_ref)).await {
            Ok(validated) => validated,
            Err(e) => {
                return Err(self
                    .inconsistent(user_id, &payment_ref, Some(&order_ref), e.to_string())
                    .await)
            }
        };
        if let Some(reason) =
            self.post_capture_mismatch(&payment, Some(&order_ref), validated.computed_total)
        {
            return Err(self
                .inconsistent(user_id, &payment_ref, Some(&order_ref), reason)
                .await);
        }

        let draft = OrderDraft {
            user_id,
            method: payment_method,
            total_amount: payment.amount(),
            payment_status: PaymentStatus::Paid,
            payment_ref: Some(&payment_ref),
            order_ref: Some(&order_ref),
        };
        self.record_captured_order(&validated, &draft).await
    }

    /// The quote a captured payment settles, provided this user created it.
    async fn owned_quote(
        &self,
        user_id: Uuid,
        payment_ref: &str,
        gateway_order_id: Option<&str>,
    ) -> Result<payment_quote::Model, ServiceError> {
        let quote = match gateway_order_id {
            Some(id) => payment_quote::Entity::find_by_id(id.to_string())
                .one(&*self.db)
                .await?,
            None => None,
        };
        match quote {
            Some(quote) if quote.user_id == user_id => Ok(quote),
            other => {
                warn!(
                    user_id = %user_id,
                    payment_ref,
                    gateway_order_id = ?gateway_order_id,
                    quoted_for = ?other.map(|q| q.user_id),
                    "Payment is not linked to a payment order of this user"
                );
                Err(ServiceError::Forbidden(
                    "Payment was not started from this account".to_string(),
                ))
            }
        }
    }

    /// Phase 2 for a captured payment: a persist failure becomes an inconsistency.
    async fn record_captured_order(
        &self,
        validated: &ValidatedCart,
        draft: &OrderDraft<'_>,
    ) -> Result<PlacedOrder, ServiceError> {
        let payment_ref = draft.payment_ref.unwrap_or_default();
        match self.persist_order(validated, draft).await {
            Ok(order) => Ok(self.order_placed(order, draft.method).await),
            Err(e) => {
                // A concurrent request for the same payment may have won the insert.
                if let Ok(Some(existing)) = self.find_order_for_payment(payment_ref).await {
                    if existing.user_id == draft.user_id {
                        return Ok(PlacedOrder::from_model(existing, true));
                    }
                }
                Err(self
                    .inconsistent(draft.user_id, payment_ref, draft.order_ref, e.to_string())
                    .await)
            }
        }
    }

    async fn order_placed(&self, order: order::Model, payment_method: PaymentMethod) -> PlacedOrder {
        info!(
            order_id = %order.id,
            total = %order.total_amount,
            "Order placed"
        );
        self.event_sender
            .send_or_log(Event::OrderPlaced {
                order_id: order.id,
                user_id: order.user_id,
                total_amount: order.total_amount,
                payment_method,
            })
            .await;
        PlacedOrder::from_model(order, false)
    }

    fn check_method_matches_provider(&self, method: PaymentMethod) -> Result<(), ServiceError> {
        let provider = self.bridge.provider();
        let mismatched = match method {
            PaymentMethod::Razorpay => provider != "razorpay",
            PaymentMethod::Stripe => provider != "stripe",
            _ => false,
        };
        if mismatched && provider != "sandbox" {
            return Err(ServiceError::ValidationError(format!(
                "Payment method {} is not available; payments are processed by {}",
                method, provider
            )));
        }
        Ok(())
    }

    async fn find_order_for_payment(
        &self,
        payment_ref: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        Ok(order::Entity::find()
            .filter(order::Column::GatewayPaymentId.eq(payment_ref))
            .one(&*self.db)
            .await?)
    }

    /// Phase 1: user, cart, quote freshness, stock then prescription per line.
    async fn validate(
        &self,
        user_id: Uuid,
        order_ref: Option<&str>,
    ) -> Result<ValidatedCart, ServiceError> {
        let db = &*self.db;

        user::Entity::find_by_id(user_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", user_id)))?;

        let cart = find_cart(db, user_id).await?.ok_or(ServiceError::EmptyCart)?;
        let lines = lines_in_order(db, cart.id).await?;
        if lines.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        if let Some(order_ref) = order_ref {
            if let Some(quote) = payment_quote::Entity::find_by_id(order_ref.to_string())
                .one(db)
                .await?
            {
                if quote.user_id != user_id || quote.cart_version != cart.version {
                    warn!(
                        gateway_order_id = %order_ref,
                        quoted_version = quote.cart_version,
                        current_version = cart.version,
                        "Cart changed after payment order was created"
                    );
                    return Err(ServiceError::CartChanged);
                }
            }
        }

        self.transition(user_id, CheckoutState::StockReserving);
        let medicines = medicines_for(db, &lines).await?;
        for line in &lines {
            let medicine = medicines.get(&line.medicine_id).ok_or_else(|| {
                ServiceError::NotFound(format!("Medicine {} not found", line.medicine_id))
            })?;
            if !medicine.has_stock_for(line.quantity) {
                info!(medicine = %medicine.name, stock = medicine.stock, wanted = line.quantity, "Insufficient stock");
                return Err(ServiceError::InsufficientStock(medicine.name.clone()));
            }
            if !is_line_purchasable(line) {
                info!(medicine = %medicine.name, "Prescription approval pending");
                return Err(ServiceError::PrescriptionPending(medicine.name.clone()));
            }
        }

        let computed_total = live_total(&lines, &medicines)?;
        Ok(ValidatedCart {
            cart,
            lines,
            medicines,
            computed_total,
        })
    }

    async fn verify_payment(
        &self,
        payment_ref: &str,
        order_ref: Option<&str>,
        signature: Option<&str>,
    ) -> Result<GatewayPayment, ServiceError> {
        if let Some(signature) = signature {
            let order_ref = order_ref.ok_or_else(|| {
                ServiceError::PaymentVerificationFailed(
                    "signature supplied without an order id".to_string(),
                )
            })?;
            if self
                .bridge
                .verify_checkout_signature(order_ref, payment_ref, signature)
                == Some(false)
            {
                warn!(payment_ref, "Checkout signature mismatch");
                return Err(ServiceError::PaymentVerificationFailed(
                    "invalid payment signature".to_string(),
                ));
            }
        }

        let payment = self.bridge.verify(payment_ref).await.map_err(|e| {
            warn!(payment_ref, error = %e, "Payment verification failed");
            ServiceError::PaymentVerificationFailed(e.to_string())
        })?;

        if !payment.captured {
            info!(payment_ref, status = %payment.status, "Payment not captured");
            return Err(ServiceError::PaymentNotCaptured(payment_ref.to_string()));
        }
        Ok(payment)
    }

    /// Checks that only make sense once money has moved.
    fn post_capture_mismatch(
        &self,
        payment: &GatewayPayment,
        order_ref: Option<&str>,
        computed_total: Decimal,
    ) -> Option<String> {
        if let (Some(expected), Some(actual)) = (order_ref, payment.order_id.as_deref()) {
            if expected != actual {
                return Some(format!(
                    "payment belongs to gateway order {} not {}",
                    actual, expected
                ));
            }
        }
        let captured = payment.amount();
        if computed_total - captured > self.settings.amount_tolerance {
            return Some(format!(
                "captured {} is short of cart total {}",
                captured, computed_total
            ));
        }
        None
    }

    /// Phase 2: one transaction from stock decrement to cart clear.
    async fn persist_order(
        &self,
        validated: &ValidatedCart,
        draft: &OrderDraft<'_>,
    ) -> Result<order::Model, ServiceError> {
        self.transition(draft.user_id, CheckoutState::OrderPersisting);
        let now = Utc::now();

        let txn = self.db.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        for line in &validated.lines {
            let updated = medicine::Entity::update_many()
                .col_expr(
                    medicine::Column::Stock,
                    Expr::col(medicine::Column::Stock).sub(line.quantity),
                )
                .col_expr(medicine::Column::UpdatedAt, Expr::value(now))
                .filter(medicine::Column::Id.eq(line.medicine_id))
                .filter(medicine::Column::Stock.gte(line.quantity))
                .exec(&txn)
                .await?;
            if updated.rows_affected == 0 {
                warn!(medicine_id = %line.medicine_id, "Lost stock race");
                return Err(ServiceError::InsufficientStock(medicine_name(
                    &validated.medicines,
                    line.medicine_id,
                )));
            }
        }

        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(draft.user_id),
            total_amount: Set(draft.total_amount),
            currency: Set(self.settings.currency.clone()),
            prescription_status: Set(PrescriptionStatus::Approved),
            order_status: Set(OrderStatus::Pending),
            payment_status: Set(draft.payment_status),
            payment_method: Set(draft.method),
            gateway_payment_id: Set(draft.payment_ref.map(str::to_string)),
            gateway_order_id: Set(draft.order_ref.map(str::to_string)),
            estimated_delivery: Set(now + Duration::days(self.settings.delivery_days)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        for line in &validated.lines {
            let (name, price) = validated
                .medicines
                .get(&line.medicine_id)
                .map(|m| (m.name.clone(), m.price))
                .unwrap_or_else(|| (String::new(), line.unit_price_at_add));
            order_line::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                medicine_id: Set(line.medicine_id),
                medicine_name: Set(name),
                quantity: Set(line.quantity),
                unit_price: Set(price),
                line_total: Set(price * Decimal::from(line.quantity)),
            }
            .insert(&txn)
            .await?;
        }

        order_history::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(draft.user_id),
            order_id: Set(order.id),
            order_date: Set(now),
            total_amount: Set(order.total_amount),
            status: Set(order.order_status),
        }
        .insert(&txn)
        .await?;

        if let Some(order_ref) = draft.order_ref {
            payment_quote::Entity::update_many()
                .col_expr(payment_quote::Column::ConsumedAt, Expr::value(Some(now)))
                .filter(payment_quote::Column::GatewayOrderId.eq(order_ref))
                .filter(payment_quote::Column::ConsumedAt.is_null())
                .exec(&txn)
                .await?;
        }

        self.transition(draft.user_id, CheckoutState::CartClearing);
        let cart = &validated.cart;
        let cleared = cart::Entity::update_many()
            .col_expr(cart::Column::TotalPrice, Expr::value(Decimal::ZERO))
            .col_expr(cart::Column::Version, Expr::col(cart::Column::Version).add(1))
            .col_expr(cart::Column::UpdatedAt, Expr::value(now))
            .filter(cart::Column::Id.eq(cart.id))
            .filter(cart::Column::Version.eq(cart.version))
            .exec(&txn)
            .await?;
        if cleared.rows_affected == 0 {
            warn!(cart_id = %cart.id, "Cart modified during checkout");
            return Err(ServiceError::ConcurrentModification(cart.id));
        }
        cart_line::Entity::delete_many()
            .filter(cart_line::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;

        txn.commit().await.map_err(|e| {
            error!("Failed to commit order: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        Ok(order)
    }

    async fn inconsistent(
        &self,
        user_id: Uuid,
        payment_ref: &str,
        order_ref: Option<&str>,
        reason: String,
    ) -> ServiceError {
        error!(
            user_id = %user_id,
            payment_ref,
            order_ref = ?order_ref,
            reason = %reason,
            "Payment captured but order could not be recorded"
        );
        counter!("medicart_checkout.inconsistent", 1);

        self.event_sender
            .send_or_log(Event::CheckoutInconsistent {
                user_id,
                payment_ref: payment_ref.to_string(),
                order_ref: order_ref.map(str::to_string),
                reason: reason.clone(),
                occurred_at: Utc::now(),
            })
            .await;

        ServiceError::Inconsistent(Box::new(InconsistentCheckout {
            payment_ref: payment_ref.to_string(),
            order_ref: order_ref.map(str::to_string),
            reason,
            support_contact: self.settings.support_contact.clone(),
        }))
    }
}

fn medicine_name(medicines: &HashMap<Uuid, medicine::Model>, id: Uuid) -> String {
    medicines
        .get(&id)
        .map(|m| m.name.clone())
        .unwrap_or_else(|| id.to_string())
}

/// Sum of live catalog price x quantity.
fn live_total(
    lines: &[cart_line::Model],
    medicines: &HashMap<Uuid, medicine::Model>,
) -> Result<Decimal, ServiceError> {
    lines.iter().try_fold(Decimal::ZERO, |acc, line| {
        let medicine = medicines.get(&line.medicine_id).ok_or_else(|| {
            ServiceError::NotFound(format!("Medicine {} not found", line.medicine_id))
        })?;
        Ok(acc + medicine.price * Decimal::from(line.quantity))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::payments::SandboxGateway;
    use rust_decimal_macros::dec;
    use crate::{
        db::{establish_connection_with_config, run_migrations, DbConfig},
        entities::UserRole,
        services::cart::CartService,
    };
    use assert_matches::assert_matches;
    use sea_orm::{Database, PaginatorTrait};
    use tokio::sync::mpsc;

    fn settings(tolerance: Decimal) -> CheckoutSettings {
        CheckoutSettings {
            amount_tolerance: tolerance,
            delivery_days: 5,
            currency: "INR".into(),
            support_contact: "support@test".into(),
        }
    }

    async fn service(tolerance: Decimal) -> CheckoutService {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let (tx, _rx) = mpsc::channel(8);
        CheckoutService::new(
            Arc::new(db),
            Arc::new(EventSender::new(tx)),
            Arc::new(SandboxGateway::new()),
            settings(tolerance),
        )
    }

    /// Checkout and cart services over one migrated in-memory database.
    struct Store {
        db: Arc<DatabaseConnection>,
        checkout: CheckoutService,
        carts: CartService,
        user_id: Uuid,
    }

    impl Store {
        async fn new() -> Self {
            let pool = establish_connection_with_config(&DbConfig {
                url: "sqlite::memory:".to_string(),
                max_connections: 1,
                min_connections: 1,
                ..Default::default()
            })
            .await
            .unwrap();
            run_migrations(&pool).await.unwrap();
            let db = Arc::new(pool);
            let (tx, _rx) = mpsc::channel(8);
            let events = Arc::new(EventSender::new(tx));

            let user_id = Uuid::new_v4();
            user::ActiveModel {
                id: Set(user_id),
                first_name: Set("Asha".into()),
                last_name: Set("Rao".into()),
                email: Set(format!("{}@medicart.test", user_id.simple())),
                role: Set(UserRole::User),
                created_at: Set(Utc::now()),
            }
            .insert(&*db)
            .await
            .unwrap();

            Self {
                checkout: CheckoutService::new(
                    db.clone(),
                    events.clone(),
                    Arc::new(SandboxGateway::new()),
                    settings(dec!(1)),
                ),
                carts: CartService::new(db.clone(), events),
                db,
                user_id,
            }
        }

        async fn medicine(&self, name: &str, price: Decimal, stock: i32) -> Uuid {
            let now = Utc::now();
            let id = Uuid::new_v4();
            medicine::ActiveModel {
                id: Set(id),
                name: Set(name.into()),
                description: Set(None),
                category: Set("general".into()),
                manufacturer: Set("Medicart Labs".into()),
                price: Set(price),
                discount_percent: Set(Decimal::ZERO),
                stock: Set(stock),
                prescription_required: Set(false),
                batch_number: Set(format!("B-{}", id.simple())),
                image_url: Set(None),
                expiry_date: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&*self.db)
            .await
            .unwrap();
            id
        }

        async fn set_stock(&self, medicine_id: Uuid, stock: i32) {
            medicine::Entity::update_many()
                .col_expr(medicine::Column::Stock, Expr::value(stock))
                .filter(medicine::Column::Id.eq(medicine_id))
                .exec(&*self.db)
                .await
                .unwrap();
        }

        async fn stock_of(&self, medicine_id: Uuid) -> i32 {
            medicine::Entity::find_by_id(medicine_id)
                .one(&*self.db)
                .await
                .unwrap()
                .unwrap()
                .stock
        }

        async fn order_count(&self) -> u64 {
            order::Entity::find().count(&*self.db).await.unwrap()
        }

        fn captured<'a>(&self, total: Decimal) -> OrderDraft<'a> {
            OrderDraft {
                user_id: self.user_id,
                method: PaymentMethod::Razorpay,
                total_amount: total,
                payment_status: PaymentStatus::Paid,
                payment_ref: Some("pay_race"),
                order_ref: Some("order_race"),
            }
        }
    }

    fn payment(order_id: Option<&str>, amount_minor: i64) -> GatewayPayment {
        GatewayPayment {
            id: "pay_1".into(),
            order_id: order_id.map(str::to_string),
            status: "captured".into(),
            captured: true,
            amount_minor,
            currency: "INR".into(),
        }
    }

    #[tokio::test]
    async fn captured_amount_within_tolerance_is_accepted() {
        let svc = service(dec!(1)).await;
        assert!(svc
            .post_capture_mismatch(&payment(Some("order_1"), 7950), Some("order_1"), dec!(80))
            .is_none());
    }

    #[tokio::test]
    async fn short_capture_and_foreign_order_are_flagged() {
        let svc = service(dec!(1)).await;
        assert!(svc
            .post_capture_mismatch(&payment(Some("order_1"), 7000), Some("order_1"), dec!(80))
            .is_some());
        assert!(svc
            .post_capture_mismatch(&payment(Some("order_2"), 8000), Some("order_1"), dec!(80))
            .is_some());
    }

    #[tokio::test]
    async fn sandbox_accepts_any_gateway_method() {
        let svc = service(dec!(1)).await;
        assert!(svc.check_method_matches_provider(PaymentMethod::Stripe).is_ok());
        assert!(svc.check_method_matches_provider(PaymentMethod::Upi).is_ok());
        assert_eq!(svc.gateway_method(), PaymentMethod::Razorpay);
    }

    #[tokio::test]
    async fn stock_taken_after_capture_is_inconsistent_and_rolls_back() {
        let store = Store::new().await;
        let syrup = store.medicine("Cough Syrup", dec!(80), 2).await;
        store.carts.add_line(store.user_id, syrup, 2).await.unwrap();
        let validated = store.checkout.validate(store.user_id, None).await.unwrap();

        // another checkout wins the last units between the phases
        store.set_stock(syrup, 1).await;

        let err = store
            .checkout
            .record_captured_order(&validated, &store.captured(dec!(160)))
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::Inconsistent(info) => {
            assert_eq!(info.payment_ref, "pay_race");
            assert_eq!(info.order_ref.as_deref(), Some("order_race"));
            assert!(info.reason.contains("Cough Syrup"));
        });
        assert_eq!(store.stock_of(syrup).await, 1);
        assert_eq!(store.order_count().await, 0);
        let cart = store.carts.get_cart(store.user_id).await.unwrap();
        assert_eq!(cart.lines.len(), 1);
    }

    #[tokio::test]
    async fn cart_edited_after_capture_is_inconsistent_and_keeps_stock() {
        let store = Store::new().await;
        let zinc = store.medicine("Zinc Tablets", dec!(40), 10).await;
        let gel = store.medicine("Pain Gel", dec!(95), 10).await;
        store.carts.add_line(store.user_id, zinc, 3).await.unwrap();
        let validated = store.checkout.validate(store.user_id, None).await.unwrap();

        store.carts.add_line(store.user_id, gel, 1).await.unwrap();

        let err = store
            .checkout
            .record_captured_order(&validated, &store.captured(dec!(120)))
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::Inconsistent(info) => {
            assert_eq!(info.payment_ref, "pay_race");
        });
        // the decrement ran before the cart guard and was rolled back with it
        assert_eq!(store.stock_of(zinc).await, 10);
        assert_eq!(store.order_count().await, 0);
        let cart = store.carts.get_cart(store.user_id).await.unwrap();
        assert_eq!(cart.lines.len(), 2);
    }

    #[tokio::test]
    async fn cod_cart_edited_during_checkout_is_a_conflict() {
        let store = Store::new().await;
        let zinc = store.medicine("Zinc Tablets", dec!(40), 10).await;
        let gel = store.medicine("Pain Gel", dec!(95), 10).await;
        store.carts.add_line(store.user_id, zinc, 1).await.unwrap();
        let validated = store.checkout.validate(store.user_id, None).await.unwrap();

        store.carts.add_line(store.user_id, gel, 1).await.unwrap();

        let draft = OrderDraft {
            user_id: store.user_id,
            method: PaymentMethod::Cod,
            total_amount: validated.computed_total,
            payment_status: PaymentStatus::Pending,
            payment_ref: None,
            order_ref: None,
        };
        let err = store
            .checkout
            .persist_order(&validated, &draft)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::CONFLICT);
        assert_matches!(err, ServiceError::ConcurrentModification(id) => {
            assert_eq!(id, validated.cart.id);
        });
        assert_eq!(store.stock_of(zinc).await, 10);
        assert_eq!(store.order_count().await, 0);
    }
}
