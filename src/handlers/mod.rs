pub mod admin;
pub mod cart;
pub mod checkout;
pub mod common;
pub mod health;
pub mod orders;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    payments::PaymentBridge, CartService, CheckoutService, CheckoutSettings,
    OrderHistoryService, PrescriptionService,
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub prescriptions: Arc<PrescriptionService>,
    pub checkout: Arc<CheckoutService>,
    pub order_history: Arc<OrderHistoryService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        payment_bridge: Arc<dyn PaymentBridge>,
        config: &AppConfig,
    ) -> Self {
        let cart = Arc::new(CartService::new(db_pool.clone(), event_sender.clone()));
        let prescriptions = Arc::new(PrescriptionService::new(
            db_pool.clone(),
            event_sender.clone(),
        ));
        let checkout = Arc::new(CheckoutService::new(
            db_pool.clone(),
            event_sender.clone(),
            payment_bridge,
            CheckoutSettings::from(config),
        ));
        let order_history = Arc::new(OrderHistoryService::new(db_pool, event_sender));

        Self {
            cart,
            prescriptions,
            checkout,
            order_history,
        }
    }
}
