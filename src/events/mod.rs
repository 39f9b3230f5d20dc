use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::entities::PaymentMethod;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    pub async fn send_or_log(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.send(event).await {
            warn!(event = name, error = %e, "Dropping event");
        }
    }
}

/// Domain events emitted by the cart, prescription and checkout services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    CartLineAdded {
        user_id: Uuid,
        medicine_id: Uuid,
        quantity: i32,
    },
    CartLineUpdated {
        user_id: Uuid,
        medicine_id: Uuid,
        quantity: i32,
    },
    CartLineRemoved {
        user_id: Uuid,
        medicine_id: Uuid,
    },
    PrescriptionReviewed {
        cart_line_id: Uuid,
        approved: bool,
    },
    PrescriptionsBulkReviewed {
        user_id: Uuid,
        approved: bool,
        lines_changed: u64,
    },
    PaymentOrderCreated {
        user_id: Uuid,
        gateway_order_id: String,
        amount: Decimal,
    },
    OrderPlaced {
        order_id: Uuid,
        user_id: Uuid,
        total_amount: Decimal,
        payment_method: PaymentMethod,
    },
    /// Payment was captured but no order could be recorded.
    CheckoutInconsistent {
        user_id: Uuid,
        payment_ref: String,
        order_ref: Option<String>,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
    OrderHistoryRebuilt {
        user_id: Uuid,
        entries: u64,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::CartLineAdded { .. } => "cart_line_added",
            Event::CartLineUpdated { .. } => "cart_line_updated",
            Event::CartLineRemoved { .. } => "cart_line_removed",
            Event::PrescriptionReviewed { .. } => "prescription_reviewed",
            Event::PrescriptionsBulkReviewed { .. } => "prescriptions_bulk_reviewed",
            Event::PaymentOrderCreated { .. } => "payment_order_created",
            Event::OrderPlaced { .. } => "order_placed",
            Event::CheckoutInconsistent { .. } => "checkout_inconsistent",
            Event::OrderHistoryRebuilt { .. } => "order_history_rebuilt",
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: Event) -> Result<(), String>;
}

/// Drains the event channel, logging each event and fanning it out to `handlers`.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, handlers: Vec<Arc<dyn EventHandler>>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::CheckoutInconsistent {
                user_id,
                payment_ref,
                order_ref,
                reason,
                ..
            } => error!(
                user_id = %user_id,
                payment_ref = %payment_ref,
                order_ref = ?order_ref,
                reason = %reason,
                "Checkout left a captured payment without an order"
            ),
            other => info!(event = other.name(), "Received event: {:?}", other),
        }

        let results = join_all(
            handlers
                .iter()
                .map(|handler| handler.handle_event(event.clone())),
        )
        .await;

        for result in results {
            if let Err(e) = result {
                error!(event = event.name(), error = %e, "Event handler failed");
            }
        }
    }

    info!("Event channel closed; stopping event processing loop");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle_event(&self, event: Event) -> Result<(), String> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            match event {
                Event::CartLineRemoved { .. } => Err("boom".into()),
                _ => Ok(()),
            }
        }
    }

    #[tokio::test]
    async fn events_reach_every_handler_even_after_failures() {
        let (tx, rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);
        let handler = Arc::new(CountingHandler {
            seen: AtomicUsize::new(0),
        });

        let task = tokio::spawn(process_events(rx, vec![handler.clone()]));

        let user_id = Uuid::new_v4();
        let medicine_id = Uuid::new_v4();
        sender
            .send(Event::CartLineRemoved {
                user_id,
                medicine_id,
            })
            .await
            .unwrap();
        sender
            .send(Event::OrderHistoryRebuilt {
                user_id,
                entries: 2,
            })
            .await
            .unwrap();
        drop(sender);

        task.await.unwrap();
        assert_eq!(handler.seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn send_or_log_tolerates_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        EventSender::new(tx)
            .send_or_log(Event::OrderHistoryRebuilt {
                user_id: Uuid::new_v4(),
                entries: 0,
            })
            .await;
    }
}
