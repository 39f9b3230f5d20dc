use crate::{
    entities::cart_line,
    errors::ServiceError,
    events::{Event, EventSender},
    services::cart::{find_cart, lines_in_order, medicines_for},
};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait,
    QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// A line can be bought if it needs no prescription or an admin approved it.
pub fn is_line_purchasable(line: &cart_line::Model) -> bool {
    !line.prescription_required || line.is_approved
}

/// True when every line is purchasable; an empty cart trivially is.
pub fn is_cart_purchasable(lines: &[cart_line::Model]) -> bool {
    lines.iter().all(is_line_purchasable)
}

/// Prescription line awaiting admin review
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PendingPrescriptionLine {
    pub cart_line_id: Uuid,
    pub medicine_id: Uuid,
    pub medicine_name: String,
    pub quantity: i32,
    pub unit_price_at_add: Decimal,
    pub position: i32,
}

/// Admin-side approval of prescription lines.
#[derive(Clone)]
pub struct PrescriptionService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl PrescriptionService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    #[instrument(skip(self))]
    pub async fn set_approval(
        &self,
        cart_line_id: Uuid,
        approved: bool,
    ) -> Result<cart_line::Model, ServiceError> {
        let line = cart_line::Entity::find_by_id(cart_line_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Cart item {} not found", cart_line_id))
            })?;

        let mut line: cart_line::ActiveModel = line.into();
        line.is_approved = Set(approved);
        let line = line.update(&*self.db).await?;

        info!(cart_line_id = %cart_line_id, approved, "Prescription line reviewed");
        self.event_sender
            .send_or_log(Event::PrescriptionReviewed {
                cart_line_id,
                approved,
            })
            .await;

        Ok(line)
    }

    /// Approves or rejects every prescription line in the user's cart.
    /// Returns how many lines actually changed.
    #[instrument(skip(self))]
    pub async fn bulk_set_approval(&self, user_id: Uuid, approved: bool) -> Result<u64, ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        let cart = find_cart(&txn, user_id).await?.ok_or_else(|| {
            ServiceError::NotFound(format!("Cart not found for user {}", user_id))
        })?;

        let result = cart_line::Entity::update_many()
            .col_expr(cart_line::Column::IsApproved, Expr::value(approved))
            .col_expr(cart_line::Column::UpdatedAt, Expr::value(chrono::Utc::now()))
            .filter(cart_line::Column::CartId.eq(cart.id))
            .filter(cart_line::Column::PrescriptionRequired.eq(true))
            .filter(cart_line::Column::IsApproved.ne(approved))
            .exec(&txn)
            .await?;

        txn.commit().await.map_err(|e| {
            error!("Failed to commit bulk approval: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        let lines_changed = result.rows_affected;
        info!(
            user_id = %user_id,
            "{} items {}",
            lines_changed,
            if approved { "approved" } else { "rejected" }
        );
        self.event_sender
            .send_or_log(Event::PrescriptionsBulkReviewed {
                user_id,
                approved,
                lines_changed,
            })
            .await;

        Ok(lines_changed)
    }

    /// Prescription lines in the user's cart that are not yet approved, in scan order.
    #[instrument(skip(self))]
    pub async fn pending_lines(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<PendingPrescriptionLine>, ServiceError> {
        let db = &*self.db;
        let cart = find_cart(db, user_id).await?.ok_or_else(|| {
            ServiceError::NotFound(format!("Cart not found for user {}", user_id))
        })?;

        let lines: Vec<_> = lines_in_order(db, cart.id)
            .await?
            .into_iter()
            .filter(|l| !is_line_purchasable(l))
            .collect();
        let medicines = medicines_for(db, &lines).await?;

        Ok(lines
            .into_iter()
            .map(|l| PendingPrescriptionLine {
                cart_line_id: l.id,
                medicine_id: l.medicine_id,
                medicine_name: medicines
                    .get(&l.medicine_id)
                    .map(|m| m.name.clone())
                    .unwrap_or_default(),
                quantity: l.quantity,
                unit_price_at_add: l.unit_price_at_add,
                position: l.position,
            })
            .collect())
    }
}
