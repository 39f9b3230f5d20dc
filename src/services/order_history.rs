use crate::{
    entities::{order, order_history, user},
    errors::ServiceError,
    events::{Event, EventSender},
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Read side of a user's orders plus the repair that rebuilds it from `orders`.
#[derive(Clone)]
pub struct OrderHistoryService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderHistoryService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Newest first.
    #[instrument(skip(self))]
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<order_history::Model>, ServiceError> {
        Ok(order_history::Entity::find()
            .filter(order_history::Column::UserId.eq(user_id))
            .order_by_desc(order_history::Column::OrderDate)
            .all(&*self.db)
            .await?)
    }

    /// Replaces the user's projection with one entry per stored order.
    #[instrument(skip(self))]
    pub async fn rebuild_for_user(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        user::Entity::find_by_id(user_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", user_id)))?;

        order_history::Entity::delete_many()
            .filter(order_history::Column::UserId.eq(user_id))
            .exec(&txn)
            .await?;

        let orders = order::Entity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_asc(order::Column::CreatedAt)
            .all(&txn)
            .await?;

        let mut entries = 0u64;
        for order in orders {
            order_history::ActiveModel {
                id: Set(Uuid::new_v4()),
                user_id: Set(user_id),
                order_id: Set(order.id),
                order_date: Set(order.created_at),
                total_amount: Set(order.total_amount),
                status: Set(order.order_status),
            }
            .insert(&txn)
            .await?;
            entries += 1;
        }

        txn.commit().await.map_err(|e| {
            error!("Failed to commit history rebuild: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        info!(user_id = %user_id, entries, "Rebuilt order history");
        self.event_sender
            .send_or_log(Event::OrderHistoryRebuilt { user_id, entries })
            .await;

        Ok(entries)
    }

    /// Rebuilds every user's projection. Returns the total number of entries written.
    #[instrument(skip(self))]
    pub async fn rebuild_all(&self) -> Result<u64, ServiceError> {
        let users = user::Entity::find().all(&*self.db).await?;
        let mut total = 0;
        for user in users {
            total += self.rebuild_for_user(user.id).await?;
        }
        info!(total, "Rebuilt order history for all users");
        Ok(total)
    }
}
