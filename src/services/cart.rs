use crate::{
    db::is_unique_violation,
    entities::{cart, cart_line, medicine, user},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// A cart line resolved against the current catalog.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CartLineView {
    pub id: Uuid,
    pub medicine_id: Uuid,
    pub name: String,
    pub image_url: Option<String>,
    pub quantity: i32,
    /// Price snapshot taken when the line was added
    pub unit_price_at_add: Decimal,
    /// Live catalog price; `None` if the medicine was removed from the catalog
    pub current_price: Option<Decimal>,
    pub current_stock: i32,
    pub prescription_required: bool,
    pub is_approved: bool,
    pub position: i32,
    pub line_total: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Sum of quantity x snapshot price
    pub total_price: Decimal,
    pub version: i32,
    pub lines: Vec<CartLineView>,
    pub updated_at: DateTime<Utc>,
}

/// Sum of quantity x unit price snapshot.
pub fn cart_total(lines: &[cart_line::Model]) -> Decimal {
    lines.iter().map(cart_line::Model::line_total).sum()
}

/// Catalog records for `lines`, keyed by medicine id.
pub(crate) async fn medicines_for<C: ConnectionTrait>(
    conn: &C,
    lines: &[cart_line::Model],
) -> Result<HashMap<Uuid, medicine::Model>, ServiceError> {
    let ids: Vec<Uuid> = lines.iter().map(|l| l.medicine_id).collect();
    let medicines = medicine::Entity::find()
        .filter(medicine::Column::Id.is_in(ids))
        .all(conn)
        .await?;
    Ok(medicines.into_iter().map(|m| (m.id, m)).collect())
}

/// Lines of `cart_id` in scan order.
pub(crate) async fn lines_in_order<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
) -> Result<Vec<cart_line::Model>, ServiceError> {
    Ok(cart_line::Entity::find()
        .filter(cart_line::Column::CartId.eq(cart_id))
        .order_by_asc(cart_line::Column::Position)
        .all(conn)
        .await?)
}

pub(crate) async fn find_cart<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<Option<cart::Model>, ServiceError> {
    Ok(cart::Entity::find()
        .filter(cart::Column::UserId.eq(user_id))
        .one(conn)
        .await?)
}

fn cart_not_found(user_id: Uuid) -> ServiceError {
    ServiceError::NotFound(format!("Cart not found for user {}", user_id))
}

/// Per-user cart: add, update, remove and view lines.
///
/// Every mutation runs in one transaction that also recomputes `total_price`
/// from the line snapshots and bumps the cart `version`.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Adds `medicine_id` to the user's cart, creating the cart on first use.
    ///
    /// Fails with `DuplicateLine` if the medicine is already in the cart;
    /// quantities are never merged.
    #[instrument(skip(self))]
    pub async fn add_line(
        &self,
        user_id: Uuid,
        medicine_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::InvalidQuantity);
        }

        let txn = self.db.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        user::Entity::find_by_id(user_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", user_id)))?;

        let medicine = medicine::Entity::find_by_id(medicine_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Medicine {} not found", medicine_id))
            })?;

        let cart = match find_cart(&txn, user_id).await? {
            Some(cart) => cart,
            None => {
                let now = Utc::now();
                cart::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user_id),
                    total_price: Set(Decimal::ZERO),
                    version: Set(0),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?
            }
        };

        let lines = lines_in_order(&txn, cart.id).await?;
        if lines.iter().any(|l| l.medicine_id == medicine_id) {
            info!(cart_id = %cart.id, "Rejected duplicate cart line");
            return Err(ServiceError::DuplicateLine(medicine.name));
        }

        let position = lines.iter().map(|l| l.position).max().unwrap_or(0) + 1;
        let now = Utc::now();
        let line = cart_line::ActiveModel {
            id: Set(Uuid::new_v4()),
            cart_id: Set(cart.id),
            medicine_id: Set(medicine_id),
            quantity: Set(quantity),
            unit_price_at_add: Set(medicine.price),
            prescription_required: Set(medicine.prescription_required),
            is_approved: Set(false),
            position: Set(position),
            created_at: Set(now),
            updated_at: Set(now),
        };

        if let Err(e) = line.insert(&txn).await {
            if is_unique_violation(&e) {
                return Err(ServiceError::DuplicateLine(medicine.name));
            }
            return Err(e.into());
        }

        let cart = Self::recalculate(&txn, cart).await?;
        let view = Self::build_view(&txn, cart).await?;
        txn.commit().await.map_err(|e| {
            error!("Failed to commit cart line: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        info!(cart_id = %view.id, medicine_id = %medicine_id, quantity, "Added cart line");
        self.event_sender
            .send_or_log(Event::CartLineAdded {
                user_id,
                medicine_id,
                quantity,
            })
            .await;

        Ok(view)
    }

    /// Sets the quantity of an existing line. The price snapshot is kept.
    #[instrument(skip(self))]
    pub async fn update_quantity(
        &self,
        user_id: Uuid,
        medicine_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::InvalidQuantity);
        }

        let txn = self.db.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        let cart = find_cart(&txn, user_id)
            .await?
            .ok_or_else(|| cart_not_found(user_id))?;

        let line = cart_line::Entity::find()
            .filter(cart_line::Column::CartId.eq(cart.id))
            .filter(cart_line::Column::MedicineId.eq(medicine_id))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Medicine {} is not in the cart", medicine_id))
            })?;

        let mut line: cart_line::ActiveModel = line.into();
        line.quantity = Set(quantity);
        line.update(&txn).await?;

        let cart = Self::recalculate(&txn, cart).await?;
        let view = Self::build_view(&txn, cart).await?;
        txn.commit().await.map_err(|e| {
            error!("Failed to commit quantity update: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        info!(cart_id = %view.id, medicine_id = %medicine_id, quantity, "Updated cart line");
        self.event_sender
            .send_or_log(Event::CartLineUpdated {
                user_id,
                medicine_id,
                quantity,
            })
            .await;

        Ok(view)
    }

    /// Removes a line. Removing a medicine that is not in the cart is a no-op.
    #[instrument(skip(self))]
    pub async fn remove_line(
        &self,
        user_id: Uuid,
        medicine_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        let cart = find_cart(&txn, user_id)
            .await?
            .ok_or_else(|| cart_not_found(user_id))?;

        let deleted = cart_line::Entity::delete_many()
            .filter(cart_line::Column::CartId.eq(cart.id))
            .filter(cart_line::Column::MedicineId.eq(medicine_id))
            .exec(&txn)
            .await?;

        let cart = if deleted.rows_affected > 0 {
            Self::recalculate(&txn, cart).await?
        } else {
            cart
        };
        let view = Self::build_view(&txn, cart).await?;
        txn.commit().await.map_err(|e| {
            error!("Failed to commit line removal: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        if deleted.rows_affected > 0 {
            info!(cart_id = %view.id, medicine_id = %medicine_id, "Removed cart line");
            self.event_sender
                .send_or_log(Event::CartLineRemoved {
                    user_id,
                    medicine_id,
                })
                .await;
        }

        Ok(view)
    }

    #[instrument(skip(self))]
    pub async fn get_cart(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let db = &*self.db;
        let cart = find_cart(db, user_id)
            .await?
            .ok_or_else(|| cart_not_found(user_id))?;
        Self::build_view(db, cart).await
    }

    async fn recalculate<C: ConnectionTrait>(
        conn: &C,
        cart: cart::Model,
    ) -> Result<cart::Model, ServiceError> {
        let lines = lines_in_order(conn, cart.id).await?;
        let version = cart.version;
        let mut active: cart::ActiveModel = cart.into();
        active.total_price = Set(cart_total(&lines));
        active.version = Set(version + 1);
        Ok(active.update(conn).await?)
    }

    async fn build_view<C: ConnectionTrait>(
        conn: &C,
        cart: cart::Model,
    ) -> Result<CartView, ServiceError> {
        let lines = lines_in_order(conn, cart.id).await?;
        let medicines = medicines_for(conn, &lines).await?;

        let lines = lines
            .into_iter()
            .map(|line| {
                let med = medicines.get(&line.medicine_id);
                CartLineView {
                    id: line.id,
                    medicine_id: line.medicine_id,
                    name: med
                        .map(|m| m.name.clone())
                        .unwrap_or_else(|| "Unavailable medicine".to_string()),
                    image_url: med.and_then(|m| m.image_url.clone()),
                    quantity: line.quantity,
                    unit_price_at_add: line.unit_price_at_add,
                    current_price: med.map(|m| m.price),
                    current_stock: med.map(|m| m.stock).unwrap_or(0),
                    prescription_required: line.prescription_required,
                    is_approved: line.is_approved,
                    position: line.position,
                    line_total: line.line_total(),
                }
            })
            .collect();

        Ok(CartView {
            id: cart.id,
            user_id: cart.user_id,
            total_price: cart.total_price,
            version: cart.version,
            lines,
            updated_at: cart.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(quantity: i32, price: Decimal) -> cart_line::Model {
        let now = Utc::now();
        cart_line::Model {
            id: Uuid::new_v4(),
            cart_id: Uuid::nil(),
            medicine_id: Uuid::new_v4(),
            quantity,
            unit_price_at_add: price,
            prescription_required: false,
            is_approved: false,
            position: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn total_sums_snapshot_prices() {
        let lines = vec![line(3, dec!(10)), line(1, dec!(50)), line(2, dec!(2.25))];
        assert_eq!(cart_total(&lines), dec!(84.50));
    }

    #[test]
    fn empty_cart_totals_zero() {
        assert_eq!(cart_total(&[]), Decimal::ZERO);
    }
}
