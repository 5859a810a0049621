use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::{
        cart_item, order,
        order::OrderStatus,
        order_item, product,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Settles a paid (or COD-placed) order: decrements stock for every line,
/// promotes the order, and clears the cart, all in one transaction.
pub struct SettlementService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl SettlementService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Runs settlement for an order. Idempotent: anything past DRAFT or
    /// PAYMENT_PENDING is a no-op returning the current state, so a
    /// replayed capture webhook never decrements stock twice and never
    /// resurrects a cancelled or refund-pending order.
    ///
    /// Product rows are locked in ascending product id order so two
    /// settlements touching overlapping products cannot deadlock. Any line
    /// with insufficient stock rolls the whole transaction back.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn settle(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let order = order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        // Settlement only moves forward from a pre-settlement status. An
        // order that already settled, was cancelled, or entered the refund
        // path must never be pulled back to PAID by a replayed capture.
        match order.status {
            OrderStatus::Draft | OrderStatus::PaymentPending => {}
            _ => {
                txn.commit().await?;
                return Ok(order);
            }
        }

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::ProductId)
            .all(&txn)
            .await?;

        // Row locks are only a Postgres concept; SQLite serializes writers
        // at the connection level.
        let lock_rows = self.db.get_database_backend() == DbBackend::Postgres;

        for item in &items {
            let mut query = product::Entity::find_by_id(item.product_id);
            if lock_rows {
                query = query.lock_exclusive();
            }
            let prod = query
                .one(&txn)
                .await?
                .ok_or(ServiceError::ProductNotFound(item.product_id))?;

            if prod.stock < item.quantity {
                warn!(
                    product_id = %item.product_id,
                    requested = item.quantity,
                    available = prod.stock,
                    "insufficient stock at settlement"
                );
                txn.rollback().await?;
                return Err(ServiceError::InsufficientStockAtSettlement(format!(
                    "Product {} has {} in stock, order needs {}",
                    prod.name, prod.stock, item.quantity
                )));
            }

            let remaining = prod.stock - item.quantity;
            let mut active: product::ActiveModel = prod.into();
            active.stock = Set(remaining);
            active.in_stock = Set(remaining > 0);
            active.updated_at = Set(Utc::now());
            active.update(&txn).await?;

            self.event_sender
                .send(Event::StockDecremented {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    remaining,
                })
                .await;
        }

        let settled_status = if order.payment_method.eq_ignore_ascii_case("cod") {
            OrderStatus::Confirmed
        } else {
            OrderStatus::Paid
        };
        let old_status = order.status;
        let user_id = order.user_id;
        let version = order.version;
        let mut active: order::ActiveModel = order.into();
        active.status = Set(settled_status);
        active.updated_at = Set(Utc::now());
        active.version = Set(version + 1);
        let updated = active.update(&txn).await?;

        cart_item::Entity::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .exec(&txn)
            .await?;

        txn.commit().await?;

        info!(status = ?settled_status, lines = items.len(), "order settled");
        self.event_sender
            .send(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status: settled_status,
            })
            .await;

        Ok(updated)
    }
}
