use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::{
        order::{self, OrderStatus},
        order_item,
        payment::{self, PaymentStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::payments::PaymentService,
};

/// Who is asking for an ownership-scoped operation. Authentication happened
/// upstream; this core only checks ownership.
#[derive(Debug, Clone, Copy)]
pub enum Requester {
    User(Uuid),
    Admin,
}

/// Replacement line for the authorized item-correction flow.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReplacementItem {
    pub product_id: Uuid,
    pub product_name: String,
    pub unit_price: i64,
    pub quantity: i32,
    #[serde(default)]
    pub product_photo: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderPage {
    pub orders: Vec<order::Model>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Order aggregate operations: ownership-scoped reads, the admin-driven
/// fulfillment progression, cancellation with refund fallback, and the
/// explicit item-replacement correction flow.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    payments: Arc<PaymentService>,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        payments: Arc<PaymentService>,
    ) -> Self {
        Self {
            db,
            event_sender,
            payments,
        }
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))
    }

    /// Ownership-scoped fetch: 404 for a missing order, 403 for another
    /// user's order.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order_for_user(
        &self,
        order_id: Uuid,
        user_id: Uuid,
    ) -> Result<(order::Model, Vec<order_item::Model>), ServiceError> {
        let order = self.get_order(order_id).await?;
        if order.user_id != user_id {
            return Err(ServiceError::Forbidden(
                "You cannot access another user's order".to_string(),
            ));
        }
        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok((order, items))
    }

    pub fn is_owner(order: &order::Model, requester: Requester) -> bool {
        match requester {
            Requester::Admin => true,
            Requester::User(user_id) => order.user_id == user_id,
        }
    }

    /// Lists a user's orders, newest first.
    #[instrument(skip(self))]
    pub async fn list_orders_for_user(
        &self,
        user_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<OrderPage, ServiceError> {
        let paginator = order::Entity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page.max(1));

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok(OrderPage {
            orders,
            total,
            page,
            per_page,
        })
    }

    /// Admin-driven status update (fulfillment progression and the like),
    /// guarded by the lifecycle transition table. Updating to the current
    /// status is a no-op returning the order unchanged.
    #[instrument(skip(self), fields(order_id = %order_id, new_status = ?new_status))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let order = order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;
        let old_status = order.status;

        if old_status == new_status {
            return Ok(order);
        }
        if !old_status.can_transition_to(new_status) {
            return Err(ServiceError::IllegalStateTransition(format!(
                "{old_status:?} -> {new_status:?}"
            )));
        }

        let version = order.version;
        let mut active: order::ActiveModel = order.into();
        active.status = Set(new_status);
        active.updated_at = Set(Utc::now());
        active.version = Set(version + 1);
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        info!(?old_status, ?new_status, "order status updated");
        self.event_sender
            .send(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            })
            .await;

        Ok(updated)
    }

    /// Cancels an order.
    ///
    /// - Already REFUND_PENDING/REFUNDED: no-op returning the current state.
    /// - DELIVERED: rejected.
    /// - A captured payment forces the refund path: the order moves to
    ///   REFUND_PENDING via refund initiation instead of being marked
    ///   CANCELLED, so a failed gateway refund leaves the order untouched
    ///   and the cancel retryable. This also covers the race where
    ///   settlement won against a concurrent cancellation.
    /// - Already CANCELLED: normally a no-op, but a capture that landed (or
    ///   a refund initiation that failed) after the cancellation re-enters
    ///   the refund path so captured money is never stranded.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        requester: Requester,
    ) -> Result<order::Model, ServiceError> {
        let order = self.get_order(order_id).await?;
        if !Self::is_owner(&order, requester) {
            return Err(ServiceError::Forbidden("Not your order".to_string()));
        }

        match order.status {
            OrderStatus::RefundPending | OrderStatus::Refunded => return Ok(order),
            OrderStatus::Delivered => {
                return Err(ServiceError::IllegalStateTransition(
                    "Order cannot be cancelled after delivery".to_string(),
                ))
            }
            OrderStatus::Cancelled => {
                if let Some(p) = self.captured_unrefunded_payment(order_id).await? {
                    return self.payments.initiate_refund(order, p).await;
                }
                return Ok(order);
            }
            _ => {}
        }

        // Money already captured: the refund path replaces the plain
        // cancellation, and nothing is committed until the gateway accepted
        // the refund.
        if let Some(p) = self.captured_unrefunded_payment(order_id).await? {
            return self.payments.initiate_refund(order, p).await;
        }

        let old_status = order.status;
        let txn = self.db.begin().await?;

        let version = order.version;
        let mut active: order::ActiveModel = order.into();
        active.status = Set(OrderStatus::Cancelled);
        active.updated_at = Set(Utc::now());
        active.version = Set(version + 1);
        let cancelled = active.update(&txn).await?;
        txn.commit().await?;

        self.event_sender
            .send(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status: OrderStatus::Cancelled,
            })
            .await;

        Ok(cancelled)
    }

    /// A captured payment with a gateway payment id and no refund recorded
    /// yet, if one exists for the order.
    async fn captured_unrefunded_payment(
        &self,
        order_id: Uuid,
    ) -> Result<Option<payment::Model>, ServiceError> {
        let captured = payment::Entity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .filter(payment::Column::Status.eq(PaymentStatus::Captured))
            .one(&*self.db)
            .await?;
        Ok(captured.filter(|p| {
            p.refund_id.is_none()
                && p.gateway_payment_id.as_deref().is_some_and(|id| !id.is_empty())
        }))
    }

    /// Replaces an order's item list with an explicit diff: items missing
    /// from the replacement set are deleted, new ones inserted, all in one
    /// transaction. Matching is by the full business key (product, name,
    /// price, quantity, photo) so a correction never mutates rows in place.
    #[instrument(skip(self, replacement), fields(order_id = %order_id))]
    pub async fn replace_items(
        &self,
        order_id: Uuid,
        replacement: Vec<ReplacementItem>,
    ) -> Result<Vec<order_item::Model>, ServiceError> {
        let txn = self.db.begin().await?;

        let order = order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        let existing = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;

        let matches = |item: &order_item::Model, r: &ReplacementItem| {
            item.product_id == r.product_id
                && item.product_name == r.product_name
                && item.unit_price == r.unit_price
                && item.quantity == r.quantity
                && item.product_photo == r.product_photo
        };

        for item in &existing {
            if !replacement.iter().any(|r| matches(item, r)) {
                order_item::Entity::delete_by_id(item.id).exec(&txn).await?;
            }
        }
        for r in &replacement {
            if !existing.iter().any(|item| matches(item, r)) {
                order_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    order_id: Set(order_id),
                    product_id: Set(r.product_id),
                    product_name: Set(r.product_name.clone()),
                    unit_price: Set(r.unit_price),
                    quantity: Set(r.quantity),
                    product_photo: Set(r.product_photo.clone()),
                    created_at: Set(Utc::now()),
                }
                .insert(&txn)
                .await?;
            }
        }

        let version = order.version;
        let mut active: order::ActiveModel = order.into();
        active.updated_at = Set(Utc::now());
        active.version = Set(version + 1);
        active.update(&txn).await?;

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(&txn)
            .await?;
        txn.commit().await?;

        if items.is_empty() {
            warn!("order left with no items after replacement");
        }
        Ok(items)
    }
}
