use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::{
    entities::{
        order::{self, OrderStatus},
        payment::{self, PaymentStatus, RefundStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{GatewayPayment, GatewayRefund},
    services::{
        payments::{apply_method_metadata, update_payment_guarded, PaymentService},
        settlement::SettlementService,
    },
};

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    event: String,
    #[serde(default)]
    payload: WebhookPayload,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    payment: Option<EntityWrapper<GatewayPayment>>,
    #[serde(default)]
    refund: Option<EntityWrapper<GatewayRefund>>,
}

#[derive(Debug, Deserialize)]
struct EntityWrapper<T> {
    entity: T,
}

/// Dispatches signature-verified gateway webhook events onto the local
/// payment and order rows. Delivery is at-least-once, so every branch must
/// tolerate replays and out-of-order arrival.
pub struct WebhookService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    settlement: Arc<SettlementService>,
    payments: Arc<PaymentService>,
}

impl WebhookService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        settlement: Arc<SettlementService>,
        payments: Arc<PaymentService>,
    ) -> Self {
        Self {
            db,
            event_sender,
            settlement,
            payments,
        }
    }

    /// Parses and dispatches one webhook delivery. The signature has already
    /// been verified against the raw body. A body that does not parse, or an
    /// event type we do not handle, is logged and acknowledged so the
    /// gateway stops retrying it.
    #[instrument(skip(self, raw_body))]
    pub async fn handle_event(&self, raw_body: &[u8]) -> Result<(), ServiceError> {
        let envelope: WebhookEnvelope = match serde_json::from_slice(raw_body) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "webhook body did not parse, acknowledging");
                return Ok(());
            }
        };

        match envelope.event.as_str() {
            "payment.captured" => match envelope.payload.payment {
                Some(wrapper) => self.on_payment_captured(wrapper.entity).await,
                None => {
                    warn!("payment.captured webhook without a payment entity");
                    Ok(())
                }
            },
            "payment.failed" => match envelope.payload.payment {
                Some(wrapper) => self.on_payment_failed(wrapper.entity).await,
                None => {
                    warn!("payment.failed webhook without a payment entity");
                    Ok(())
                }
            },
            "refund.processed" => match envelope.payload.refund {
                Some(wrapper) => self.on_refund_processed(wrapper.entity).await,
                None => {
                    warn!("refund.processed webhook without a refund entity");
                    Ok(())
                }
            },
            "refund.failed" => match envelope.payload.refund {
                Some(wrapper) => self.on_refund_failed(wrapper.entity).await,
                None => {
                    warn!("refund.failed webhook without a refund entity");
                    Ok(())
                }
            },
            other => {
                debug!(event = other, "ignoring unhandled webhook event");
                Ok(())
            }
        }
    }

    /// Marks the payment captured, then either settles the order or, when
    /// the order was cancelled while the capture was in flight, initiates a
    /// refund instead. Settlement is itself idempotent, so a replayed
    /// capture after the order is already PAID is harmless.
    async fn on_payment_captured(&self, remote: GatewayPayment) -> Result<(), ServiceError> {
        let Some(local) = payment::Entity::find()
            .filter(payment::Column::GatewayOrderId.eq(remote.order_id.as_str()))
            .one(&*self.db)
            .await?
        else {
            warn!(gateway_order_id = %remote.order_id, "capture webhook for unknown gateway order");
            return Ok(());
        };
        let order_id = local.order_id;
        let payment_id = local.id;

        if local.status != PaymentStatus::Captured {
            // Same rule as the synchronous confirm path: a captured amount
            // that does not match the payment record is never accepted.
            if remote.amount != local.amount {
                warn!(
                    expected = local.amount,
                    captured = remote.amount,
                    "capture webhook amount differs from the payment record, not capturing"
                );
                return Ok(());
            }

            let version = local.version;
            let gateway_payment_id = remote.id.clone();
            let amount = remote.amount;
            let mut active: payment::ActiveModel = local.into();
            active.gateway_payment_id = Set(Some(gateway_payment_id.clone()));
            active.status = Set(PaymentStatus::Captured);
            apply_method_metadata(&mut active, &remote);

            match update_payment_guarded(&*self.db, payment_id, version, active).await {
                Ok(()) => {
                    self.event_sender
                        .send(Event::PaymentCaptured {
                            order_id,
                            gateway_payment_id,
                            amount,
                        })
                        .await;
                }
                // A concurrent confirmation won the row; the routing below
                // still has to run.
                Err(ServiceError::ConcurrentModification(_)) => {
                    warn!(payment_id = %payment_id, "capture webhook lost a concurrent update race");
                }
                Err(err) => return Err(err),
            }
        }

        let Some(order) = order::Entity::find_by_id(order_id).one(&*self.db).await? else {
            warn!(order_id = %order_id, "captured payment references a missing order");
            return Ok(());
        };

        // Money that arrived for an already-cancelled order goes back; the
        // cancellation/settlement race resolves to the refund path.
        if order.status == OrderStatus::Cancelled {
            if let Some(captured) = payment::Entity::find_by_id(payment_id)
                .one(&*self.db)
                .await?
                .filter(|p| p.status == PaymentStatus::Captured && p.refund_id.is_none())
            {
                self.payments.initiate_refund(order, captured).await?;
            }
            return Ok(());
        }

        self.settlement.settle(order_id).await?;
        Ok(())
    }

    /// Records a terminal payment failure. A capture that already landed
    /// wins over a late failure delivery.
    async fn on_payment_failed(&self, remote: GatewayPayment) -> Result<(), ServiceError> {
        let Some(local) = payment::Entity::find()
            .filter(payment::Column::GatewayOrderId.eq(remote.order_id.as_str()))
            .one(&*self.db)
            .await?
        else {
            warn!(gateway_order_id = %remote.order_id, "failure webhook for unknown gateway order");
            return Ok(());
        };

        if local.status == PaymentStatus::Captured || local.status == PaymentStatus::Failed {
            return Ok(());
        }

        let order_id = local.order_id;
        let payment_id = local.id;
        let version = local.version;
        let gateway_order_id = remote.order_id.clone();
        let mut active: payment::ActiveModel = local.into();
        active.gateway_payment_id = Set(Some(remote.id.clone()));
        active.status = Set(PaymentStatus::Failed);
        apply_method_metadata(&mut active, &remote);
        update_payment_guarded(&*self.db, payment_id, version, active).await?;

        if let Some(order) = order::Entity::find_by_id(order_id).one(&*self.db).await? {
            if order.status.can_transition_to(OrderStatus::Failed) {
                let order_version = order.version;
                let mut order_active: order::ActiveModel = order.into();
                order_active.status = Set(OrderStatus::Failed);
                order_active.updated_at = Set(Utc::now());
                order_active.version = Set(order_version + 1);
                order_active.update(&*self.db).await?;
            }
        }

        self.event_sender
            .send(Event::PaymentFailed {
                order_id,
                gateway_order_id,
            })
            .await;
        Ok(())
    }

    /// Completes a refund: the payment becomes REFUNDED and the order moves
    /// out of REFUND_PENDING.
    async fn on_refund_processed(&self, remote: GatewayRefund) -> Result<(), ServiceError> {
        let Some(local) = payment::Entity::find()
            .filter(payment::Column::RefundId.eq(remote.id.as_str()))
            .one(&*self.db)
            .await?
        else {
            warn!(refund_id = %remote.id, "refund webhook for unknown refund");
            return Ok(());
        };

        if local.refund_status == Some(RefundStatus::Processed) {
            return Ok(());
        }

        let order_id = local.order_id;
        let payment_id = local.id;
        let version = local.version;
        let refund_id = remote.id.clone();
        let mut active: payment::ActiveModel = local.into();
        active.refund_status = Set(Some(RefundStatus::Processed));
        active.status = Set(PaymentStatus::Refunded);
        update_payment_guarded(&*self.db, payment_id, version, active).await?;

        if let Some(order) = order::Entity::find_by_id(order_id).one(&*self.db).await? {
            if order.status.can_transition_to(OrderStatus::Refunded) {
                let order_version = order.version;
                let mut order_active: order::ActiveModel = order.into();
                order_active.status = Set(OrderStatus::Refunded);
                order_active.updated_at = Set(Utc::now());
                order_active.version = Set(order_version + 1);
                order_active.update(&*self.db).await?;
            }
        }

        self.event_sender
            .send(Event::RefundProcessed {
                order_id,
                refund_id,
            })
            .await;
        Ok(())
    }

    /// A failed refund keeps the order in REFUND_PENDING for manual
    /// follow-up; only the refund sub-state records the failure.
    async fn on_refund_failed(&self, remote: GatewayRefund) -> Result<(), ServiceError> {
        let Some(local) = payment::Entity::find()
            .filter(payment::Column::RefundId.eq(remote.id.as_str()))
            .one(&*self.db)
            .await?
        else {
            warn!(refund_id = %remote.id, "refund-failed webhook for unknown refund");
            return Ok(());
        };

        if local.refund_status == Some(RefundStatus::Processed) {
            return Ok(());
        }

        warn!(refund_id = %remote.id, order_id = %local.order_id, "gateway reported refund failure");

        let payment_id = local.id;
        let version = local.version;
        let mut active: payment::ActiveModel = local.into();
        active.refund_status = Set(Some(RefundStatus::Failed));
        update_payment_guarded(&*self.db, payment_id, version, active).await?;
        Ok(())
    }
}
