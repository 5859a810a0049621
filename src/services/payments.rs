use std::sync::Arc;

use chrono::Utc;
use hmac::{Hmac, Mac};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use serde::Serialize;
use sha2::Sha256;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    entities::{
        order::{self, OrderStatus},
        payment::{self, PaymentStatus, RefundStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{GatewayPayment, PaymentGateway},
};

type HmacSha256 = Hmac<Sha256>;

/// Lower-case hex HMAC-SHA256 of `data` under `secret`.
pub fn hmac_sha256_hex(secret: &str, data: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time equality over the raw bytes of two strings.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// What a client needs to open the gateway's checkout widget.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GatewayOrderResponse {
    pub gateway_key: String,
    pub gateway_order_id: String,
    pub amount: i64,
    pub currency: String,
}

/// Payment gateway adapter: remote order creation, signature-verified
/// confirmation, refunds, and webhook signature checks. Maintains the local
/// payment row keyed by the gateway order id.
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: EventSender,
    gateway_key_id: String,
    gateway_key_secret: String,
    gateway_webhook_secret: String,
    currency: String,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: EventSender,
        config: &AppConfig,
    ) -> Self {
        Self {
            db,
            gateway,
            event_sender,
            gateway_key_id: config.gateway_key_id.clone(),
            gateway_key_secret: config.gateway_key_secret.clone(),
            gateway_webhook_secret: config.gateway_webhook_secret.clone(),
            currency: config.currency.clone(),
        }
    }

    /// Creates a remote gateway order for the order's total payable.
    ///
    /// Idempotent: an order that already carries a gateway order id returns
    /// the stored reference instead of creating a duplicate remote order.
    /// The gateway call happens before any row is touched, never inside a
    /// transaction.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn create_gateway_order(
        &self,
        order_id: Uuid,
    ) -> Result<GatewayOrderResponse, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        if let Some(existing) = &order.gateway_order_id {
            return Ok(GatewayOrderResponse {
                gateway_key: self.gateway_key_id.clone(),
                gateway_order_id: existing.clone(),
                amount: order.total_payable,
                currency: self.currency.clone(),
            });
        }

        if order.total_payable <= 0 {
            return Err(ServiceError::InvalidPayableAmount(order.total_payable));
        }

        let receipt = format!("rcpt_{order_id}");
        let remote = self
            .gateway
            .create_order(order.total_payable, &self.currency, &receipt)
            .await?;

        let txn = self.db.begin().await?;

        let amount = order.total_payable;
        let old_status = order.status;
        let version = order.version;
        let mut active: order::ActiveModel = order.into();
        active.gateway_order_id = Set(Some(remote.id.clone()));
        if old_status == OrderStatus::Draft {
            active.status = Set(OrderStatus::PaymentPending);
        }
        active.updated_at = Set(Utc::now());
        active.version = Set(version + 1);
        active.update(&txn).await?;

        payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            gateway_order_id: Set(remote.id.clone()),
            gateway_payment_id: Set(None),
            signature: Set(None),
            status: Set(PaymentStatus::Created),
            amount: Set(amount),
            currency: Set(self.currency.clone()),
            method: Set(None),
            upi_vpa: Set(None),
            reference_id: Set(None),
            card_last4: Set(None),
            card_network: Set(None),
            bank_name: Set(None),
            refund_id: Set(None),
            refund_status: Set(None),
            refund_amount: Set(None),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
            version: Set(1),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        info!(gateway_order_id = %remote.id, amount, "gateway order created");
        Ok(GatewayOrderResponse {
            gateway_key: self.gateway_key_id.clone(),
            gateway_order_id: remote.id,
            amount,
            currency: self.currency.clone(),
        })
    }

    /// Synchronous client-driven confirmation.
    ///
    /// Verifies the HMAC over `"{gateway_order_id}|{gateway_payment_id}"`,
    /// then fetches the authoritative payment state from the gateway and
    /// maps it onto the local payment/order rows. A payment already
    /// CAPTURED is an idempotent no-op; this path races the webhook path on
    /// the same row and both must be replay-safe.
    #[instrument(skip(self, signature), fields(order_id = %order_id, gateway_order_id = %gateway_order_id))]
    pub async fn confirm_payment(
        &self,
        order_id: Uuid,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        signature: &str,
    ) -> Result<(), ServiceError> {
        let payload = format!("{gateway_order_id}|{gateway_payment_id}");
        let expected = hmac_sha256_hex(&self.gateway_key_secret, payload.as_bytes());
        // Gateway signatures are lower-case hex; normalize before comparing.
        if !constant_time_eq(&expected, signature.to_lowercase().as_str()) {
            warn!("payment confirmation with invalid signature");
            return Err(ServiceError::InvalidSignature);
        }

        let order = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        let local = payment::Entity::find()
            .filter(payment::Column::GatewayOrderId.eq(gateway_order_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::PaymentNotFound(gateway_order_id.to_string()))?;

        if local.status == PaymentStatus::Captured {
            return Ok(());
        }

        // Authoritative fetch; a gateway failure propagates and leaves both
        // rows untouched for a later retry.
        let remote = self.gateway.fetch_payment(gateway_payment_id).await?;

        if remote.status.eq_ignore_ascii_case("captured") && remote.amount != local.amount {
            warn!(
                expected = local.amount,
                captured = remote.amount,
                "captured amount does not match the payment record"
            );
            return Err(ServiceError::PaymentFailed(format!(
                "captured amount {} does not match expected {}",
                remote.amount, local.amount
            )));
        }

        let txn = self.db.begin().await?;

        let payment_id = local.id;
        let version = local.version;
        let mut active: payment::ActiveModel = local.into();
        active.gateway_payment_id = Set(Some(gateway_payment_id.to_string()));
        active.signature = Set(Some(signature.to_string()));
        apply_method_metadata(&mut active, &remote);

        let (payment_status, order_status) = if remote.status.eq_ignore_ascii_case("captured") {
            active.amount = Set(remote.amount);
            // Settlement is a separate explicit step; the order only leaves
            // DRAFT here, nothing more.
            let next = if order.status == OrderStatus::Draft {
                Some(OrderStatus::PaymentPending)
            } else {
                None
            };
            (PaymentStatus::Captured, next)
        } else if remote.status.eq_ignore_ascii_case("failed") {
            (PaymentStatus::Failed, Some(OrderStatus::Failed))
        } else {
            (PaymentStatus::Attempted, Some(OrderStatus::PaymentPending))
        };
        active.status = Set(payment_status);

        update_payment_guarded(&txn, payment_id, version, active).await?;

        if let Some(next) = order_status {
            if order.status != next {
                let order_version = order.version;
                let mut order_active: order::ActiveModel = order.clone().into();
                order_active.status = Set(next);
                order_active.updated_at = Set(Utc::now());
                order_active.version = Set(order_version + 1);
                order_active.update(&txn).await?;
            }
        }

        txn.commit().await?;

        match payment_status {
            PaymentStatus::Captured => {
                self.event_sender
                    .send(Event::PaymentCaptured {
                        order_id,
                        gateway_payment_id: gateway_payment_id.to_string(),
                        amount: remote.amount,
                    })
                    .await
            }
            PaymentStatus::Failed => {
                self.event_sender
                    .send(Event::PaymentFailed {
                        order_id,
                        gateway_order_id: gateway_order_id.to_string(),
                    })
                    .await
            }
            _ => {}
        }

        info!(status = ?payment_status, "payment confirmation processed");
        Ok(())
    }

    /// Initiates a refund for a captured payment.
    ///
    /// No-op unless the payment is CAPTURED with a gateway payment id. The
    /// refund amount is the captured payment amount, which is authoritative
    /// over the order's total payable. Completion is learned only through
    /// the webhook path; this never assumes success.
    #[instrument(skip(self, payment), fields(order_id = %order.id))]
    pub async fn initiate_refund(
        &self,
        order: order::Model,
        payment: payment::Model,
    ) -> Result<order::Model, ServiceError> {
        if payment.status != PaymentStatus::Captured {
            return Ok(order);
        }
        let Some(gateway_payment_id) = payment.gateway_payment_id.clone() else {
            return Ok(order);
        };

        let refund = self
            .gateway
            .create_refund(&gateway_payment_id, payment.amount)
            .await?;

        let txn = self.db.begin().await?;

        let amount = payment.amount;
        let payment_id = payment.id;
        let version = payment.version;
        let mut active: payment::ActiveModel = payment.into();
        active.refund_id = Set(Some(refund.id.clone()));
        active.refund_status = Set(Some(RefundStatus::Requested));
        active.refund_amount = Set(Some(amount));
        update_payment_guarded(&txn, payment_id, version, active).await?;

        let order_id = order.id;
        let order_version = order.version;
        let mut order_active: order::ActiveModel = order.into();
        order_active.status = Set(OrderStatus::RefundPending);
        order_active.updated_at = Set(Utc::now());
        order_active.version = Set(order_version + 1);
        let updated = order_active.update(&txn).await?;

        txn.commit().await?;

        info!(refund_id = %refund.id, amount, "refund initiated");
        self.event_sender
            .send(Event::RefundRequested {
                order_id,
                refund_id: refund.id,
                amount,
            })
            .await;

        Ok(updated)
    }

    /// Verifies the webhook body HMAC before any parsing happens. Uses a
    /// separate secret from the confirm-payment signature.
    pub fn verify_webhook_signature(&self, raw_body: &[u8], header_signature: &str) -> bool {
        let expected = hmac_sha256_hex(&self.gateway_webhook_secret, raw_body);
        constant_time_eq(&expected, header_signature.to_lowercase().as_str())
    }
}

/// Copies gateway-reported method metadata onto the payment row.
pub(crate) fn apply_method_metadata(active: &mut payment::ActiveModel, remote: &GatewayPayment) {
    active.method = Set(remote.method.clone());
    match remote.method.as_deref() {
        Some("upi") => {
            if let Some(upi) = &remote.upi {
                active.upi_vpa = Set(upi.vpa.clone());
            }
            if let Some(acq) = &remote.acquirer_data {
                active.reference_id = Set(acq.upi_transaction_id.clone());
            }
        }
        Some("card") => {
            if let Some(card) = &remote.card {
                active.card_last4 = Set(card.last4.clone());
                active.card_network = Set(card.network.clone());
            }
        }
        Some("netbanking") => {
            active.bank_name = Set(remote.bank.clone());
            if let Some(acq) = &remote.acquirer_data {
                active.reference_id = Set(acq.bank_transaction_id.clone());
            }
        }
        _ => {}
    }
}

/// Compare-and-swap update on a payment row's version column. A CAS miss
/// means a concurrent confirmation/webhook won the race; the caller
/// surfaces it as a retryable conflict instead of silently overwriting.
pub(crate) async fn update_payment_guarded<C: ConnectionTrait>(
    conn: &C,
    payment_id: Uuid,
    expected_version: i32,
    mut model: payment::ActiveModel,
) -> Result<(), ServiceError> {
    model.id = sea_orm::ActiveValue::NotSet;
    model.version = Set(expected_version + 1);
    model.updated_at = Set(Utc::now());

    let result = payment::Entity::update_many()
        .set(model)
        .filter(payment::Column::Id.eq(payment_id))
        .filter(payment::Column::Version.eq(expected_version))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::ConcurrentModification(payment_id));
    }
    Ok(())
}
