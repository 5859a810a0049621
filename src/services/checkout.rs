use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::AppConfig,
    entities::{address, cart_item, order, order_item, product, user},
    errors::ServiceError,
    events::{Event, EventSender},
    services::pricing::{self, FeePolicy},
};

/// Shipping address payload submitted at checkout. Frozen verbatim into the
/// order snapshot and appended to the user's saved addresses.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct AddressPayload {
    #[validate(length(min = 1, message = "House/flat number is required"))]
    pub house_no: String,
    #[validate(length(min = 1, message = "Area is required"))]
    pub area: String,
    #[serde(default)]
    pub landmark: Option<String>,
    #[validate(length(min = 1, message = "City is required"))]
    pub city: String,
    #[validate(length(min = 1, message = "State is required"))]
    pub state: String,
    #[serde(default)]
    pub country: Option<String>,
    #[validate(length(min = 4, max = 10, message = "Pin code must be 4-10 characters"))]
    pub pin_code: String,
    #[serde(default)]
    pub address_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateDraftRequest {
    #[validate]
    pub address: AddressPayload,
    /// "cod" or "razorpay"
    #[validate(length(min = 1, message = "Payment method is required"))]
    pub payment_method: String,
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DraftOrder {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

/// Checkout orchestrator: converts a user's live cart into a priced,
/// immutable draft order. Stock checks here are advisory; the authoritative
/// check happens again at settlement under a row lock.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    policy: FeePolicy,
}

impl CheckoutService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender, config: &AppConfig) -> Self {
        Self {
            db,
            event_sender,
            policy: FeePolicy {
                free_shipping_threshold: config.free_shipping_threshold,
                shipping_fee: config.shipping_fee,
                cod_fee: config.cod_fee,
            },
        }
    }

    /// Builds and persists a draft order from the user's cart. All side
    /// effects (order, items, address append, profile backfill) commit
    /// together or not at all. The cart itself is left untouched.
    #[instrument(skip(self, request), fields(user_id = %user_id))]
    pub async fn create_draft(
        &self,
        user_id: Uuid,
        request: CreateDraftRequest,
    ) -> Result<DraftOrder, ServiceError> {
        request.validate()?;

        let txn = self.db.begin().await?;

        let account = user::Entity::find_by_id(user_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {user_id} not found")))?;

        let cart = cart_item::Entity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&txn)
            .await?;
        if cart.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let order_id = Uuid::new_v4();
        let mut subtotal: i64 = 0;
        let mut items = Vec::with_capacity(cart.len());

        for line in &cart {
            let product = product::Entity::find_by_id(line.product_id)
                .one(&txn)
                .await?
                .ok_or(ServiceError::ProductNotFound(line.product_id))?;

            if line.quantity <= 0 {
                return Err(ServiceError::InvalidQuantity(product.id));
            }
            // Advisory only: settlement re-checks under lock.
            if product.stock < line.quantity {
                return Err(ServiceError::InsufficientStock(product.name));
            }

            let unit_price = pricing::effective_price_minor(&product);
            subtotal += unit_price * i64::from(line.quantity);

            items.push(order_item::Model {
                id: Uuid::new_v4(),
                order_id,
                product_id: product.id,
                product_name: product.name,
                unit_price,
                quantity: line.quantity,
                product_photo: product.photo_url,
                created_at: Utc::now(),
            });
        }

        let shipping_fee = pricing::shipping_fee(&self.policy, subtotal);
        let cod_fee = pricing::cod_fee(&self.policy, &request.payment_method);
        let discount =
            pricing::compute_discount(request.coupon_code.as_deref(), user_id, &items, subtotal);
        let total_payable = pricing::total_payable(subtotal, shipping_fee, cod_fee, discount);

        // Prefer the stored profile for the snapshot; fall back to the
        // request for accounts registered without a name/phone.
        let customer_name = pick_non_blank(&account.name, request.customer_name.as_deref());
        let phone = pick_non_blank(&account.phone, request.phone.as_deref());

        let a = &request.address;
        let now = Utc::now();
        let draft = order::ActiveModel {
            id: Set(order_id),
            user_id: Set(user_id),
            customer_name: Set(customer_name),
            phone: Set(phone),
            ship_house_no: Set(trimmed(&a.house_no)),
            ship_area: Set(trimmed(&a.area)),
            ship_landmark: Set(a.landmark.as_deref().map(str::trim).unwrap_or("").to_string()),
            ship_city: Set(trimmed(&a.city)),
            ship_state: Set(trimmed(&a.state)),
            ship_country: Set(country_or_default(a.country.as_deref())),
            ship_pin_code: Set(trimmed(&a.pin_code)),
            ship_address_type: Set(address_type_or_default(a.address_type.as_deref())),
            subtotal: Set(subtotal),
            shipping_fee: Set(shipping_fee),
            cod_fee: Set(cod_fee),
            discount: Set(discount),
            total_payable: Set(total_payable),
            status: Set(order::OrderStatus::Draft),
            payment_method: Set(request.payment_method.to_lowercase()),
            gateway_order_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            version: Set(1),
        };
        let saved = draft.insert(&txn).await?;

        for item in &items {
            order_item::ActiveModel {
                id: Set(item.id),
                order_id: Set(order_id),
                product_id: Set(item.product_id),
                product_name: Set(item.product_name.clone()),
                unit_price: Set(item.unit_price),
                quantity: Set(item.quantity),
                product_photo: Set(item.product_photo.clone()),
                created_at: Set(item.created_at),
            }
            .insert(&txn)
            .await?;
        }

        self.append_address(&txn, user_id, a).await?;
        self.backfill_profile(&txn, account, &request).await?;

        txn.commit().await?;

        info!(
            order_id = %order_id,
            subtotal,
            total_payable,
            items = items.len(),
            "draft order created"
        );
        self.event_sender
            .send(Event::OrderCreated {
                order_id,
                user_id,
                total_payable,
            })
            .await;

        Ok(DraftOrder { order: saved, items })
    }

    /// Appends the submitted address to the user's saved list. Always a new
    /// row; the address book is append-only from this core.
    async fn append_address(
        &self,
        txn: &DatabaseTransaction,
        user_id: Uuid,
        a: &AddressPayload,
    ) -> Result<(), ServiceError> {
        address::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            house_no: Set(trimmed(&a.house_no)),
            area: Set(trimmed(&a.area)),
            landmark: Set(a.landmark.as_deref().map(str::trim).unwrap_or("").to_string()),
            city: Set(trimmed(&a.city)),
            state: Set(trimmed(&a.state)),
            country: Set(country_or_default(a.country.as_deref())),
            pin_code: Set(trimmed(&a.pin_code)),
            address_type: Set(address_type_or_default(a.address_type.as_deref())),
            created_at: Set(Utc::now()),
        }
        .insert(txn)
        .await?;
        Ok(())
    }

    /// Fills in the user's name/phone from the request when blank. Non-blank
    /// profile values are never overwritten.
    async fn backfill_profile(
        &self,
        txn: &DatabaseTransaction,
        account: user::Model,
        request: &CreateDraftRequest,
    ) -> Result<(), ServiceError> {
        let fill_name = is_blank(&account.name)
            && request.customer_name.as_deref().is_some_and(|s| !is_blank(s));
        let fill_phone =
            is_blank(&account.phone) && request.phone.as_deref().is_some_and(|s| !is_blank(s));
        if !fill_name && !fill_phone {
            return Ok(());
        }

        let mut active: user::ActiveModel = account.into();
        if fill_name {
            if let Some(name) = request.customer_name.as_deref() {
                active.name = Set(name.trim().to_string());
            }
        }
        if fill_phone {
            if let Some(phone) = request.phone.as_deref() {
                active.phone = Set(phone.trim().to_string());
            }
        }
        active.update(txn).await?;
        Ok(())
    }
}

fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

fn trimmed(s: &str) -> String {
    s.trim().to_string()
}

fn country_or_default(country: Option<&str>) -> String {
    match country {
        Some(c) if !is_blank(c) => c.trim().to_string(),
        _ => "India".to_string(),
    }
}

fn address_type_or_default(address_type: Option<&str>) -> String {
    match address_type {
        Some(t) if !is_blank(t) => t.trim().to_uppercase(),
        _ => "HOME".to_string(),
    }
}

fn pick_non_blank(primary: &str, fallback: Option<&str>) -> String {
    if !is_blank(primary) {
        primary.trim().to_string()
    } else {
        fallback.map(str::trim).unwrap_or("").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_defaults() {
        assert_eq!(country_or_default(None), "India");
        assert_eq!(country_or_default(Some("  ")), "India");
        assert_eq!(country_or_default(Some("Nepal")), "Nepal");
        assert_eq!(address_type_or_default(None), "HOME");
        assert_eq!(address_type_or_default(Some("work")), "WORK");
    }

    #[test]
    fn snapshot_prefers_profile_over_request() {
        assert_eq!(pick_non_blank("Asha", Some("Other")), "Asha");
        assert_eq!(pick_non_blank("  ", Some("Other")), "Other");
        assert_eq!(pick_non_blank("", None), "");
    }
}
