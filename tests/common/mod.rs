#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, Set};
use uuid::Uuid;

use smartcommerce_api::{
    config::AppConfig,
    db,
    entities::{cart_item, product, user},
    errors::ServiceError,
    events::spawn_event_logger,
    gateway::{GatewayOrder, GatewayPayment, GatewayRefund, PaymentGateway},
    services::payments::hmac_sha256_hex,
    AppState,
};

pub const KEY_ID: &str = "rzp_test_key";
pub const KEY_SECRET: &str = "test_key_secret_0123456789";
pub const WEBHOOK_SECRET: &str = "test_webhook_secret_0123456789";

/// Scripted in-memory gateway. Orders get sequential ids; payments and
/// refund outcomes are whatever the test programmed in.
#[derive(Default)]
pub struct MockGateway {
    order_seq: AtomicU64,
    refund_seq: AtomicU64,
    payments: Mutex<HashMap<String, GatewayPayment>>,
    pub fail_create_order: Mutex<bool>,
    pub fail_create_refund: Mutex<bool>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the payment the gateway will report for `payment_id`.
    pub fn script_payment(&self, payment: GatewayPayment) {
        let mut payments = self.payments.lock().unwrap();
        payments.insert(payment.id.clone(), payment);
    }

    pub fn captured_payment(payment_id: &str, gateway_order_id: &str, amount: i64) -> GatewayPayment {
        GatewayPayment {
            id: payment_id.to_string(),
            order_id: gateway_order_id.to_string(),
            amount,
            currency: "INR".to_string(),
            status: "captured".to_string(),
            method: Some("upi".to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_order(
        &self,
        amount: i64,
        currency: &str,
        _receipt: &str,
    ) -> Result<GatewayOrder, ServiceError> {
        if *self.fail_create_order.lock().unwrap() {
            return Err(ServiceError::ExternalServiceError(
                "gateway unreachable".to_string(),
            ));
        }
        let n = self.order_seq.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(GatewayOrder {
            id: format!("order_mock_{n}"),
            amount,
            currency: currency.to_string(),
            status: "created".to_string(),
        })
    }

    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment, ServiceError> {
        let payments = self.payments.lock().unwrap();
        payments
            .get(payment_id)
            .cloned()
            .ok_or_else(|| ServiceError::ExternalServiceError("unknown payment".to_string()))
    }

    async fn create_refund(
        &self,
        _payment_id: &str,
        amount: i64,
    ) -> Result<GatewayRefund, ServiceError> {
        if *self.fail_create_refund.lock().unwrap() {
            return Err(ServiceError::ExternalServiceError(
                "gateway unreachable".to_string(),
            ));
        }
        let n = self.refund_seq.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(GatewayRefund {
            id: format!("rfnd_mock_{n}"),
            amount,
            status: "created".to_string(),
        })
    }
}

/// Fresh in-memory database plus a fully wired state over the mock gateway.
pub async fn setup_state() -> (Arc<AppState>, Arc<MockGateway>) {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).min_connections(1);
    let conn = Database::connect(options)
        .await
        .expect("sqlite connect failed");
    db::create_schema(&conn).await.expect("schema creation failed");

    let config = AppConfig::new("sqlite::memory:", KEY_ID, KEY_SECRET, WEBHOOK_SECRET);
    let gateway = Arc::new(MockGateway::new());
    let (event_sender, _task) = spawn_event_logger(256);

    let state = AppState::new(Arc::new(conn), config, gateway.clone(), event_sender);
    (Arc::new(state), gateway)
}

pub async fn seed_user(state: &AppState) -> Uuid {
    let id = Uuid::new_v4();
    user::ActiveModel {
        id: Set(id),
        email: Set(format!("{id}@example.com")),
        name: Set("Test User".to_string()),
        phone: Set("9999999999".to_string()),
        created_at: Set(Utc::now()),
    }
    .insert(&*state.db)
    .await
    .expect("user insert failed");
    id
}

pub async fn seed_product(
    state: &AppState,
    name: &str,
    price: i64,
    discount_price: Option<i64>,
    stock: i32,
) -> Uuid {
    let id = Uuid::new_v4();
    product::ActiveModel {
        id: Set(id),
        name: Set(name.to_string()),
        price: Set(price),
        discount_price: Set(discount_price),
        stock: Set(stock),
        in_stock: Set(stock > 0),
        photo_url: Set(None),
        created_at: Set(Utc::now()),
        updated_at: Set(Utc::now()),
    }
    .insert(&*state.db)
    .await
    .expect("product insert failed");
    id
}

pub async fn add_to_cart(state: &AppState, user_id: Uuid, product_id: Uuid, quantity: i32) {
    cart_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        product_id: Set(product_id),
        quantity: Set(quantity),
        created_at: Set(Utc::now()),
    }
    .insert(&*state.db)
    .await
    .expect("cart insert failed");
}

/// Signature the gateway checkout widget would hand back to the client.
pub fn confirm_signature(gateway_order_id: &str, gateway_payment_id: &str) -> String {
    hmac_sha256_hex(
        KEY_SECRET,
        format!("{gateway_order_id}|{gateway_payment_id}").as_bytes(),
    )
}

/// Signature the gateway would set on a webhook delivery.
pub fn webhook_signature(body: &[u8]) -> String {
    hmac_sha256_hex(WEBHOOK_SECRET, body)
}

/// A checkout address used across the suites.
pub fn test_address() -> smartcommerce_api::services::checkout::AddressPayload {
    smartcommerce_api::services::checkout::AddressPayload {
        house_no: "12B".to_string(),
        area: "MG Road".to_string(),
        landmark: Some("Opposite the park".to_string()),
        city: "Bengaluru".to_string(),
        state: "Karnataka".to_string(),
        country: None,
        pin_code: "560001".to_string(),
        address_type: None,
    }
}

pub fn draft_request(payment_method: &str) -> smartcommerce_api::services::checkout::CreateDraftRequest {
    smartcommerce_api::services::checkout::CreateDraftRequest {
        address: test_address(),
        payment_method: payment_method.to_string(),
        coupon_code: None,
        customer_name: None,
        phone: None,
    }
}
