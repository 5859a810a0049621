mod common;

use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

use smartcommerce_api::{
    entities::{
        order::{self, OrderStatus},
        payment::{self, PaymentStatus},
    },
    errors::ServiceError,
};

use common::{
    add_to_cart, confirm_signature, draft_request, seed_product, seed_user, setup_state,
    MockGateway,
};

async fn draft_gateway_order(
    state: &smartcommerce_api::AppState,
) -> (uuid::Uuid, order::Model) {
    let user_id = seed_user(state).await;
    let product = seed_product(state, "Desk Lamp", 30_000, None, 10).await;
    add_to_cart(state, user_id, product, 1).await;
    let draft = state
        .checkout
        .create_draft(user_id, draft_request("razorpay"))
        .await
        .unwrap();
    (user_id, draft.order)
}

#[tokio::test]
async fn gateway_order_creation_is_idempotent() {
    let (state, _gateway) = setup_state().await;
    let (_user, order) = draft_gateway_order(&state).await;

    let first = state.payments.create_gateway_order(order.id).await.unwrap();
    assert_eq!(first.amount, 34_900); // 30000 + shipping 4900
    assert_eq!(first.currency, "INR");
    assert_eq!(first.gateway_key, common::KEY_ID);

    let second = state.payments.create_gateway_order(order.id).await.unwrap();
    assert_eq!(second.gateway_order_id, first.gateway_order_id);

    let rows = payment::Entity::find()
        .filter(payment::Column::OrderId.eq(order.id))
        .all(&*state.db)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, PaymentStatus::Created);
    assert_eq!(rows[0].amount, 34_900);

    let reloaded = order::Entity::find_by_id(order.id)
        .one(&*state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.status, OrderStatus::PaymentPending);
}

#[tokio::test]
async fn gateway_failure_leaves_no_rows_behind() {
    let (state, gateway) = setup_state().await;
    let (_user, order) = draft_gateway_order(&state).await;
    *gateway.fail_create_order.lock().unwrap() = true;

    let err = state.payments.create_gateway_order(order.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::ExternalServiceError(_)));

    let rows = payment::Entity::find()
        .filter(payment::Column::OrderId.eq(order.id))
        .all(&*state.db)
        .await
        .unwrap();
    assert!(rows.is_empty());

    let reloaded = order::Entity::find_by_id(order.id)
        .one(&*state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.status, OrderStatus::Draft);
}

#[tokio::test]
async fn confirm_rejects_bad_signature() {
    let (state, _gateway) = setup_state().await;
    let (_user, order) = draft_gateway_order(&state).await;
    let go = state.payments.create_gateway_order(order.id).await.unwrap();

    let err = state
        .payments
        .confirm_payment(order.id, &go.gateway_order_id, "pay_x", "deadbeef")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidSignature));

    // Nothing moved.
    let row = payment::Entity::find()
        .filter(payment::Column::OrderId.eq(order.id))
        .one(&*state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, PaymentStatus::Created);
}

#[tokio::test]
async fn confirm_captures_payment_without_settling() {
    let (state, gateway) = setup_state().await;
    let (_user, order) = draft_gateway_order(&state).await;
    let go = state.payments.create_gateway_order(order.id).await.unwrap();

    gateway.script_payment(MockGateway::captured_payment(
        "pay_ok",
        &go.gateway_order_id,
        go.amount,
    ));
    let sig = confirm_signature(&go.gateway_order_id, "pay_ok");
    state
        .payments
        .confirm_payment(order.id, &go.gateway_order_id, "pay_ok", &sig)
        .await
        .unwrap();

    let row = payment::Entity::find()
        .filter(payment::Column::OrderId.eq(order.id))
        .one(&*state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, PaymentStatus::Captured);
    assert_eq!(row.gateway_payment_id.as_deref(), Some("pay_ok"));
    assert_eq!(row.method.as_deref(), Some("upi"));

    // Settlement runs off the webhook, not off confirmation.
    let reloaded = order::Entity::find_by_id(order.id)
        .one(&*state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.status, OrderStatus::PaymentPending);

    // Replay is a no-op.
    state
        .payments
        .confirm_payment(order.id, &go.gateway_order_id, "pay_ok", &sig)
        .await
        .unwrap();
}

#[tokio::test]
async fn confirm_rejects_amount_mismatch() {
    let (state, gateway) = setup_state().await;
    let (_user, order) = draft_gateway_order(&state).await;
    let go = state.payments.create_gateway_order(order.id).await.unwrap();

    gateway.script_payment(MockGateway::captured_payment(
        "pay_short",
        &go.gateway_order_id,
        go.amount - 1_000,
    ));
    let sig = confirm_signature(&go.gateway_order_id, "pay_short");
    let err = state
        .payments
        .confirm_payment(order.id, &go.gateway_order_id, "pay_short", &sig)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::PaymentFailed(_)));

    let row = payment::Entity::find()
        .filter(payment::Column::OrderId.eq(order.id))
        .one(&*state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, PaymentStatus::Created);
    assert!(row.gateway_payment_id.is_none());
}

#[tokio::test]
async fn failed_gateway_status_fails_order() {
    let (state, gateway) = setup_state().await;
    let (_user, order) = draft_gateway_order(&state).await;
    let go = state.payments.create_gateway_order(order.id).await.unwrap();

    let mut failed = MockGateway::captured_payment("pay_bad", &go.gateway_order_id, go.amount);
    failed.status = "failed".to_string();
    gateway.script_payment(failed);

    let sig = confirm_signature(&go.gateway_order_id, "pay_bad");
    state
        .payments
        .confirm_payment(order.id, &go.gateway_order_id, "pay_bad", &sig)
        .await
        .unwrap();

    let row = payment::Entity::find()
        .filter(payment::Column::OrderId.eq(order.id))
        .one(&*state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, PaymentStatus::Failed);

    let reloaded = order::Entity::find_by_id(order.id)
        .one(&*state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.status, OrderStatus::Failed);
}

#[tokio::test]
async fn authorized_but_uncaptured_payment_stays_attempted() {
    let (state, gateway) = setup_state().await;
    let (_user, order) = draft_gateway_order(&state).await;
    let go = state.payments.create_gateway_order(order.id).await.unwrap();

    let mut pending = MockGateway::captured_payment("pay_auth", &go.gateway_order_id, go.amount);
    pending.status = "authorized".to_string();
    gateway.script_payment(pending);

    let sig = confirm_signature(&go.gateway_order_id, "pay_auth");
    state
        .payments
        .confirm_payment(order.id, &go.gateway_order_id, "pay_auth", &sig)
        .await
        .unwrap();

    let row = payment::Entity::find()
        .filter(payment::Column::OrderId.eq(order.id))
        .one(&*state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, PaymentStatus::Attempted);

    let reloaded = order::Entity::find_by_id(order.id)
        .one(&*state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.status, OrderStatus::PaymentPending);
}
