mod common;

use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

use smartcommerce_api::{
    entities::{address, cart_item, order::OrderStatus, user},
    errors::ServiceError,
};

use common::{add_to_cart, draft_request, seed_product, seed_user, setup_state};

#[tokio::test]
async fn draft_order_snapshots_cart_with_fees() {
    let (state, _gateway) = setup_state().await;
    let user_id = seed_user(&state).await;
    // 2 x 7500 + 1 x discounted 5000 = 20000, below free shipping.
    let soap = seed_product(&state, "Sandalwood Soap", 7_500, None, 10).await;
    let oil = seed_product(&state, "Hair Oil", 6_000, Some(5_000), 5).await;
    add_to_cart(&state, user_id, soap, 2).await;
    add_to_cart(&state, user_id, oil, 1).await;

    let draft = state
        .checkout
        .create_draft(user_id, draft_request("cod"))
        .await
        .unwrap();

    assert_eq!(draft.order.status, OrderStatus::Draft);
    assert_eq!(draft.order.subtotal, 20_000);
    assert_eq!(draft.order.shipping_fee, 4_900);
    assert_eq!(draft.order.cod_fee, 3_000);
    assert_eq!(draft.order.discount, 0);
    assert_eq!(draft.order.total_payable, 27_900);
    assert_eq!(draft.items.len(), 2);

    // Discounted unit price is frozen into the snapshot.
    let oil_line = draft.items.iter().find(|i| i.product_id == oil).unwrap();
    assert_eq!(oil_line.unit_price, 5_000);
    assert_eq!(oil_line.product_name, "Hair Oil");

    // The live cart is untouched until settlement.
    let cart = cart_item::Entity::find()
        .filter(cart_item::Column::UserId.eq(user_id))
        .all(&*state.db)
        .await
        .unwrap();
    assert_eq!(cart.len(), 2);
}

#[tokio::test]
async fn empty_cart_is_rejected() {
    let (state, _gateway) = setup_state().await;
    let user_id = seed_user(&state).await;

    let err = state
        .checkout
        .create_draft(user_id, draft_request("cod"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::EmptyCart));
}

#[tokio::test]
async fn free_shipping_and_coupon_apply_above_thresholds() {
    let (state, _gateway) = setup_state().await;
    let user_id = seed_user(&state).await;
    let eligible = seed_product(&state, "Gift Hamper", 100_000, None, 3).await;
    add_to_cart(&state, user_id, eligible, 1).await;

    let mut request = draft_request("razorpay");
    request.coupon_code = Some("FLAT50".to_string());

    let draft = state.checkout.create_draft(user_id, request).await.unwrap();

    assert_eq!(draft.order.subtotal, 100_000);
    assert_eq!(draft.order.shipping_fee, 0);
    assert_eq!(draft.order.cod_fee, 0);
    assert_eq!(draft.order.discount, 5_000);
    assert_eq!(draft.order.total_payable, 95_000);
}

#[tokio::test]
async fn unknown_coupon_is_ignored() {
    let (state, _gateway) = setup_state().await;
    let user_id = seed_user(&state).await;
    let product = seed_product(&state, "Candle", 100_000, None, 3).await;
    add_to_cart(&state, user_id, product, 1).await;

    let mut request = draft_request("razorpay");
    request.coupon_code = Some("NOTACOUPON".to_string());

    let draft = state.checkout.create_draft(user_id, request).await.unwrap();
    assert_eq!(draft.order.discount, 0);
    assert_eq!(draft.order.total_payable, 100_000);
}

#[tokio::test]
async fn checkout_appends_address_and_backfills_profile() {
    let (state, _gateway) = setup_state().await;
    let user_id = seed_user(&state).await;

    // Blank out the profile so checkout can backfill it.
    let account = user::Entity::find_by_id(user_id)
        .one(&*state.db)
        .await
        .unwrap()
        .unwrap();
    let mut blank: user::ActiveModel = account.into();
    blank.name = sea_orm::Set(String::new());
    blank.phone = sea_orm::Set(String::new());
    sea_orm::ActiveModelTrait::update(blank, &*state.db)
        .await
        .unwrap();

    let product = seed_product(&state, "Mug", 10_000, None, 2).await;
    add_to_cart(&state, user_id, product, 1).await;

    let mut request = draft_request("cod");
    request.customer_name = Some("Asha Rao".to_string());
    request.phone = Some("8888888888".to_string());

    let draft = state.checkout.create_draft(user_id, request).await.unwrap();
    assert_eq!(draft.order.customer_name, "Asha Rao");
    assert_eq!(draft.order.ship_city, "Bengaluru");
    assert_eq!(draft.order.ship_country, "India");
    assert_eq!(draft.order.ship_address_type, "HOME");

    let saved = address::Entity::find()
        .filter(address::Column::UserId.eq(user_id))
        .all(&*state.db)
        .await
        .unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].pin_code, "560001");

    let account = user::Entity::find_by_id(user_id)
        .one(&*state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.name, "Asha Rao");
    assert_eq!(account.phone, "8888888888");
}

#[tokio::test]
async fn advisory_stock_check_rejects_oversized_cart() {
    let (state, _gateway) = setup_state().await;
    let user_id = seed_user(&state).await;
    let product = seed_product(&state, "Rare Print", 50_000, None, 1).await;
    add_to_cart(&state, user_id, product, 3).await;

    let err = state
        .checkout
        .create_draft(user_id, draft_request("cod"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InsufficientStock(_)));
}
