//! Pricing and coupon evaluation for a cart snapshot.
//!
//! Everything here is a pure function of its inputs so checkout totals are
//! deterministic and testable without a database. All amounts are integer
//! minor units (paise).

use uuid::Uuid;

use crate::entities::{order_item, product};

/// Fee policy, sourced from configuration at checkout time.
#[derive(Debug, Clone, Copy)]
pub struct FeePolicy {
    /// Subtotal at or above which shipping is waived.
    pub free_shipping_threshold: i64,
    /// Flat shipping fee below the threshold.
    pub shipping_fee: i64,
    /// Surcharge applied only to cash-on-delivery orders.
    pub cod_fee: i64,
}

/// The effective price of a product: the lower positive of its list price
/// and discount price. Client-submitted prices are never consulted.
pub fn effective_price_minor(product: &product::Model) -> i64 {
    match product.discount_price {
        Some(discounted) if discounted > 0 && discounted < product.price => discounted,
        _ => product.price,
    }
}

/// Flat shipping fee, waived once the subtotal clears the threshold.
pub fn shipping_fee(policy: &FeePolicy, subtotal: i64) -> i64 {
    if subtotal >= policy.free_shipping_threshold {
        0
    } else {
        policy.shipping_fee
    }
}

/// COD surcharge; zero for gateway payments.
pub fn cod_fee(policy: &FeePolicy, payment_method: &str) -> i64 {
    if payment_method.eq_ignore_ascii_case("cod") {
        policy.cod_fee
    } else {
        0
    }
}

/// Coupon evaluation. Unknown or non-qualifying codes yield zero discount,
/// never an error, so checkout cannot hard-fail on a bad coupon.
pub fn compute_discount(
    coupon_code: Option<&str>,
    _user_id: Uuid,
    _items: &[order_item::Model],
    subtotal: i64,
) -> i64 {
    let Some(code) = coupon_code else { return 0 };
    if code.trim().is_empty() {
        return 0;
    }

    // FLAT50: flat 5000 off carts of 99900 or more.
    if code.eq_ignore_ascii_case("FLAT50") && subtotal >= 99_900 {
        return 5_000;
    }

    0
}

/// `max(0, subtotal + shipping + cod - discount)` — the only formula that
/// ever produces an order's total payable.
pub fn total_payable(subtotal: i64, shipping_fee: i64, cod_fee: i64, discount: i64) -> i64 {
    (subtotal + shipping_fee + cod_fee - discount).max(0)
}
