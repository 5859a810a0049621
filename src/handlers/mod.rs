use std::sync::Arc;

use axum::{
    http::HeaderMap,
    routing::{get, post, put},
    Router,
};
use uuid::Uuid;

use crate::{errors::ServiceError, services::orders::Requester, AppState};

pub mod checkout;
pub mod orders;
pub mod payment_webhooks;
pub mod payments;

/// Caller identity from the `x-user-id` header. An upstream gateway has
/// already authenticated the request; this service only needs the id.
pub(crate) fn user_id_from_headers(headers: &HeaderMap) -> Result<Uuid, ServiceError> {
    let raw = headers
        .get("x-user-id")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ServiceError::Unauthorized("Missing x-user-id header".to_string()))?;
    Uuid::parse_str(raw)
        .map_err(|_| ServiceError::Unauthorized("Invalid x-user-id header".to_string()))
}

/// Requester for ownership-scoped operations. `x-user-role: admin` is set
/// by the upstream gateway for back-office traffic.
pub(crate) fn requester_from_headers(headers: &HeaderMap) -> Result<Requester, ServiceError> {
    if is_admin(headers) {
        return Ok(Requester::Admin);
    }
    Ok(Requester::User(user_id_from_headers(headers)?))
}

pub(crate) fn is_admin(headers: &HeaderMap) -> bool {
    headers
        .get("x-user-role")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|role| role.eq_ignore_ascii_case("admin"))
}

pub(crate) fn require_admin(headers: &HeaderMap) -> Result<(), ServiceError> {
    if is_admin(headers) {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(
            "Admin role required".to_string(),
        ))
    }
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/checkout/draft", post(checkout::create_draft_order))
        .route("/api/orders", get(orders::list_orders))
        .route("/api/orders/:id", get(orders::get_order))
        .route("/api/orders/:id/cancel", post(orders::cancel_order))
        .route("/api/orders/:id/status", post(orders::update_order_status))
        .route("/api/orders/:id/items", put(orders::replace_order_items))
        .route("/api/orders/:id/place-cod", post(orders::place_cod_order))
        .route(
            "/api/orders/:id/gateway-order",
            post(payments::create_gateway_order),
        )
        .route(
            "/api/orders/:id/confirm-payment",
            post(payments::confirm_payment),
        )
        .route(
            "/api/razorpay/webhook",
            post(payment_webhooks::handle_webhook),
        )
}

async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}
