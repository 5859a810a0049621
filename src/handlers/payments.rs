use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    errors::ServiceError, services::payments::GatewayOrderResponse, AppState,
};

use super::user_id_from_headers;

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConfirmPaymentRequest {
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub signature: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ConfirmPaymentResponse {
    pub status: String,
}

/// Creates (or returns the already-created) gateway order for an order, so
/// the client can open the gateway checkout.
#[utoipa::path(
    post,
    path = "/api/orders/{id}/gateway-order",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Gateway order reference", body = GatewayOrderResponse),
        (status = 400, description = "Order total is not payable"),
        (status = 502, description = "Gateway unreachable")
    ),
    tag = "payments"
)]
#[instrument(skip(state, headers), fields(order_id = %order_id))]
pub async fn create_gateway_order(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
) -> Result<Json<GatewayOrderResponse>, ServiceError> {
    let user_id = user_id_from_headers(&headers)?;
    // Ownership gate; the payment itself is keyed by the order.
    state.orders.get_order_for_user(order_id, user_id).await?;
    let response = state.payments.create_gateway_order(order_id).await?;
    Ok(Json(response))
}

/// Client-driven confirmation after the gateway checkout completes. The
/// signature proves the (order, payment) pair came from the gateway.
#[utoipa::path(
    post,
    path = "/api/orders/{id}/confirm-payment",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = ConfirmPaymentRequest,
    responses(
        (status = 200, description = "Confirmation recorded", body = ConfirmPaymentResponse),
        (status = 401, description = "Signature did not verify"),
        (status = 404, description = "No payment for that gateway order"),
        (status = 502, description = "Gateway unreachable")
    ),
    tag = "payments"
)]
#[instrument(skip(state, headers, request), fields(order_id = %order_id))]
pub async fn confirm_payment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
    Json(request): Json<ConfirmPaymentRequest>,
) -> Result<Json<ConfirmPaymentResponse>, ServiceError> {
    let user_id = user_id_from_headers(&headers)?;
    state.orders.get_order_for_user(order_id, user_id).await?;
    state
        .payments
        .confirm_payment(
            order_id,
            &request.gateway_order_id,
            &request.gateway_payment_id,
            &request.signature,
        )
        .await?;
    Ok(Json(ConfirmPaymentResponse {
        status: "ok".to_string(),
    }))
}
