use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::order::{self, OrderStatus},
    errors::ServiceError,
    services::orders::{OrderPage, ReplacementItem},
    AppState,
};

use super::{require_admin, requester_from_headers, user_id_from_headers};

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    20
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReplaceItemsRequest {
    pub items: Vec<ReplacementItem>,
}

#[derive(Debug, serde::Serialize, ToSchema)]
pub struct OrderDetail {
    pub order: order::Model,
    pub items: Vec<crate::entities::order_item::Model>,
}

/// Lists the caller's orders, newest first.
#[utoipa::path(
    get,
    path = "/api/orders",
    params(
        ("page" = Option<u64>, Query, description = "1-based page number"),
        ("per_page" = Option<u64>, Query, description = "Page size")
    ),
    responses((status = 200, description = "Page of orders", body = OrderPage)),
    tag = "orders"
)]
#[instrument(skip(state, headers))]
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<OrderPage>, ServiceError> {
    let user_id = user_id_from_headers(&headers)?;
    let page = state
        .orders
        .list_orders_for_user(user_id, query.page, query.per_page.min(100))
        .await?;
    Ok(Json(page))
}

#[utoipa::path(
    get,
    path = "/api/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order with items", body = OrderDetail),
        (status = 403, description = "Order belongs to another user"),
        (status = 404, description = "No such order")
    ),
    tag = "orders"
)]
#[instrument(skip(state, headers), fields(order_id = %order_id))]
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderDetail>, ServiceError> {
    let user_id = user_id_from_headers(&headers)?;
    let (order, items) = state.orders.get_order_for_user(order_id, user_id).await?;
    Ok(Json(OrderDetail { order, items }))
}

/// Cancels an order; a captured payment triggers the refund path instead of
/// a plain cancellation.
#[utoipa::path(
    post,
    path = "/api/orders/{id}/cancel",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Cancellation outcome", body = order::Model),
        (status = 409, description = "Order already delivered")
    ),
    tag = "orders"
)]
#[instrument(skip(state, headers), fields(order_id = %order_id))]
pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
) -> Result<Json<order::Model>, ServiceError> {
    let requester = requester_from_headers(&headers)?;
    let order = state.orders.cancel_order(order_id, requester).await?;
    Ok(Json(order))
}

/// Back-office fulfillment progression (PACKED, SHIPPED, DELIVERED, ...).
#[utoipa::path(
    post,
    path = "/api/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Updated order", body = order::Model),
        (status = 409, description = "Transition not allowed")
    ),
    tag = "orders"
)]
#[instrument(skip(state, headers), fields(order_id = %order_id))]
pub async fn update_order_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<order::Model>, ServiceError> {
    require_admin(&headers)?;
    let order = state.orders.update_status(order_id, request.status).await?;
    Ok(Json(order))
}

/// Back-office item correction: replaces the order's item list wholesale.
#[utoipa::path(
    put,
    path = "/api/orders/{id}/items",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = ReplaceItemsRequest,
    responses((status = 200, description = "Resulting item list")),
    tag = "orders"
)]
#[instrument(skip(state, headers, request), fields(order_id = %order_id))]
pub async fn replace_order_items(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
    Json(request): Json<ReplaceItemsRequest>,
) -> Result<Json<Vec<crate::entities::order_item::Model>>, ServiceError> {
    require_admin(&headers)?;
    let items = state.orders.replace_items(order_id, request.items).await?;
    Ok(Json(items))
}

/// Places a cash-on-delivery order: settles stock immediately and confirms
/// the order without any gateway involvement.
#[utoipa::path(
    post,
    path = "/api/orders/{id}/place-cod",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Confirmed order", body = order::Model),
        (status = 400, description = "Order is not cash-on-delivery"),
        (status = 409, description = "Order is not placeable"),
        (status = 422, description = "Stock ran out before settlement")
    ),
    tag = "orders"
)]
#[instrument(skip(state, headers), fields(order_id = %order_id))]
pub async fn place_cod_order(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
) -> Result<Json<order::Model>, ServiceError> {
    let user_id = user_id_from_headers(&headers)?;
    let (order, _) = state.orders.get_order_for_user(order_id, user_id).await?;

    if !order.payment_method.eq_ignore_ascii_case("cod") {
        return Err(ServiceError::ValidationError(
            "Order is not cash-on-delivery".to_string(),
        ));
    }
    match order.status {
        // Re-placing an already confirmed COD order is a no-op.
        OrderStatus::Draft | OrderStatus::Confirmed => {}
        other => {
            return Err(ServiceError::IllegalStateTransition(format!(
                "{other:?} -> Confirmed"
            )))
        }
    }

    let settled = state.settlement.settle(order_id).await?;
    Ok(Json(settled))
}
