use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use tracing::instrument;

use crate::{
    errors::ServiceError,
    services::checkout::{CreateDraftRequest, DraftOrder},
    AppState,
};

use super::user_id_from_headers;

/// Converts the caller's cart into a draft order.
#[utoipa::path(
    post,
    path = "/api/checkout/draft",
    request_body = CreateDraftRequest,
    responses(
        (status = 201, description = "Draft order created", body = DraftOrder),
        (status = 400, description = "Empty cart or invalid payload"),
        (status = 401, description = "Missing caller identity")
    ),
    tag = "checkout"
)]
#[instrument(skip(state, headers, request))]
pub async fn create_draft_order(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateDraftRequest>,
) -> Result<(StatusCode, Json<DraftOrder>), ServiceError> {
    let user_id = user_id_from_headers(&headers)?;
    let draft = state.checkout.create_draft(user_id, request).await?;
    Ok((StatusCode::CREATED, Json(draft)))
}
