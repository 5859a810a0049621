use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use tracing::{error, instrument, warn};

use crate::{errors::ServiceError, AppState};

const SIGNATURE_HEADER: &str = "x-razorpay-signature";

/// Gateway webhook receiver.
///
/// The only rejection is a missing or invalid signature (401). Everything
/// after verification is acknowledged with 200 even when processing fails,
/// so the gateway's retry loop is driven by our logs, not by 5xx storms;
/// every handled event is replay-safe.
#[utoipa::path(
    post,
    path = "/api/razorpay/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Acknowledged"),
        (status = 401, description = "Signature missing or invalid")
    ),
    tag = "payments"
)]
#[instrument(skip(state, headers, body))]
pub async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ServiceError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(ServiceError::InvalidSignature)?;

    if !state.payments.verify_webhook_signature(&body, signature) {
        warn!("webhook rejected: signature did not verify");
        return Err(ServiceError::InvalidSignature);
    }

    if let Err(err) = state.webhooks.handle_event(&body).await {
        // Still acknowledged; the failure is surfaced through logs and the
        // event can be replayed safely from the gateway dashboard.
        error!(error = %err, "webhook processing failed");
    }

    Ok(StatusCode::OK)
}
