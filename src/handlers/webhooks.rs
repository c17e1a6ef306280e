use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;

use super::common::success_response;
use crate::errors::ServiceError;
use crate::notifications::CheckoutUpdate;
use crate::AppState;

/// Acknowledgement returned to providers.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub ok: bool,
}

pub fn webhook_routes() -> Router<Arc<AppState>> {
    Router::new().route("/{provider_id}", post(receive_webhook))
}

/// Provider callback ingestion
///
/// Answers 200 once the delivery is logged, whether or not it changed any
/// state. Only a failure to log the delivery produces an error response.
#[utoipa::path(
    post,
    path = "/webhooks/{provider_id}",
    params(("provider_id" = String, Path, description = "Provider that sent the callback")),
    request_body(content = String, description = "Provider-defined payload, usually JSON"),
    responses(
        (status = 200, description = "Delivery logged", body = WebhookAck),
        (status = 500, description = "Delivery could not be logged", body = crate::errors::ErrorResponse)
    ),
    tag = "webhooks"
)]
pub async fn receive_webhook(
    State(state): State<Arc<AppState>>,
    Path(provider_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let result = state
        .services
        .webhooks
        .handle_webhook_event(&provider_id, &body, &headers, state.environment)
        .await?;

    if let Some(public_token) = result.checkout_public_token.as_deref() {
        let update = CheckoutUpdate::new(public_token, result.payment_intent_id, result.status);
        // Best-effort: a failed publish never changes the acknowledgement.
        match state.notifier.publish(public_token, &update).await {
            Ok(()) => info!(%provider_id, "checkout update published"),
            Err(err) => warn!(%provider_id, error = %err, "checkout update publish failed"),
        }
    }

    Ok(success_response(WebhookAck { ok: true }))
}
