use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Redirect},
    routing::post,
    Router,
};
use serde::Deserialize;
use utoipa::IntoParams;

use super::common::required_field;
use crate::errors::ServiceError;
use crate::providers::ViewType;
use crate::AppState;

/// Hosted pay page actions
pub fn pay_routes() -> Router<Arc<AppState>> {
    Router::new().route("/{public_token}/select", post(select_and_redirect))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct PaySelectQuery {
    /// Provider the payer picked
    pub provider: Option<String>,
}

/// Start an attempt from the pay page and send the payer to the provider
#[utoipa::path(
    post,
    path = "/pay/{public_token}/select",
    params(
        ("public_token" = String, Path, description = "Public checkout token"),
        PaySelectQuery
    ),
    responses(
        (status = 303, description = "Redirect to the provider's payment page"),
        (status = 400, description = "Missing provider", body = crate::errors::ErrorResponse),
        (status = 409, description = "Session not open or provider not configured", body = crate::errors::ErrorResponse),
        (status = 500, description = "Provider failure", body = crate::errors::ErrorResponse)
    ),
    tag = "pay"
)]
pub async fn select_and_redirect(
    State(state): State<Arc<AppState>>,
    Path(public_token): Path<String>,
    Query(query): Query<PaySelectQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let provider_id = required_field(query.provider, "provider")?;

    let selected = state
        .services
        .checkout
        .select_provider_create_attempt(&public_token, &provider_id, ViewType::Redirect)
        .await?;

    Ok(Redirect::to(&selected.redirect_url))
}
