use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Json, Path, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::put,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use utoipa::ToSchema;
use validator::Validate;

use super::common::{success_response, validate_input, validate_metadata_object};
use crate::entities::AccountStatus;
use crate::errors::ServiceError;
use crate::services::checkout::ProviderAccountInput;
use crate::AppState;

pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Operator endpoints. Only mounted when an admin key is configured.
pub fn admin_routes() -> Router<Arc<AppState>> {
    Router::new().route("/orgs/{org_id}/providers/{provider_id}", put(upsert_provider_account))
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(example = json!({
    "status": "active",
    "displayLabel": "Uzum Bank",
    "credentials": {
        "apiBaseUrl": "https://checkout.uzumbank.uz",
        "terminalId": "T-100",
        "apiKey": "secret"
    }
}))]
pub struct ProviderAccountRequest {
    #[serde(default)]
    pub status: Option<AccountStatus>,
    #[validate(length(min = 1, max = 128))]
    pub display_label: Option<String>,
    #[validate(custom = "validate_metadata_object")]
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Value>,
    /// Already-decrypted credential blob for the provider
    #[schema(value_type = Object)]
    pub credentials: Value,
}

fn keys_match(expected: &str, supplied: &str) -> bool {
    if expected.len() != supplied.len() {
        return false;
    }
    expected
        .bytes()
        .zip(supplied.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ServiceError> {
    let Some(expected) = state.admin_api_key.as_deref() else {
        return Err(ServiceError::Unauthorized("admin access is disabled".to_string()));
    };
    let supplied = headers
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if keys_match(expected, supplied) {
        Ok(())
    } else {
        warn!("rejected admin request with a missing or wrong key");
        Err(ServiceError::Unauthorized("invalid admin key".to_string()))
    }
}

/// Create or replace a merchant's provider account in the configured environment
#[utoipa::path(
    put,
    path = "/admin/orgs/{org_id}/providers/{provider_id}",
    params(
        ("org_id" = String, Path, description = "Merchant organization"),
        ("provider_id" = String, Path, description = "Registered provider id"),
        ("x-admin-key" = String, Header, description = "Operator key")
    ),
    request_body = ProviderAccountRequest,
    responses(
        (status = 200, description = "Account saved", body = crate::services::checkout::ProviderAccountView),
        (status = 400, description = "Invalid request or unsupported provider", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing or wrong admin key", body = crate::errors::ErrorResponse)
    ),
    tag = "admin"
)]
pub async fn upsert_provider_account(
    State(state): State<Arc<AppState>>,
    Path((org_id, provider_id)): Path<(String, String)>,
    headers: HeaderMap,
    payload: Result<Json<ProviderAccountRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ServiceError> {
    authorize(&state, &headers)?;
    let Json(payload) = payload?;
    validate_input(&payload)?;

    let saved = state
        .services
        .checkout
        .seed_provider_account(
            &org_id,
            &provider_id,
            ProviderAccountInput {
                status: payload.status.unwrap_or(AccountStatus::Active),
                display_label: payload.display_label,
                metadata: payload.metadata.unwrap_or(Value::Null),
                credentials: payload.credentials,
            },
        )
        .await?;

    Ok(success_response(saved))
}

#[cfg(test)]
mod tests {
    use super::keys_match;

    #[test]
    fn key_comparison_requires_exact_match() {
        assert!(keys_match("s3cret", "s3cret"));
        assert!(!keys_match("s3cret", "s3cre"));
        assert!(!keys_match("s3cret", "S3cret"));
        assert!(!keys_match("s3cret", ""));
    }
}
