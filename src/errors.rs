use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::ToSchema;

use crate::providers::ProviderError;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Checkout session is not open",
    "code": "checkout_session_not_open",
    "request_id": "req-abc123xyz"
}))]
pub struct ErrorResponse {
    /// Human-readable error description
    pub error: String,
    /// Stable machine-readable error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Structured context for operators (never credentials)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub details: Option<Value>,
    /// Suggested next step for operators
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{message}")]
    Validation { code: &'static str, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Checkout session is not open")]
    CheckoutSessionNotOpen,

    #[error("Provider {provider_id} is not configured for this merchant")]
    ProviderNotConfigured { provider_id: String },

    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("More than one active account for provider {0}")]
    AmbiguousProviderAccount(String),

    #[error("Checkout session selection changed concurrently")]
    SelectionConflict,

    #[error("Provider {provider_id} payment id {provider_payment_id} already belongs to another payment")]
    ProviderPaymentIdReused {
        provider_id: String,
        provider_payment_id: String,
    },

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::Validation {
            code: "invalid_request",
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ServiceError {
    fn from(rejection: JsonRejection) -> Self {
        ServiceError::Validation {
            code: "invalid_request",
            message: rejection.body_text(),
        }
    }
}

impl ServiceError {
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        ServiceError::Validation {
            code,
            message: message.into(),
        }
    }

    /// Stable machine-readable code for this error.
    pub fn code(&self) -> String {
        match self {
            Self::Validation { code, .. } => (*code).to_string(),
            Self::NotFound(_) => "not_found".to_string(),
            Self::Unauthorized(_) => "unauthorized".to_string(),
            Self::CheckoutSessionNotOpen => "checkout_session_not_open".to_string(),
            Self::ProviderNotConfigured { .. } => "provider_not_configured".to_string(),
            Self::UnsupportedProvider(_) => "unsupported_provider".to_string(),
            Self::AmbiguousProviderAccount(_) => "provider_account_ambiguous".to_string(),
            Self::SelectionConflict => "checkout_selection_conflict".to_string(),
            Self::ProviderPaymentIdReused { .. } => "provider_payment_id_reused".to_string(),
            Self::Provider(err) => err.code(),
            Self::DatabaseError(_) => "database_error".to_string(),
            Self::InternalError(_) => "internal_error".to_string(),
        }
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } | Self::UnsupportedProvider(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::CheckoutSessionNotOpen
            | Self::ProviderNotConfigured { .. }
            | Self::SelectionConflict
            | Self::ProviderPaymentIdReused { .. } => StatusCode::CONFLICT,
            Self::AmbiguousProviderAccount(_)
            | Self::Provider(_)
            | Self::DatabaseError(_)
            | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) => "Internal server error".to_string(),
            Self::AmbiguousProviderAccount(_) => {
                "Provider account configuration is ambiguous".to_string()
            }
            Self::Provider(_) => "Payment provider request failed".to_string(),
            _ => self.to_string(),
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            Self::ProviderNotConfigured { provider_id } | Self::UnsupportedProvider(provider_id) => {
                Some(json!({ "providerId": provider_id }))
            }
            Self::AmbiguousProviderAccount(provider_id) => {
                Some(json!({ "providerId": provider_id }))
            }
            Self::ProviderPaymentIdReused {
                provider_id,
                provider_payment_id,
            } => Some(json!({ "providerId": provider_id, "providerPaymentId": provider_payment_id })),
            Self::Provider(err) => err.details(),
            _ => None,
        }
    }

    fn hint(&self) -> Option<String> {
        match self {
            Self::ProviderNotConfigured { .. } => {
                Some("Activate a provider account for this merchant and environment".to_string())
            }
            Self::AmbiguousProviderAccount(_) => {
                Some("Disable all but one active account for this provider".to_string())
            }
            Self::SelectionConflict => Some("Reload the checkout session and retry".to_string()),
            Self::ProviderPaymentIdReused { .. } => {
                Some("Use a distinct orderId for every checkout session".to_string())
            }
            Self::Provider(err) => Some(err.hint().to_string()),
            _ => None,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = %self.code(), error = %self, "request failed");
        }

        let body = ErrorResponse {
            error: self.response_message(),
            code: Some(self.code()),
            details: self.details(),
            hint: self.hint(),
            request_id: current_request_id(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_of(response: Response) -> ErrorResponse {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn service_error_response_includes_request_id() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("req-123"), async {
                ServiceError::NotFound("checkout session".into()).into_response()
            })
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let payload = body_of(response).await;
        assert_eq!(payload.request_id.as_deref(), Some("req-123"));
        assert_eq!(payload.code.as_deref(), Some("not_found"));
    }

    #[test]
    fn service_error_status_code_mapping() {
        assert_eq!(
            ServiceError::validation("invalid_amount", "x").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::CheckoutSessionNotOpen.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::ProviderNotConfigured {
                provider_id: "uzum".into()
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::UnsupportedProvider("paypal".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::Provider(ProviderError::MissingRedirectUrl { provider: "uzum" })
                .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn service_error_response_message_hides_internal_details() {
        assert_eq!(
            ServiceError::DatabaseError(DbErr::Custom("password=hunter2".into()))
                .response_message(),
            "Database error"
        );
        assert_eq!(
            ServiceError::InternalError("stack".into()).response_message(),
            "Internal server error"
        );
        assert_eq!(
            ServiceError::validation("invalid_amount", "amount must be >= 0").response_message(),
            "amount must be >= 0"
        );
    }

    #[tokio::test]
    async fn provider_errors_carry_code_details_and_hint() {
        let err = ServiceError::Provider(ProviderError::Rejected {
            provider: "uzum",
            code: "3".into(),
            message: "terminal blocked".into(),
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let payload = body_of(response).await;
        assert_eq!(payload.code.as_deref(), Some("uzum_register_error"));
        assert_eq!(
            payload.details,
            Some(json!({ "providerCode": "3", "providerMessage": "terminal blocked" }))
        );
        assert!(payload.hint.is_some());
    }
}
