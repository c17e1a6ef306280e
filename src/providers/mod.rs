//! Provider adapters: the per-provider seam for registering a payment and
//! reading its webhooks.

pub mod click;
pub mod registry;
pub mod uzum;

pub use registry::ProviderRegistry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::{checkout_session, payment_intent, PaymentStatus, ProviderEnvironment};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider} credential {field} is required")]
    MissingCredential {
        provider: &'static str,
        field: &'static str,
    },

    #[error("{provider} credentials are malformed")]
    InvalidCredentials { provider: &'static str },

    #[error("{provider} does not accept currency {currency}")]
    UnsupportedCurrency {
        provider: &'static str,
        currency: String,
    },

    #[error("{provider} requires https success and failure URLs")]
    HttpsReturnUrlRequired { provider: &'static str },

    #[error("{provider} registration returned HTTP {status}")]
    RegisterHttp { provider: &'static str, status: u16 },

    #[error("{provider} registration response could not be parsed")]
    InvalidResponse { provider: &'static str },

    #[error("{provider} rejected the registration: {code} {message}")]
    Rejected {
        provider: &'static str,
        code: String,
        message: String,
    },

    #[error("{provider} did not return a redirect URL")]
    MissingRedirectUrl { provider: &'static str },

    #[error("{provider} transport error: {message}")]
    Transport {
        provider: &'static str,
        message: String,
    },

    #[error("{provider} did not answer within {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },
}

impl ProviderError {
    /// Machine code prefixed with the provider id, e.g. `uzum_register_http_502`.
    pub fn code(&self) -> String {
        match self {
            Self::MissingCredential { provider, field } => {
                format!("{provider}_{}_is_required", snake_case(field))
            }
            Self::InvalidCredentials { provider } => format!("{provider}_credentials_invalid"),
            Self::UnsupportedCurrency { provider, .. } => {
                format!("{provider}_unsupported_currency")
            }
            Self::HttpsReturnUrlRequired { provider } => {
                format!("{provider}_requires_https_success_and_failure_urls")
            }
            Self::RegisterHttp { provider, status } => {
                format!("{provider}_register_http_{status}")
            }
            Self::InvalidResponse { provider } => format!("{provider}_register_invalid_response"),
            Self::Rejected { provider, .. } => format!("{provider}_register_error"),
            Self::MissingRedirectUrl { provider } => format!("{provider}_missing_redirect_url"),
            Self::Transport { provider, .. } => format!("{provider}_transport_error"),
            Self::Timeout { .. } => "provider_timeout".to_string(),
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            Self::MissingCredential { field, .. } => Some(json!({ "field": field })),
            Self::UnsupportedCurrency { currency, .. } => Some(json!({ "currency": currency })),
            Self::RegisterHttp { status, .. } => Some(json!({ "httpStatus": status })),
            Self::Rejected { code, message, .. } => {
                Some(json!({ "providerCode": code, "providerMessage": message }))
            }
            Self::Timeout {
                provider,
                timeout_ms,
            } => Some(json!({ "providerId": provider, "timeoutMs": timeout_ms })),
            _ => None,
        }
    }

    pub fn hint(&self) -> &'static str {
        match self {
            Self::MissingCredential { .. } | Self::InvalidCredentials { .. } => {
                "Check the stored credentials for this provider account"
            }
            Self::UnsupportedCurrency { .. } => "Create the checkout in a currency the provider supports",
            Self::HttpsReturnUrlRequired { .. } => {
                "Pass https successUrl and cancelUrl or configure an https pay page"
            }
            Self::RegisterHttp { .. } | Self::InvalidResponse { .. } | Self::Transport { .. } => {
                "The provider API is unavailable; retry the selection later"
            }
            Self::Rejected { .. } => "Inspect the provider code and the merchant terminal setup",
            Self::MissingRedirectUrl { .. } => "Contact the provider about the registration result",
            Self::Timeout { .. } => "The provider is slow; retry the selection later",
        }
    }
}

fn snake_case(field: &str) -> String {
    let mut out = String::with_capacity(field.len() + 4);
    for ch in field.chars() {
        if ch.is_ascii_uppercase() {
            out.push('_');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// How the payer's client will show the provider page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViewType {
    WebView,
    Iframe,
    #[default]
    Redirect,
}

impl ViewType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WebView => "WEB_VIEW",
            Self::Iframe => "IFRAME",
            Self::Redirect => "REDIRECT",
        }
    }
}

/// Everything an adapter needs to register one attempt.
#[derive(Debug, Clone)]
pub struct AttemptContext {
    pub attempt_id: Uuid,
    pub org_provider_account_id: Uuid,
    /// Decrypted credential blob of the selected account.
    pub credentials: Value,
    pub intent: payment_intent::Model,
    pub session: checkout_session::Model,
    pub environment: ProviderEnvironment,
    /// The hosted pay page for this session, used as the last-resort return URL.
    pub pay_page_url: String,
    pub view_type: ViewType,
}

impl AttemptContext {
    /// First https candidate among the session's success/return URLs, the
    /// intent's return URL and the pay page.
    pub fn success_url(&self) -> Option<String> {
        first_https([
            self.session.success_url.as_deref(),
            self.session.return_url.as_deref(),
            self.intent.return_url.as_deref(),
            Some(self.pay_page_url.as_str()),
        ])
    }

    pub fn failure_url(&self) -> Option<String> {
        first_https([
            self.session.cancel_url.as_deref(),
            self.session.return_url.as_deref(),
            self.intent.return_url.as_deref(),
            Some(self.pay_page_url.as_str()),
        ])
    }
}

fn first_https<'a>(candidates: impl IntoIterator<Item = Option<&'a str>>) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|candidate| {
            url::Url::parse(candidate)
                .map(|parsed| parsed.scheme() == "https")
                .unwrap_or(false)
        })
        .map(str::to_string)
}

/// What an adapter records about a registration; stored on the attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum RegistrationRecord {
    Uzum {
        environment: ProviderEnvironment,
        request: Value,
        response: Value,
    },
    Click {
        environment: ProviderEnvironment,
        redirect_url: String,
        transaction_param: String,
    },
    /// Adapters outside this crate record their provider body verbatim.
    External { provider_id: String, body: Value },
}

impl RegistrationRecord {
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({}))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderAttemptResult {
    pub redirect_url: String,
    pub provider_payment_id: Option<String>,
    /// `requires_action` or `processing`.
    pub status: PaymentStatus,
    pub raw: RegistrationRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Succeeded,
    Failed,
    Processing,
    /// Recognized event that does not move the payment (refund notices etc.).
    NotActionable,
    Unrecognized,
}

impl WebhookOutcome {
    pub fn target_status(self) -> Option<PaymentStatus> {
        match self {
            Self::Succeeded => Some(PaymentStatus::Succeeded),
            Self::Failed => Some(PaymentStatus::Failed),
            Self::Processing => Some(PaymentStatus::Processing),
            Self::NotActionable | Self::Unrecognized => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookInterpretation {
    pub provider_event_id: Option<String>,
    pub provider_payment_id: Option<String>,
    pub event_type: String,
    pub outcome: WebhookOutcome,
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider_id(&self) -> &str;

    /// Register the payment with the provider and return where to send the payer.
    async fn create_attempt(
        &self,
        ctx: &AttemptContext,
    ) -> Result<ProviderAttemptResult, ProviderError>;

    /// Map a parsed webhook payload to a normalized outcome.
    fn interpret_webhook(&self, payload: &Value) -> WebhookInterpretation {
        interpret_generic(payload)
    }
}

/// Read a string-ish field, accepting JSON numbers as their decimal text.
pub(crate) fn field_as_string(payload: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match payload.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Payload reading used when no adapter-specific mapping applies.
pub fn interpret_generic(payload: &Value) -> WebhookInterpretation {
    let outcome = match field_as_string(payload, &["status"])
        .map(|s| s.to_ascii_lowercase())
        .as_deref()
    {
        Some("succeeded") => WebhookOutcome::Succeeded,
        Some("failed") => WebhookOutcome::Failed,
        Some("processing") => WebhookOutcome::Processing,
        _ => WebhookOutcome::Unrecognized,
    };

    WebhookInterpretation {
        provider_event_id: field_as_string(payload, &["id", "event_id", "eventId"]),
        provider_payment_id: field_as_string(payload, &["payment_id", "paymentId"]),
        event_type: field_as_string(payload, &["event", "type", "event_type"])
            .unwrap_or_else(|| "unknown".to_string()),
        outcome,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::entities::SessionStatus;
    use chrono::Utc;

    pub fn intent(amount_minor: i64, currency: &str) -> payment_intent::Model {
        let now = Utc::now();
        payment_intent::Model {
            id: Uuid::new_v4(),
            org_id: "org_1".into(),
            amount_minor,
            currency: currency.into(),
            description: None,
            order_id: Some("order-42".into()),
            status: PaymentStatus::Open,
            client_secret: "secret".into(),
            return_url: None,
            metadata: json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn session(intent: &payment_intent::Model) -> checkout_session::Model {
        let now = Utc::now();
        checkout_session::Model {
            id: Uuid::new_v4(),
            org_id: intent.org_id.clone(),
            public_token: "tok".into(),
            payment_intent_id: intent.id,
            customer_id: None,
            status: SessionStatus::Open,
            selected_provider_id: None,
            selected_attempt_id: None,
            success_url: None,
            cancel_url: None,
            return_url: None,
            metadata: json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn context(credentials: Value, amount_minor: i64, currency: &str) -> AttemptContext {
        let intent = intent(amount_minor, currency);
        let session = session(&intent);
        AttemptContext {
            attempt_id: Uuid::new_v4(),
            org_provider_account_id: Uuid::new_v4(),
            credentials,
            intent,
            session,
            environment: ProviderEnvironment::Live,
            pay_page_url: "https://pay.test/pay/tok".into(),
            view_type: ViewType::Redirect,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_url_prefers_session_then_falls_back_to_pay_page() {
        let mut ctx = test_support::context(json!({}), 100, "UZS");
        assert_eq!(ctx.success_url().as_deref(), Some("https://pay.test/pay/tok"));

        ctx.session.success_url = Some("http://insecure.example/ok".into());
        ctx.intent.return_url = Some("https://shop.example/return".into());
        assert_eq!(
            ctx.success_url().as_deref(),
            Some("https://shop.example/return")
        );

        ctx.session.cancel_url = Some("https://shop.example/cancel".into());
        assert_eq!(
            ctx.failure_url().as_deref(),
            Some("https://shop.example/cancel")
        );
    }

    #[test]
    fn no_https_candidate_yields_none() {
        let mut ctx = test_support::context(json!({}), 100, "UZS");
        ctx.pay_page_url = "http://localhost:8080/pay/tok".into();
        assert_eq!(ctx.success_url(), None);
    }

    #[test]
    fn generic_interpretation_reads_common_fields() {
        let parsed = interpret_generic(&json!({
            "id": 17,
            "payment_id": "pay_1",
            "event": "payment.updated",
            "status": "SUCCEEDED"
        }));
        assert_eq!(parsed.provider_event_id.as_deref(), Some("17"));
        assert_eq!(parsed.provider_payment_id.as_deref(), Some("pay_1"));
        assert_eq!(parsed.event_type, "payment.updated");
        assert_eq!(parsed.outcome, WebhookOutcome::Succeeded);

        let unknown = interpret_generic(&json!({ "raw": "not json" }));
        assert_eq!(unknown.event_type, "unknown");
        assert_eq!(unknown.outcome, WebhookOutcome::Unrecognized);
    }

    #[test]
    fn error_codes_are_prefixed_by_provider() {
        assert_eq!(
            ProviderError::MissingCredential {
                provider: "uzum",
                field: "terminalId"
            }
            .code(),
            "uzum_terminal_id_is_required"
        );
        assert_eq!(
            ProviderError::RegisterHttp {
                provider: "uzum",
                status: 502
            }
            .code(),
            "uzum_register_http_502"
        );
        assert_eq!(
            ProviderError::Timeout {
                provider: "click".into(),
                timeout_ms: 15000
            }
            .code(),
            "provider_timeout"
        );
    }
}
