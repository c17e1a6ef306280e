//! Uzum Bank checkout: server-side registration returning a hosted payment page.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use super::{
    field_as_string, AttemptContext, ProviderAdapter, ProviderAttemptResult, ProviderError,
    RegistrationRecord, WebhookInterpretation, WebhookOutcome,
};
use crate::entities::PaymentStatus;

pub const PROVIDER_ID: &str = "uzum";

const REGISTER_PATH: &str = "/api/v1/payment/register";
const DEFAULT_CONTENT_LANGUAGE: &str = "ru-RU";
const SESSION_TIMEOUT_SECS: u32 = 1800;
const ISO_4217_UZS: u16 = 860;
const MAX_ORDER_NUMBER_LEN: usize = 36;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UzumCredentials {
    api_base_url: Option<String>,
    terminal_id: Option<String>,
    api_key: Option<String>,
    content_language: Option<String>,
}

/// Validated credential set.
#[derive(Debug)]
struct Credentials {
    api_base_url: String,
    terminal_id: String,
    api_key: String,
    content_language: String,
}

impl Credentials {
    fn parse(blob: &Value) -> Result<Self, ProviderError> {
        let raw: UzumCredentials = serde_json::from_value(blob.clone()).map_err(|_| {
            ProviderError::InvalidCredentials {
                provider: PROVIDER_ID,
            }
        })?;

        Ok(Self {
            api_base_url: required(raw.api_base_url, "apiBaseUrl")?
                .trim_end_matches('/')
                .to_string(),
            terminal_id: required(raw.terminal_id, "terminalId")?,
            api_key: required(raw.api_key, "apiKey")?,
            content_language: raw
                .content_language
                .filter(|lang| !lang.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CONTENT_LANGUAGE.to_string()),
        })
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ProviderError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(ProviderError::MissingCredential {
            provider: PROVIDER_ID,
            field,
        })
}

fn currency_code(currency: &str) -> Result<u16, ProviderError> {
    match currency.trim().to_ascii_uppercase().as_str() {
        "UZS" | "860" => Ok(ISO_4217_UZS),
        _ => Err(ProviderError::UnsupportedCurrency {
            provider: PROVIDER_ID,
            currency: currency.to_string(),
        }),
    }
}

fn order_number(ctx: &AttemptContext) -> String {
    match ctx.intent.order_id.as_deref() {
        Some(order) if !order.is_empty() && order.len() <= MAX_ORDER_NUMBER_LEN => {
            order.to_string()
        }
        _ => ctx.intent.id.to_string(),
    }
}

/// Cart line items live in session metadata as `uzumCart` or `uzum.cart`.
fn cart_from_metadata(metadata: &Value) -> Option<Value> {
    metadata
        .get("uzumCart")
        .filter(|cart| cart.is_object())
        .or_else(|| metadata.get("uzum")?.get("cart").filter(|cart| cart.is_object()))
        .cloned()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterResponse {
    #[serde(default)]
    error_code: Option<Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    result: Option<RegisterResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterResult {
    order_id: Option<String>,
    payment_redirect_url: Option<String>,
}

impl RegisterResponse {
    fn error_code(&self) -> i64 {
        match &self.error_code {
            Some(Value::Number(n)) => n.as_i64().unwrap_or(-1),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(-1),
            _ => 0,
        }
    }
}

pub struct UzumAdapter {
    client: reqwest::Client,
}

impl UzumAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build_request_body(
        &self,
        ctx: &AttemptContext,
        success_url: String,
        failure_url: String,
    ) -> Result<Value, ProviderError> {
        let mut body = json!({
            "amount": ctx.intent.amount_minor,
            "clientId": ctx
                .session
                .customer_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| ctx.session.org_id.clone()),
            "currency": currency_code(&ctx.intent.currency)?,
            "paymentDetails": ctx.intent.description.as_deref().unwrap_or("Payment"),
            "orderNumber": order_number(ctx),
            "viewType": ctx.view_type.as_str(),
            "sessionTimeoutSecs": SESSION_TIMEOUT_SECS,
            "successUrl": success_url,
            "failureUrl": failure_url,
            "paymentParams": { "payType": "ONE_STEP" },
        });

        if let Some(cart) = cart_from_metadata(&ctx.session.metadata) {
            body["merchantParams"] = json!({ "cart": cart });
        }

        Ok(body)
    }
}

impl Default for UzumAdapter {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl ProviderAdapter for UzumAdapter {
    fn provider_id(&self) -> &str {
        PROVIDER_ID
    }

    #[instrument(skip(self, ctx), fields(attempt_id = %ctx.attempt_id))]
    async fn create_attempt(
        &self,
        ctx: &AttemptContext,
    ) -> Result<ProviderAttemptResult, ProviderError> {
        let creds = Credentials::parse(&ctx.credentials)?;

        let (success_url, failure_url) = match (ctx.success_url(), ctx.failure_url()) {
            (Some(success), Some(failure)) => (success, failure),
            _ => {
                return Err(ProviderError::HttpsReturnUrlRequired {
                    provider: PROVIDER_ID,
                })
            }
        };

        let body = self.build_request_body(ctx, success_url, failure_url)?;
        let url = format!("{}{}", creds.api_base_url, REGISTER_PATH);
        debug!(%url, "registering uzum payment");

        let response = self
            .client
            .post(&url)
            .header("Content-Language", &creds.content_language)
            .header("X-Terminal-Id", &creds.terminal_id)
            .header("X-API-Key", &creds.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport {
                provider: PROVIDER_ID,
                message: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| ProviderError::Transport {
            provider: PROVIDER_ID,
            message: e.to_string(),
        })?;

        if !status.is_success() {
            warn!(status = status.as_u16(), body = %text, "uzum registration failed");
            return Err(ProviderError::RegisterHttp {
                provider: PROVIDER_ID,
                status: status.as_u16(),
            });
        }

        let response_json: Value = serde_json::from_str(&text).map_err(|_| {
            warn!(body = %text, "uzum registration returned non-JSON body");
            ProviderError::InvalidResponse {
                provider: PROVIDER_ID,
            }
        })?;
        let parsed: RegisterResponse = serde_json::from_value(response_json.clone())
            .map_err(|_| ProviderError::InvalidResponse {
                provider: PROVIDER_ID,
            })?;

        let error_code = parsed.error_code();
        if error_code != 0 {
            return Err(ProviderError::Rejected {
                provider: PROVIDER_ID,
                code: error_code.to_string(),
                message: parsed.message.unwrap_or_else(|| "Uzum error".to_string()),
            });
        }

        let result = parsed.result.unwrap_or(RegisterResult {
            order_id: None,
            payment_redirect_url: None,
        });
        let redirect_url = result
            .payment_redirect_url
            .filter(|u| !u.is_empty())
            .ok_or(ProviderError::MissingRedirectUrl {
                provider: PROVIDER_ID,
            })?;

        Ok(ProviderAttemptResult {
            redirect_url,
            provider_payment_id: result.order_id,
            status: PaymentStatus::RequiresAction,
            raw: RegistrationRecord::Uzum {
                environment: ctx.environment,
                request: body,
                response: response_json,
            },
        })
    }

    fn interpret_webhook(&self, payload: &Value) -> WebhookInterpretation {
        let state = field_as_string(payload, &["status", "operationState"])
            .map(|s| s.to_ascii_uppercase());

        let outcome = match state.as_deref() {
            Some("COMPLETED" | "SUCCESS") => WebhookOutcome::Succeeded,
            Some("REGISTERED" | "AUTHORIZED" | "PROCESSING") => WebhookOutcome::Processing,
            Some("DECLINED" | "FAILED" | "CANCELED" | "CANCELLED" | "REJECTED") => {
                WebhookOutcome::Failed
            }
            Some("REVERSED" | "REFUNDED") => WebhookOutcome::NotActionable,
            _ => WebhookOutcome::Unrecognized,
        };

        WebhookInterpretation {
            provider_event_id: field_as_string(payload, &["operationId", "id"]),
            provider_payment_id: field_as_string(payload, &["orderId", "payment_id"]),
            event_type: field_as_string(payload, &["operationType", "event"])
                .unwrap_or_else(|| "unknown".to_string()),
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_support::context;
    use assert_matches::assert_matches;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn creds(base: &str) -> Value {
        json!({ "apiBaseUrl": format!("{base}/"), "terminalId": "T-1", "apiKey": "k-1" })
    }

    #[tokio::test]
    async fn registers_payment_and_returns_redirect() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(REGISTER_PATH))
            .and(header("X-Terminal-Id", "T-1"))
            .and(header("X-API-Key", "k-1"))
            .and(header("Content-Language", "ru-RU"))
            .and(body_partial_json(json!({
                "amount": 150000,
                "currency": 860,
                "orderNumber": "order-42",
                "viewType": "REDIRECT",
                "successUrl": "https://pay.test/pay/tok",
                "paymentParams": { "payType": "ONE_STEP" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errorCode": 0,
                "result": { "orderId": "uz-1", "paymentRedirectUrl": "https://pay.example/abc" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let ctx = context(creds(&server.uri()), 150000, "UZS");
        let result = UzumAdapter::default().create_attempt(&ctx).await.unwrap();

        assert_eq!(result.redirect_url, "https://pay.example/abc");
        assert_eq!(result.provider_payment_id.as_deref(), Some("uz-1"));
        assert_eq!(result.status, PaymentStatus::RequiresAction);
        assert_matches!(result.raw, RegistrationRecord::Uzum { .. });
    }

    #[tokio::test]
    async fn cart_metadata_is_forwarded_as_merchant_params() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "merchantParams": { "cart": { "items": [] } } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errorCode": 0,
                "result": { "orderId": "uz-2", "paymentRedirectUrl": "https://pay.example/c" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut ctx = context(creds(&server.uri()), 500, "UZS");
        ctx.session.metadata = json!({ "uzum": { "cart": { "items": [] } } });
        assert!(UzumAdapter::default().create_attempt(&ctx).await.is_ok());
    }

    #[tokio::test]
    async fn non_success_http_status_maps_to_register_http_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let ctx = context(creds(&server.uri()), 100, "UZS");
        let err = UzumAdapter::default().create_attempt(&ctx).await.unwrap_err();
        assert_eq!(err.code(), "uzum_register_http_502");
    }

    #[tokio::test]
    async fn provider_error_code_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errorCode": 3,
                "message": "terminal blocked"
            })))
            .mount(&server)
            .await;

        let ctx = context(creds(&server.uri()), 100, "UZS");
        let err = UzumAdapter::default().create_attempt(&ctx).await.unwrap_err();
        assert_matches!(err, ProviderError::Rejected { ref code, .. } if code == "3");
    }

    #[tokio::test]
    async fn missing_redirect_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "errorCode": 0, "result": {} })),
            )
            .mount(&server)
            .await;

        let ctx = context(creds(&server.uri()), 100, "UZS");
        let err = UzumAdapter::default().create_attempt(&ctx).await.unwrap_err();
        assert_eq!(err.code(), "uzum_missing_redirect_url");
    }

    #[tokio::test]
    async fn rejects_bad_input_before_calling_out() {
        let adapter = UzumAdapter::default();

        let ctx = context(json!({ "apiBaseUrl": "https://x", "apiKey": "k" }), 100, "UZS");
        assert_eq!(
            adapter.create_attempt(&ctx).await.unwrap_err().code(),
            "uzum_terminal_id_is_required"
        );

        let ctx = context(creds("https://x"), 100, "USD");
        assert_eq!(
            adapter.create_attempt(&ctx).await.unwrap_err().code(),
            "uzum_unsupported_currency"
        );

        let mut ctx = context(creds("https://x"), 100, "UZS");
        ctx.pay_page_url = "http://localhost/pay/tok".into();
        assert_eq!(
            adapter.create_attempt(&ctx).await.unwrap_err().code(),
            "uzum_requires_https_success_and_failure_urls"
        );
    }

    #[test]
    fn long_order_ids_fall_back_to_intent_id() {
        let mut ctx = context(json!({}), 100, "UZS");
        ctx.intent.order_id = Some("x".repeat(37));
        assert_eq!(order_number(&ctx), ctx.intent.id.to_string());
    }

    #[test]
    fn webhook_states_map_to_outcomes() {
        let adapter = UzumAdapter::default();
        let cases = [
            (json!({ "orderId": "uz-1", "status": "COMPLETED" }), WebhookOutcome::Succeeded),
            (json!({ "orderId": "uz-1", "operationState": "declined" }), WebhookOutcome::Failed),
            (json!({ "orderId": "uz-1", "status": "AUTHORIZED" }), WebhookOutcome::Processing),
            (json!({ "orderId": "uz-1", "status": "REFUNDED" }), WebhookOutcome::NotActionable),
            (json!({ "orderId": "uz-1", "status": "SOMETHING" }), WebhookOutcome::Unrecognized),
        ];
        for (payload, expected) in cases {
            let parsed = adapter.interpret_webhook(&payload);
            assert_eq!(parsed.outcome, expected, "payload {payload}");
            assert_eq!(parsed.provider_payment_id.as_deref(), Some("uz-1"));
        }
    }
}
