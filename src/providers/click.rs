//! Click: the payer is redirected to Click's hosted service page; the amount
//! travels in the query string and no server-side registration happens.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tracing::instrument;
use url::Url;

use super::{
    field_as_string, AttemptContext, ProviderAdapter, ProviderAttemptResult, ProviderError,
    RegistrationRecord, WebhookInterpretation, WebhookOutcome,
};
use crate::entities::PaymentStatus;

pub const PROVIDER_ID: &str = "click";

const DEFAULT_CHECKOUT_BASE_URL: &str = "https://my.click.uz/services/pay";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClickCredentials {
    service_id: Option<Value>,
    merchant_id: Option<Value>,
    checkout_base_url: Option<String>,
}

fn required_id(value: Option<Value>, field: &'static str) -> Result<String, ProviderError> {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(ProviderError::MissingCredential {
            provider: PROVIDER_ID,
            field,
        }),
    }
}

/// Minor units (tiyin) to the sum amount Click expects, always two decimals.
fn amount_in_sums(amount_minor: i64) -> String {
    let mut amount = Decimal::new(amount_minor, 2);
    amount.rescale(2);
    amount.to_string()
}

#[derive(Debug, Default)]
pub struct ClickAdapter;

impl ClickAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProviderAdapter for ClickAdapter {
    fn provider_id(&self) -> &str {
        PROVIDER_ID
    }

    #[instrument(skip(self, ctx), fields(attempt_id = %ctx.attempt_id))]
    async fn create_attempt(
        &self,
        ctx: &AttemptContext,
    ) -> Result<ProviderAttemptResult, ProviderError> {
        let creds: ClickCredentials = serde_json::from_value(ctx.credentials.clone())
            .map_err(|_| ProviderError::InvalidCredentials {
                provider: PROVIDER_ID,
            })?;
        let service_id = required_id(creds.service_id, "serviceId")?;
        let merchant_id = required_id(creds.merchant_id, "merchantId")?;

        if !ctx.intent.currency.trim().eq_ignore_ascii_case("UZS") {
            return Err(ProviderError::UnsupportedCurrency {
                provider: PROVIDER_ID,
                currency: ctx.intent.currency.clone(),
            });
        }

        let return_url = ctx
            .success_url()
            .ok_or(ProviderError::HttpsReturnUrlRequired {
                provider: PROVIDER_ID,
            })?;

        let base = creds
            .checkout_base_url
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CHECKOUT_BASE_URL.to_string());
        let mut redirect = Url::parse(&base).map_err(|_| ProviderError::InvalidCredentials {
            provider: PROVIDER_ID,
        })?;

        // Merchant order ids may repeat across intents; callbacks are matched on this value.
        let transaction_param = ctx.intent.id.to_string();

        redirect
            .query_pairs_mut()
            .append_pair("service_id", &service_id)
            .append_pair("merchant_id", &merchant_id)
            .append_pair("amount", &amount_in_sums(ctx.intent.amount_minor))
            .append_pair("transaction_param", &transaction_param)
            .append_pair("return_url", &return_url);

        let redirect_url = redirect.to_string();
        Ok(ProviderAttemptResult {
            redirect_url: redirect_url.clone(),
            provider_payment_id: Some(transaction_param.clone()),
            status: PaymentStatus::RequiresAction,
            raw: RegistrationRecord::Click {
                environment: ctx.environment,
                redirect_url,
                transaction_param,
            },
        })
    }

    /// Click's SHOP-API callbacks: `action` 0 is prepare, 1 is complete; a
    /// negative `error` means the payment failed.
    fn interpret_webhook(&self, payload: &Value) -> WebhookInterpretation {
        let number = |key: &str| field_as_string(payload, &[key]).and_then(|v| v.parse::<i64>().ok());
        let outcome = match (number("action"), number("error")) {
            (_, Some(error)) if error < 0 => WebhookOutcome::Failed,
            (Some(1), Some(0)) => WebhookOutcome::Succeeded,
            (Some(0), Some(0)) => WebhookOutcome::Processing,
            _ => WebhookOutcome::Unrecognized,
        };

        let event_type = match number("action") {
            Some(0) => "prepare".to_string(),
            Some(1) => "complete".to_string(),
            _ => "unknown".to_string(),
        };

        WebhookInterpretation {
            provider_event_id: field_as_string(payload, &["click_paydoc_id", "click_trans_id"]),
            provider_payment_id: field_as_string(payload, &["merchant_trans_id"]),
            event_type,
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_support::context;
    use rstest::rstest;
    use serde_json::json;

    #[tokio::test]
    async fn builds_redirect_with_amount_in_sums() {
        let ctx = context(json!({ "serviceId": 101, "merchantId": "m-7" }), 150000, "UZS");
        let result = ClickAdapter::new().create_attempt(&ctx).await.unwrap();

        let url = Url::parse(&result.redirect_url).unwrap();
        assert_eq!(url.host_str(), Some("my.click.uz"));
        let query: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(query["service_id"], "101");
        assert_eq!(query["merchant_id"], "m-7");
        assert_eq!(query["amount"], "1500.00");
        assert_eq!(query["transaction_param"], ctx.intent.id.to_string());
        assert_eq!(query["return_url"], "https://pay.test/pay/tok");
        assert_eq!(
            result.provider_payment_id.as_deref(),
            Some(ctx.intent.id.to_string().as_str())
        );
    }

    #[tokio::test]
    async fn rejects_non_uzs_and_missing_ids() {
        let adapter = ClickAdapter::new();

        let ctx = context(json!({ "serviceId": 1, "merchantId": 2 }), 100, "USD");
        assert_eq!(
            adapter.create_attempt(&ctx).await.unwrap_err().code(),
            "click_unsupported_currency"
        );

        let ctx = context(json!({ "serviceId": 1 }), 100, "UZS");
        assert_eq!(
            adapter.create_attempt(&ctx).await.unwrap_err().code(),
            "click_merchant_id_is_required"
        );
    }

    #[rstest]
    #[case(0, "0.00")]
    #[case(5, "0.05")]
    #[case(150000, "1500.00")]
    fn converts_minor_units(#[case] minor: i64, #[case] expected: &str) {
        assert_eq!(amount_in_sums(minor), expected);
    }

    #[rstest]
    #[case(json!({ "merchant_trans_id": "o-1", "action": 1, "error": 0 }), WebhookOutcome::Succeeded)]
    #[case(json!({ "merchant_trans_id": "o-1", "action": "0", "error": "0" }), WebhookOutcome::Processing)]
    #[case(json!({ "merchant_trans_id": "o-1", "action": 1, "error": -5017 }), WebhookOutcome::Failed)]
    #[case(json!({ "merchant_trans_id": "o-1" }), WebhookOutcome::Unrecognized)]
    fn callbacks_map_to_outcomes(#[case] payload: Value, #[case] expected: WebhookOutcome) {
        let parsed = ClickAdapter::new().interpret_webhook(&payload);
        assert_eq!(parsed.outcome, expected);
        assert_eq!(parsed.provider_payment_id.as_deref(), Some("o-1"));
    }
}
