use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Pay Orchestrator API",
        version = "0.1.0",
        description = r#"
# Payment orchestration core

Creates checkout sessions for merchants, routes each payment attempt to a configured
payment provider, and reconciles provider webhooks into a single consistent status.

## Flow

1. The merchant backend creates a checkout session and sends the payer to `payUrl`.
2. The pay page lists providers and starts an attempt with `select_provider`.
3. The payer completes payment on the provider's page.
4. The provider calls `/webhooks/{providerId}`; the status endpoint and the event
   stream report the result.

## Errors

Failures return a consistent body with a stable `code`:

```json
{
  "error": "Checkout session is not open",
  "code": "checkout_session_not_open",
  "request_id": "7f1c..."
}
```

### Provider selection statuses

`select_provider` reports failures by class instead of answering every failure
with `500 {error}`:

| Status | When |
|--------|------|
| 400 | Invalid request body or unsupported provider |
| 404 | Unknown public token |
| 409 | Session not open, provider not configured, concurrent selection, or a reused provider payment id |
| 500 | The provider rejected or failed the registration (`code` names the provider error) |

Clients that expect a single `500 {error}` response must branch on these
statuses; the `error` field is present in every case.

Only the public token identifies a session in URLs and payer-visible responses.
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "checkout", description = "Checkout sessions and provider selection"),
        (name = "pay", description = "Hosted pay page actions"),
        (name = "webhooks", description = "Provider callback ingestion"),
        (name = "admin", description = "Operator endpoints"),
        (name = "health", description = "Health check endpoints")
    ),
    paths(
        crate::handlers::checkout_sessions::create_checkout_session,
        crate::handlers::checkout_sessions::select_provider,
        crate::handlers::checkout_sessions::checkout_status,
        crate::handlers::checkout_sessions::list_providers,
        crate::handlers::checkout_sessions::checkout_events,
        crate::handlers::pay::select_and_redirect,
        crate::handlers::webhooks::receive_webhook,
        crate::handlers::admin::upsert_provider_account,
        crate::health::health_check,
    ),
    components(
        schemas(
            // Requests
            crate::handlers::checkout_sessions::CreateCheckoutRequest,
            crate::handlers::checkout_sessions::CustomerRequest,
            crate::handlers::checkout_sessions::SelectProviderRequest,
            crate::handlers::admin::ProviderAccountRequest,
            crate::providers::ViewType,

            // Responses
            crate::services::checkout::CreatedCheckout,
            crate::services::checkout::SelectedProvider,
            crate::services::checkout::CheckoutStatus,
            crate::services::checkout::SessionView,
            crate::services::checkout::IntentView,
            crate::services::checkout::AttemptView,
            crate::services::checkout::ProviderOption,
            crate::services::checkout::ProviderAccountView,
            crate::handlers::webhooks::WebhookAck,
            crate::notifications::CheckoutUpdate,
            crate::health::HealthInfo,
            crate::health::HealthStatus,

            // Status vocabularies
            crate::entities::PaymentStatus,
            crate::entities::SessionStatus,
            crate::entities::ProviderEnvironment,
            crate::entities::AccountStatus,

            // Error types
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_the_checkout_surface() {
        let json = serde_json::to_string_pretty(&ApiDocV1::openapi()).unwrap();
        assert!(json.contains("Pay Orchestrator API"));
        assert!(json.contains("/checkout_sessions/{public_token}/select_provider"));
        assert!(json.contains("/webhooks/{provider_id}"));
        assert!(json.contains("checkout_session_not_open"));
    }

    #[test]
    fn select_provider_failure_statuses_are_documented() {
        let doc = ApiDocV1::openapi();
        let description = doc.info.description.clone().unwrap_or_default();
        assert!(description.contains("`500 {error}`"));
        for row in ["| 400 |", "| 404 |", "| 409 |", "| 500 |"] {
            assert!(description.contains(row), "missing {row}");
        }

        let json = serde_json::to_value(&doc).unwrap();
        let responses = &json["paths"]["/checkout_sessions/{public_token}/select_provider"]["post"]
            ["responses"];
        for status in ["200", "400", "404", "409", "500"] {
            assert!(responses.get(status).is_some(), "missing {status}");
        }
    }
}
