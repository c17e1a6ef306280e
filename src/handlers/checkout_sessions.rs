use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, Json, Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Router,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;
use utoipa::ToSchema;
use validator::Validate;

use super::common::{
    created_response, parse_amount_minor, required_field, success_response, validate_input,
    validate_metadata_object,
};
use crate::errors::ServiceError;
use crate::notifications::CHECKOUT_UPDATED_EVENT;
use crate::providers::ViewType;
use crate::services::checkout::{CreateCheckoutInput, CustomerInput};
use crate::AppState;

const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Creates the router for checkout session endpoints
pub fn checkout_session_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_checkout_session))
        .route("/{public_token}/select_provider", post(select_provider))
        .route("/{public_token}/status", get(checkout_status))
        .route("/{public_token}/providers", get(list_providers))
        .route("/{public_token}/events", get(checkout_events))
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(example = json!({
    "orgId": "O1",
    "amountMinor": 150000,
    "currency": "UZS",
    "description": "Order #1042",
    "successUrl": "https://shop.example/checkout/ok",
    "customer": { "email": "payer@example.com" }
}))]
pub struct CreateCheckoutRequest {
    /// Merchant organization
    pub org_id: Option<String>,
    /// Amount in minor units (e.g. tiyin); `amount` is accepted as an alias
    #[serde(default, alias = "amount")]
    #[schema(value_type = Option<i64>, example = 150000)]
    pub amount_minor: Option<Value>,
    /// Currency code, stored as given (e.g. `UZS`, `860`)
    #[schema(example = "UZS")]
    pub currency: Option<String>,
    #[validate(length(max = 1024))]
    pub description: Option<String>,
    /// Merchant-side order reference
    #[validate(length(max = 255))]
    pub order_id: Option<String>,
    #[validate(url)]
    pub success_url: Option<String>,
    #[validate(url)]
    pub cancel_url: Option<String>,
    #[validate(url)]
    pub return_url: Option<String>,
    #[validate]
    pub customer: Option<CustomerRequest>,
    #[validate(custom = "validate_metadata_object")]
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CustomerRequest {
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(max = 64))]
    pub phone: Option<String>,
    /// The merchant's own identifier for this payer
    #[validate(length(max = 255))]
    pub customer_user_ref: Option<String>,
}

impl From<CustomerRequest> for CustomerInput {
    fn from(c: CustomerRequest) -> Self {
        Self {
            email: c.email,
            phone: c.phone,
            customer_user_ref: c.customer_user_ref,
        }
    }
}

impl CreateCheckoutRequest {
    fn into_input(self) -> Result<CreateCheckoutInput, ServiceError> {
        let org_id = required_field(self.org_id, "orgId")?;
        let amount_minor = parse_amount_minor(self.amount_minor.as_ref())?;
        let currency = required_field(self.currency, "currency")?;

        Ok(CreateCheckoutInput {
            org_id,
            amount_minor,
            currency,
            description: self.description,
            order_id: self.order_id,
            success_url: self.success_url,
            cancel_url: self.cancel_url,
            return_url: self.return_url,
            customer: self.customer.map(CustomerInput::from),
            metadata: self.metadata.unwrap_or(Value::Null),
        })
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(example = json!({ "providerId": "uzum", "viewType": "REDIRECT" }))]
pub struct SelectProviderRequest {
    pub provider_id: Option<String>,
    pub view_type: Option<ViewType>,
}

/// Create a payment intent and its checkout session
#[utoipa::path(
    post,
    path = "/checkout_sessions",
    request_body = CreateCheckoutRequest,
    responses(
        (status = 201, description = "Checkout session created", body = crate::services::checkout::CreatedCheckout),
        (status = 400, description = "Missing or invalid field", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal error", body = crate::errors::ErrorResponse)
    ),
    tag = "checkout"
)]
pub async fn create_checkout_session(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateCheckoutRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ServiceError> {
    let Json(payload) = payload?;
    validate_input(&payload)?;

    let created = state
        .services
        .checkout
        .create_checkout_session(payload.into_input()?)
        .await?;

    Ok(created_response(created))
}

/// Start a provider attempt for the session
#[utoipa::path(
    post,
    path = "/checkout_sessions/{public_token}/select_provider",
    params(("public_token" = String, Path, description = "Public checkout token")),
    request_body = SelectProviderRequest,
    responses(
        (status = 200, description = "Attempt registered", body = crate::services::checkout::SelectedProvider),
        (status = 400, description = "Invalid request or unsupported provider", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown token", body = crate::errors::ErrorResponse),
        (status = 409, description = "Session not open, provider not configured, concurrent selection, or reused provider payment id", body = crate::errors::ErrorResponse),
        (status = 500, description = "Provider failure", body = crate::errors::ErrorResponse)
    ),
    tag = "checkout"
)]
pub async fn select_provider(
    State(state): State<Arc<AppState>>,
    Path(public_token): Path<String>,
    payload: Result<Json<SelectProviderRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ServiceError> {
    let Json(payload) = payload?;
    let provider_id = required_field(payload.provider_id, "providerId")?;

    let selected = state
        .services
        .checkout
        .select_provider_create_attempt(
            &public_token,
            &provider_id,
            payload.view_type.unwrap_or_default(),
        )
        .await?;

    Ok(success_response(selected))
}

/// Current session, intent and selected attempt state
#[utoipa::path(
    get,
    path = "/checkout_sessions/{public_token}/status",
    params(("public_token" = String, Path, description = "Public checkout token")),
    responses(
        (status = 200, description = "Checkout status", body = crate::services::checkout::CheckoutStatus),
        (status = 404, description = "Unknown token", body = crate::errors::ErrorResponse)
    ),
    tag = "checkout"
)]
pub async fn checkout_status(
    State(state): State<Arc<AppState>>,
    Path(public_token): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let status = state.services.checkout.checkout_status(&public_token).await?;
    Ok(success_response(status))
}

/// Providers the payer can choose from
#[utoipa::path(
    get,
    path = "/checkout_sessions/{public_token}/providers",
    params(("public_token" = String, Path, description = "Public checkout token")),
    responses(
        (status = 200, description = "Configured providers", body = [crate::services::checkout::ProviderOption]),
        (status = 404, description = "Unknown token", body = crate::errors::ErrorResponse)
    ),
    tag = "checkout"
)]
pub async fn list_providers(
    State(state): State<Arc<AppState>>,
    Path(public_token): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let providers = state.services.checkout.list_providers(&public_token).await?;
    Ok(success_response(providers))
}

/// Server-sent `checkout_updated` events for one session
#[utoipa::path(
    get,
    path = "/checkout_sessions/{public_token}/events",
    params(("public_token" = String, Path, description = "Public checkout token")),
    responses(
        (status = 200, description = "text/event-stream of checkout updates", content_type = "text/event-stream", body = crate::notifications::CheckoutUpdate),
        (status = 404, description = "Unknown token", body = crate::errors::ErrorResponse)
    ),
    tag = "checkout"
)]
pub async fn checkout_events(
    State(state): State<Arc<AppState>>,
    Path(public_token): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ServiceError> {
    // Unknown tokens get a 404 rather than an empty stream.
    state.services.checkout.checkout_status(&public_token).await?;

    let subscription = state.updates.subscribe(&public_token);
    debug!(%public_token, "checkout event stream opened");

    // The stream owns the subscription; a disconnect drops it and frees the channel.
    let updates = stream::unfold(subscription, |mut subscription| async move {
        loop {
            match subscription.recv().await {
                Ok(update) => {
                    let event = Event::default()
                        .event(CHECKOUT_UPDATED_EVENT)
                        .json_data(&update);
                    return Some((event, subscription));
                }
                // Updates only say "refetch", so skipping some is harmless.
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Ok(Sse::new(updates).keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE)))
}
