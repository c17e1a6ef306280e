//! Checkout orchestration: creating intent/session pairs and starting
//! provider attempts against them.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::{
    checkout_session, customer, org_provider_account, payment_attempt, payment_intent,
    AccountStatus, PaymentStatus, ProviderEnvironment, SessionStatus,
};
use crate::errors::ServiceError;
use crate::providers::{AttemptContext, ProviderError, ProviderRegistry, ViewType};
use crate::repositories::{
    AttemptRegistration, LedgerStore, NewCheckout, ProviderAccountUpsert,
};

const PUBLIC_TOKEN_BYTES: usize = 18;
const CLIENT_SECRET_BYTES: usize = 24;

fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Public pay page for a session: `{base}/pay/{token}`.
pub fn pay_url(pay_base_url: &str, public_token: &str) -> String {
    format!("{}/pay/{}", pay_base_url.trim_end_matches('/'), public_token)
}

fn is_valid_currency(currency: &str) -> bool {
    currency.len() == 3 && currency.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Runtime knobs the orchestrator needs from configuration.
#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub pay_base_url: String,
    pub environment: ProviderEnvironment,
    pub provider_timeout: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct CustomerInput {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub customer_user_ref: Option<String>,
}

impl CustomerInput {
    fn has_contact(&self) -> bool {
        [&self.email, &self.phone, &self.customer_user_ref]
            .iter()
            .any(|v| v.as_deref().map_or(false, |s| !s.trim().is_empty()))
    }
}

#[derive(Debug, Clone)]
pub struct CreateCheckoutInput {
    pub org_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub description: Option<String>,
    pub order_id: Option<String>,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
    pub return_url: Option<String>,
    pub customer: Option<CustomerInput>,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatedCheckout {
    pub checkout_session_id: Uuid,
    pub payment_intent_id: Uuid,
    pub public_token: String,
    pub pay_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SelectedProvider {
    pub attempt_id: Uuid,
    pub redirect_url: String,
}

/// Payer-facing session state. Internal ids are deliberately absent.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub public_token: String,
    pub status: SessionStatus,
    pub selected_provider_id: Option<String>,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
    pub return_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IntentView {
    pub status: PaymentStatus,
    pub amount_minor: i64,
    pub currency: String,
    pub description: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AttemptView {
    pub status: PaymentStatus,
    pub provider_id: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutStatus {
    pub checkout_session: SessionView,
    pub payment_intent: IntentView,
    pub selected_attempt: Option<AttemptView>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderOption {
    pub provider_id: String,
    pub display_label: String,
}

#[derive(Debug, Clone)]
pub struct ProviderAccountInput {
    pub status: AccountStatus,
    pub display_label: Option<String>,
    pub metadata: Value,
    pub credentials: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderAccountView {
    pub org_id: String,
    pub provider_id: String,
    pub environment: ProviderEnvironment,
    pub status: AccountStatus,
    pub display_label: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<org_provider_account::Model> for ProviderAccountView {
    fn from(m: org_provider_account::Model) -> Self {
        Self {
            org_id: m.org_id,
            provider_id: m.provider_id,
            environment: m.environment,
            status: m.status,
            display_label: m.display_label,
            updated_at: m.updated_at,
        }
    }
}

#[derive(Clone)]
pub struct CheckoutService {
    ledger: Arc<dyn LedgerStore>,
    providers: Arc<ProviderRegistry>,
    settings: CheckoutSettings,
}

impl CheckoutService {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        providers: Arc<ProviderRegistry>,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            ledger,
            providers,
            settings,
        }
    }

    pub fn environment(&self) -> ProviderEnvironment {
        self.settings.environment
    }

    /// Creates a payment intent and its checkout session. Never contacts a provider.
    #[instrument(skip(self, input), fields(org_id = %input.org_id))]
    pub async fn create_checkout_session(
        &self,
        input: CreateCheckoutInput,
    ) -> Result<CreatedCheckout, ServiceError> {
        if input.org_id.trim().is_empty() {
            return Err(ServiceError::validation("missing_field", "orgId is required"));
        }
        if input.amount_minor < 0 {
            return Err(ServiceError::validation(
                "invalid_amount",
                "amountMinor must be a non-negative integer",
            ));
        }
        if !is_valid_currency(&input.currency) {
            return Err(ServiceError::validation(
                "invalid_currency",
                "currency must be a 3-character code",
            ));
        }

        let now = Utc::now();
        let public_token = random_token(PUBLIC_TOKEN_BYTES);
        let metadata = if input.metadata.is_null() {
            json!({})
        } else {
            input.metadata
        };

        let intent = payment_intent::Model {
            id: Uuid::new_v4(),
            org_id: input.org_id.clone(),
            amount_minor: input.amount_minor,
            currency: input.currency,
            description: input.description,
            order_id: input.order_id,
            status: PaymentStatus::Open,
            client_secret: random_token(CLIENT_SECRET_BYTES),
            return_url: input.return_url.clone().or_else(|| input.success_url.clone()),
            metadata: metadata.clone(),
            created_at: now,
            updated_at: now,
        };

        let customer = input
            .customer
            .filter(CustomerInput::has_contact)
            .map(|c| customer::Model {
                id: Uuid::new_v4(),
                org_id: input.org_id.clone(),
                email: c.email,
                phone: c.phone,
                customer_user_ref: c.customer_user_ref,
                metadata: json!({}),
                created_at: now,
            });

        let session = checkout_session::Model {
            id: Uuid::new_v4(),
            org_id: input.org_id,
            public_token: public_token.clone(),
            payment_intent_id: intent.id,
            customer_id: customer.as_ref().map(|c| c.id),
            status: SessionStatus::Open,
            selected_provider_id: None,
            selected_attempt_id: None,
            success_url: input.success_url,
            cancel_url: input.cancel_url,
            return_url: input.return_url,
            metadata,
            created_at: now,
            updated_at: now,
        };

        let created = CreatedCheckout {
            checkout_session_id: session.id,
            payment_intent_id: intent.id,
            pay_url: pay_url(&self.settings.pay_base_url, &public_token),
            public_token,
        };

        self.ledger
            .create_checkout(NewCheckout {
                intent,
                customer,
                session,
            })
            .await?;

        info!(
            checkout_session_id = %created.checkout_session_id,
            payment_intent_id = %created.payment_intent_id,
            "checkout session created"
        );
        Ok(created)
    }

    /// Starts a provider attempt for an open session and returns where to send the payer.
    #[instrument(skip(self), fields(environment = %self.settings.environment))]
    pub async fn select_provider_create_attempt(
        &self,
        public_token: &str,
        provider_id: &str,
        view_type: ViewType,
    ) -> Result<SelectedProvider, ServiceError> {
        let session = self
            .ledger
            .find_session_by_token(public_token)
            .await?
            .ok_or_else(|| ServiceError::NotFound("checkout session".to_string()))?;

        let intent = self
            .ledger
            .find_intent(session.payment_intent_id)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "session {} has no payment intent",
                    session.id
                ))
            })?;

        if session.status != SessionStatus::Open || intent.status.is_terminal() {
            return Err(ServiceError::CheckoutSessionNotOpen);
        }

        let account = self
            .ledger
            .find_active_provider_account(&session.org_id, provider_id, self.settings.environment)
            .await?
            .ok_or_else(|| ServiceError::ProviderNotConfigured {
                provider_id: provider_id.to_string(),
            })?;

        let adapter = self.providers.dispatch(provider_id)?;

        if let Some(reused) = self.reusable_attempt(&session, provider_id).await? {
            info!(attempt_id = %reused.attempt_id, "reusing selected attempt");
            return Ok(reused);
        }

        let credentials = self
            .ledger
            .find_account_credentials(account.id)
            .await?
            .unwrap_or(Value::Null);

        let now = Utc::now();
        let attempt = payment_attempt::Model {
            id: Uuid::new_v4(),
            payment_intent_id: intent.id,
            provider_id: provider_id.to_string(),
            org_provider_account_id: account.id,
            status: PaymentStatus::Initialized,
            provider_payment_id: None,
            checkout_url: None,
            raw_init_response: json!({}),
            created_at: now,
            updated_at: now,
        };
        let attempt_id = attempt.id;
        self.ledger.insert_attempt(attempt).await?;

        let ctx = AttemptContext {
            attempt_id,
            org_provider_account_id: account.id,
            credentials,
            pay_page_url: pay_url(&self.settings.pay_base_url, &session.public_token),
            intent,
            session: session.clone(),
            environment: self.settings.environment,
            view_type,
        };

        let timeout = self.settings.provider_timeout;
        let result = match tokio::time::timeout(timeout, adapter.create_attempt(&ctx)).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                warn!(%attempt_id, code = %err.code(), error = %err, "provider registration failed");
                return Err(err.into());
            }
            Err(_) => {
                warn!(%attempt_id, ?timeout, "provider registration timed out");
                return Err(ProviderError::Timeout {
                    provider: provider_id.to_string(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }
                .into());
            }
        };

        if let Some(provider_payment_id) = result.provider_payment_id.as_deref() {
            let holders = self
                .ledger
                .find_attempts_by_provider_payment(provider_id, provider_payment_id)
                .await?;
            if holders.iter().any(|a| a.payment_intent_id != ctx.intent.id) {
                warn!(%attempt_id, provider_payment_id, "provider returned a payment id owned by another intent");
                return Err(ServiceError::ProviderPaymentIdReused {
                    provider_id: provider_id.to_string(),
                    provider_payment_id: provider_payment_id.to_string(),
                });
            }
        }

        let claimed = self
            .ledger
            .claim_session_selection(
                session.id,
                session.selected_attempt_id,
                provider_id,
                attempt_id,
            )
            .await?;
        if !claimed {
            warn!(%attempt_id, "lost selection race; attempt left initialized");
            return Err(ServiceError::SelectionConflict);
        }

        let recorded = self
            .ledger
            .record_attempt_registration(
                attempt_id,
                AttemptRegistration {
                    status: result.status,
                    provider_payment_id: result.provider_payment_id.clone(),
                    checkout_url: result.redirect_url.clone(),
                    raw: result.raw.to_json(),
                },
            )
            .await?;
        if !recorded {
            warn!(%attempt_id, "attempt left initialized state before registration was recorded");
        }

        info!(
            %attempt_id,
            provider_payment_id = ?result.provider_payment_id,
            status = %result.status,
            "provider attempt registered"
        );
        Ok(SelectedProvider {
            attempt_id,
            redirect_url: result.redirect_url,
        })
    }

    /// A still-live attempt already selected for the same provider, if any.
    async fn reusable_attempt(
        &self,
        session: &checkout_session::Model,
        provider_id: &str,
    ) -> Result<Option<SelectedProvider>, ServiceError> {
        if session.selected_provider_id.as_deref() != Some(provider_id) {
            return Ok(None);
        }
        let Some(selected) = session.selected_attempt_id else {
            return Ok(None);
        };

        Ok(self
            .ledger
            .find_attempt(selected)
            .await?
            .filter(|a| a.status.is_pending_attempt())
            .and_then(|a| {
                a.checkout_url.map(|redirect_url| SelectedProvider {
                    attempt_id: a.id,
                    redirect_url,
                })
            }))
    }

    #[instrument(skip(self))]
    pub async fn checkout_status(&self, public_token: &str) -> Result<CheckoutStatus, ServiceError> {
        let session = self
            .ledger
            .find_session_by_token(public_token)
            .await?
            .ok_or_else(|| ServiceError::NotFound("checkout session".to_string()))?;

        let intent = self
            .ledger
            .find_intent(session.payment_intent_id)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "session {} has no payment intent",
                    session.id
                ))
            })?;

        let selected_attempt = match session.selected_attempt_id {
            Some(id) => self.ledger.find_attempt(id).await?.map(|a| AttemptView {
                status: a.status,
                provider_id: a.provider_id,
                updated_at: a.updated_at,
            }),
            None => None,
        };

        Ok(CheckoutStatus {
            checkout_session: SessionView {
                public_token: session.public_token,
                status: session.status,
                selected_provider_id: session.selected_provider_id,
                success_url: session.success_url,
                cancel_url: session.cancel_url,
                return_url: session.return_url,
                updated_at: session.updated_at,
            },
            payment_intent: IntentView {
                status: intent.status,
                amount_minor: intent.amount_minor,
                currency: intent.currency,
                description: intent.description,
                updated_at: intent.updated_at,
            },
            selected_attempt,
        })
    }

    /// Providers the payer may pick for this session.
    pub async fn list_providers(
        &self,
        public_token: &str,
    ) -> Result<Vec<ProviderOption>, ServiceError> {
        let session = self
            .ledger
            .find_session_by_token(public_token)
            .await?
            .ok_or_else(|| ServiceError::NotFound("checkout session".to_string()))?;

        let accounts = self
            .ledger
            .list_active_provider_accounts(&session.org_id, self.settings.environment)
            .await?;

        Ok(accounts
            .into_iter()
            .filter(|a| self.providers.contains(&a.provider_id))
            .map(|a| ProviderOption {
                display_label: a.display_label.unwrap_or_else(|| a.provider_id.clone()),
                provider_id: a.provider_id,
            })
            .collect())
    }

    /// Operator seeding of a merchant's provider account in the configured environment.
    #[instrument(skip(self, input))]
    pub async fn seed_provider_account(
        &self,
        org_id: &str,
        provider_id: &str,
        input: ProviderAccountInput,
    ) -> Result<ProviderAccountView, ServiceError> {
        if !self.providers.contains(provider_id) {
            return Err(ServiceError::UnsupportedProvider(provider_id.to_string()));
        }
        if !input.credentials.is_object() {
            return Err(ServiceError::validation(
                "invalid_credentials",
                "credentials must be a JSON object",
            ));
        }

        let saved = self
            .ledger
            .upsert_provider_account(ProviderAccountUpsert {
                org_id: org_id.to_string(),
                provider_id: provider_id.to_string(),
                environment: self.settings.environment,
                status: input.status,
                display_label: input.display_label,
                metadata: if input.metadata.is_null() {
                    json!({})
                } else {
                    input.metadata
                },
                credentials: input.credentials,
            })
            .await?;

        info!(account_id = %saved.id, "provider account saved");
        Ok(saved.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::InMemoryLedger;
    use assert_matches::assert_matches;

    fn service(ledger: Arc<InMemoryLedger>) -> CheckoutService {
        CheckoutService::new(
            ledger,
            Arc::new(ProviderRegistry::new()),
            CheckoutSettings {
                pay_base_url: "https://pay.test/".into(),
                environment: ProviderEnvironment::Live,
                provider_timeout: Duration::from_secs(1),
            },
        )
    }

    fn input(amount_minor: i64) -> CreateCheckoutInput {
        CreateCheckoutInput {
            org_id: "O1".into(),
            amount_minor,
            currency: "UZS".into(),
            description: None,
            order_id: None,
            success_url: Some("https://shop.test/ok".into()),
            cancel_url: None,
            return_url: None,
            customer: None,
            metadata: Value::Null,
        }
    }

    #[test]
    fn tokens_have_expected_length_and_differ() {
        let a = random_token(PUBLIC_TOKEN_BYTES);
        let b = random_token(PUBLIC_TOKEN_BYTES);
        assert_eq!(a.len(), 36);
        assert_eq!(random_token(CLIENT_SECRET_BYTES).len(), 48);
        assert_ne!(a, b);
    }

    #[test]
    fn pay_url_trims_trailing_slashes() {
        assert_eq!(pay_url("https://pay.test///", "abc"), "https://pay.test/pay/abc");
    }

    #[tokio::test]
    async fn create_uses_success_url_as_intent_return_url() {
        let ledger = Arc::new(InMemoryLedger::new());
        let created = service(ledger.clone())
            .create_checkout_session(input(150000))
            .await
            .unwrap();

        assert!(created.pay_url.ends_with(&created.public_token));
        let intent = ledger
            .find_intent(created.payment_intent_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(intent.return_url.as_deref(), Some("https://shop.test/ok"));
        assert_eq!(intent.status, PaymentStatus::Open);
        assert_eq!(intent.client_secret.len(), 48);
        assert_eq!(ledger.customer_count().await, 0);
    }

    #[tokio::test]
    async fn customer_is_created_only_with_contact_details() {
        let ledger = Arc::new(InMemoryLedger::new());
        let svc = service(ledger.clone());

        let mut empty = input(1);
        empty.customer = Some(CustomerInput::default());
        svc.create_checkout_session(empty).await.unwrap();
        assert_eq!(ledger.customer_count().await, 0);

        let mut with_email = input(1);
        with_email.customer = Some(CustomerInput {
            email: Some("payer@example.com".into()),
            ..Default::default()
        });
        let created = svc.create_checkout_session(with_email).await.unwrap();
        assert_eq!(ledger.customer_count().await, 1);
        let session = ledger
            .find_session_by_token(&created.public_token)
            .await
            .unwrap()
            .unwrap();
        assert!(session.customer_id.is_some());
    }

    #[tokio::test]
    async fn invalid_input_writes_nothing() {
        let ledger = Arc::new(InMemoryLedger::new());
        let svc = service(ledger.clone());

        assert_matches!(
            svc.create_checkout_session(input(-1)).await,
            Err(ServiceError::Validation { code: "invalid_amount", .. })
        );
        let mut bad_currency = input(1);
        bad_currency.currency = "US".into();
        assert_matches!(
            svc.create_checkout_session(bad_currency).await,
            Err(ServiceError::Validation { code: "invalid_currency", .. })
        );
        assert_eq!(ledger.intent_count().await, 0);
    }

    #[tokio::test]
    async fn unknown_token_is_not_found() {
        let svc = service(Arc::new(InMemoryLedger::new()));
        assert_matches!(
            svc.select_provider_create_attempt("missing", "uzum", ViewType::Redirect)
                .await,
            Err(ServiceError::NotFound(_))
        );
        assert_matches!(
            svc.checkout_status("missing").await,
            Err(ServiceError::NotFound(_))
        );
    }
}
