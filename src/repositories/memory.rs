use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{AttemptRegistration, LedgerStore, NewCheckout, ProviderAccountUpsert};
use crate::entities::{
    checkout_session, customer, org_provider_account, payment_attempt, payment_event,
    payment_intent, AccountStatus, PaymentStatus, ProviderEnvironment, SessionStatus,
};
use crate::errors::ServiceError;

#[derive(Default)]
struct LedgerState {
    intents: HashMap<Uuid, payment_intent::Model>,
    customers: HashMap<Uuid, customer::Model>,
    sessions: HashMap<Uuid, checkout_session::Model>,
    attempts: HashMap<Uuid, payment_attempt::Model>,
    accounts: HashMap<Uuid, org_provider_account::Model>,
    credentials: HashMap<Uuid, Value>,
    events: Vec<payment_event::Model>,
}

/// Ledger held in process memory.
///
/// A single lock guards all tables, so multi-row writes are atomic and the
/// compare-and-set operations behave like their SQL counterparts.
#[derive(Default, Clone)]
pub struct InMemoryLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the event log in arrival order.
    pub async fn events(&self) -> Vec<payment_event::Model> {
        self.state.read().await.events.clone()
    }

    pub async fn attempts_for_intent(&self, intent_id: Uuid) -> Vec<payment_attempt::Model> {
        let state = self.state.read().await;
        let mut attempts: Vec<_> = state
            .attempts
            .values()
            .filter(|a| a.payment_intent_id == intent_id)
            .cloned()
            .collect();
        attempts.sort_by_key(|a| a.created_at);
        attempts
    }

    pub async fn customer_count(&self) -> usize {
        self.state.read().await.customers.len()
    }

    pub async fn intent_count(&self) -> usize {
        self.state.read().await.intents.len()
    }

    fn active_accounts<'a>(
        state: &'a LedgerState,
        org_id: &'a str,
        environment: ProviderEnvironment,
    ) -> impl Iterator<Item = &'a org_provider_account::Model> + 'a {
        state.accounts.values().filter(move |a| {
            a.org_id == org_id && a.environment == environment && a.status == AccountStatus::Active
        })
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn create_checkout(&self, checkout: NewCheckout) -> Result<(), ServiceError> {
        let mut state = self.state.write().await;
        if state
            .sessions
            .values()
            .any(|s| s.public_token == checkout.session.public_token)
        {
            return Err(ServiceError::InternalError(
                "public token collision".to_string(),
            ));
        }

        state
            .intents
            .insert(checkout.intent.id, checkout.intent);
        if let Some(customer) = checkout.customer {
            state.customers.insert(customer.id, customer);
        }
        state
            .sessions
            .insert(checkout.session.id, checkout.session);
        Ok(())
    }

    async fn find_session_by_token(
        &self,
        public_token: &str,
    ) -> Result<Option<checkout_session::Model>, ServiceError> {
        let state = self.state.read().await;
        Ok(state
            .sessions
            .values()
            .find(|s| s.public_token == public_token)
            .cloned())
    }

    async fn find_intent(&self, id: Uuid) -> Result<Option<payment_intent::Model>, ServiceError> {
        Ok(self.state.read().await.intents.get(&id).cloned())
    }

    async fn find_attempt(&self, id: Uuid) -> Result<Option<payment_attempt::Model>, ServiceError> {
        Ok(self.state.read().await.attempts.get(&id).cloned())
    }

    async fn find_active_provider_account(
        &self,
        org_id: &str,
        provider_id: &str,
        environment: ProviderEnvironment,
    ) -> Result<Option<org_provider_account::Model>, ServiceError> {
        let state = self.state.read().await;
        let mut matches =
            Self::active_accounts(&state, org_id, environment).filter(|a| a.provider_id == provider_id);
        let first = matches.next().cloned();
        if matches.next().is_some() {
            return Err(ServiceError::AmbiguousProviderAccount(
                provider_id.to_string(),
            ));
        }
        Ok(first)
    }

    async fn list_active_provider_accounts(
        &self,
        org_id: &str,
        environment: ProviderEnvironment,
    ) -> Result<Vec<org_provider_account::Model>, ServiceError> {
        let state = self.state.read().await;
        let mut accounts: Vec<_> = Self::active_accounts(&state, org_id, environment)
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        Ok(accounts)
    }

    async fn find_account_credentials(
        &self,
        org_provider_account_id: Uuid,
    ) -> Result<Option<Value>, ServiceError> {
        Ok(self
            .state
            .read()
            .await
            .credentials
            .get(&org_provider_account_id)
            .cloned())
    }

    async fn upsert_provider_account(
        &self,
        account: ProviderAccountUpsert,
    ) -> Result<org_provider_account::Model, ServiceError> {
        let mut state = self.state.write().await;
        let now = Utc::now();

        let existing = state
            .accounts
            .values()
            .find(|a| {
                a.org_id == account.org_id
                    && a.provider_id == account.provider_id
                    && a.environment == account.environment
            })
            .cloned();

        let model = match existing {
            Some(mut current) => {
                current.status = account.status;
                current.display_label = account.display_label;
                current.metadata = account.metadata;
                current.updated_at = now;
                current
            }
            None => org_provider_account::Model {
                id: Uuid::new_v4(),
                org_id: account.org_id,
                provider_id: account.provider_id,
                environment: account.environment,
                status: account.status,
                display_label: account.display_label,
                metadata: account.metadata,
                created_at: now,
                updated_at: now,
            },
        };

        state.accounts.insert(model.id, model.clone());
        state.credentials.insert(model.id, account.credentials);
        Ok(model)
    }

    async fn insert_attempt(&self, attempt: payment_attempt::Model) -> Result<(), ServiceError> {
        self.state
            .write()
            .await
            .attempts
            .insert(attempt.id, attempt);
        Ok(())
    }

    async fn record_attempt_registration(
        &self,
        attempt_id: Uuid,
        registration: AttemptRegistration,
    ) -> Result<bool, ServiceError> {
        let mut state = self.state.write().await;
        match state.attempts.get_mut(&attempt_id) {
            Some(attempt) if attempt.status == PaymentStatus::Initialized => {
                attempt.status = registration.status;
                attempt.provider_payment_id = registration.provider_payment_id;
                attempt.checkout_url = Some(registration.checkout_url);
                attempt.raw_init_response = registration.raw;
                attempt.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn claim_session_selection(
        &self,
        session_id: Uuid,
        expected_attempt_id: Option<Uuid>,
        provider_id: &str,
        attempt_id: Uuid,
    ) -> Result<bool, ServiceError> {
        let mut state = self.state.write().await;
        match state.sessions.get_mut(&session_id) {
            Some(session)
                if session.status == SessionStatus::Open
                    && session.selected_attempt_id == expected_attempt_id =>
            {
                session.selected_provider_id = Some(provider_id.to_string());
                session.selected_attempt_id = Some(attempt_id);
                session.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_attempts_by_provider_payment(
        &self,
        provider_id: &str,
        provider_payment_id: &str,
    ) -> Result<Vec<payment_attempt::Model>, ServiceError> {
        let state = self.state.read().await;
        let mut found: Vec<_> = state
            .attempts
            .values()
            .filter(|a| {
                a.provider_id == provider_id
                    && a.provider_payment_id.as_deref() == Some(provider_payment_id)
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn transition_attempt_status(
        &self,
        attempt_id: Uuid,
        target: PaymentStatus,
    ) -> Result<bool, ServiceError> {
        let mut state = self.state.write().await;
        match state.attempts.get_mut(&attempt_id) {
            Some(attempt) if attempt.status.can_transition_to(target) => {
                attempt.status = target;
                attempt.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn transition_intent_status(
        &self,
        intent_id: Uuid,
        target: PaymentStatus,
    ) -> Result<bool, ServiceError> {
        let mut state = self.state.write().await;
        match state.intents.get_mut(&intent_id) {
            Some(intent) if intent.status.can_transition_to(target) => {
                intent.status = target;
                intent.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_latest_session_for_intent(
        &self,
        intent_id: Uuid,
    ) -> Result<Option<checkout_session::Model>, ServiceError> {
        let state = self.state.read().await;
        Ok(state
            .sessions
            .values()
            .filter(|s| s.payment_intent_id == intent_id)
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn close_session(
        &self,
        session_id: Uuid,
        outcome: SessionStatus,
    ) -> Result<bool, ServiceError> {
        let mut state = self.state.write().await;
        match state.sessions.get_mut(&session_id) {
            Some(session) if session.status == SessionStatus::Open => {
                session.status = outcome;
                session.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_event(&self, event: payment_event::Model) -> Result<(), ServiceError> {
        self.state.write().await.events.push(event);
        Ok(())
    }

    async fn mark_event_processed(
        &self,
        event_id: Uuid,
        processing_error: Option<String>,
    ) -> Result<(), ServiceError> {
        let mut state = self.state.write().await;
        if let Some(event) = state.events.iter_mut().find(|e| e.id == event_id) {
            match processing_error {
                Some(message) => event.processing_error = Some(message),
                None => {
                    event.processed_at = Some(Utc::now());
                    event.processing_error = None;
                }
            }
        }
        Ok(())
    }
}
