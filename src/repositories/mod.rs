//! Ledger store: the repository interface over intents, sessions, attempts,
//! provider accounts and the webhook event log.
//!
//! Every state-changing write on the settlement path is a conditional update
//! that reports whether a row changed, so callers can apply the same outcome
//! any number of times.

pub mod database;
pub mod memory;

pub use database::SeaOrmLedger;
pub use memory::InMemoryLedger;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::entities::{
    checkout_session, customer, org_provider_account, payment_attempt, payment_event,
    payment_intent, AccountStatus, PaymentStatus, ProviderEnvironment, SessionStatus,
};
use crate::errors::ServiceError;

/// Rows written together when a checkout is created.
#[derive(Debug, Clone)]
pub struct NewCheckout {
    pub intent: payment_intent::Model,
    pub customer: Option<customer::Model>,
    pub session: checkout_session::Model,
}

/// Outcome of a successful provider registration, written onto an attempt.
#[derive(Debug, Clone)]
pub struct AttemptRegistration {
    pub status: PaymentStatus,
    pub provider_payment_id: Option<String>,
    pub checkout_url: String,
    pub raw: Value,
}

/// Operator-supplied provider account plus its decrypted credentials.
#[derive(Debug, Clone)]
pub struct ProviderAccountUpsert {
    pub org_id: String,
    pub provider_id: String,
    pub environment: ProviderEnvironment,
    pub status: AccountStatus,
    pub display_label: Option<String>,
    pub metadata: Value,
    pub credentials: Value,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Persist intent, optional customer and session as one unit.
    async fn create_checkout(&self, checkout: NewCheckout) -> Result<(), ServiceError>;

    async fn find_session_by_token(
        &self,
        public_token: &str,
    ) -> Result<Option<checkout_session::Model>, ServiceError>;

    async fn find_intent(&self, id: Uuid) -> Result<Option<payment_intent::Model>, ServiceError>;

    async fn find_attempt(&self, id: Uuid) -> Result<Option<payment_attempt::Model>, ServiceError>;

    /// The single active account for `(org, provider, environment)`.
    ///
    /// More than one matching row is a configuration error and yields
    /// [`ServiceError::AmbiguousProviderAccount`].
    async fn find_active_provider_account(
        &self,
        org_id: &str,
        provider_id: &str,
        environment: ProviderEnvironment,
    ) -> Result<Option<org_provider_account::Model>, ServiceError>;

    async fn list_active_provider_accounts(
        &self,
        org_id: &str,
        environment: ProviderEnvironment,
    ) -> Result<Vec<org_provider_account::Model>, ServiceError>;

    async fn find_account_credentials(
        &self,
        org_provider_account_id: Uuid,
    ) -> Result<Option<Value>, ServiceError>;

    /// Create or replace the account for `(org, provider, environment)` and
    /// rotate its credentials.
    async fn upsert_provider_account(
        &self,
        account: ProviderAccountUpsert,
    ) -> Result<org_provider_account::Model, ServiceError>;

    async fn insert_attempt(&self, attempt: payment_attempt::Model) -> Result<(), ServiceError>;

    /// Apply the registration result. Only an attempt still `initialized` is
    /// updated; returns whether it was.
    async fn record_attempt_registration(
        &self,
        attempt_id: Uuid,
        registration: AttemptRegistration,
    ) -> Result<bool, ServiceError>;

    /// Compare-and-set of the session's selection: succeeds only while the
    /// session is `open` and its `selected_attempt_id` still equals
    /// `expected_attempt_id`.
    async fn claim_session_selection(
        &self,
        session_id: Uuid,
        expected_attempt_id: Option<Uuid>,
        provider_id: &str,
        attempt_id: Uuid,
    ) -> Result<bool, ServiceError>;

    /// Attempts carrying this provider payment id, newest first.
    async fn find_attempts_by_provider_payment(
        &self,
        provider_id: &str,
        provider_payment_id: &str,
    ) -> Result<Vec<payment_attempt::Model>, ServiceError>;

    /// Move the attempt to `target` if its current status may advance there.
    async fn transition_attempt_status(
        &self,
        attempt_id: Uuid,
        target: PaymentStatus,
    ) -> Result<bool, ServiceError>;

    /// Move the intent to `target` if its current status may advance there.
    async fn transition_intent_status(
        &self,
        intent_id: Uuid,
        target: PaymentStatus,
    ) -> Result<bool, ServiceError>;

    async fn find_latest_session_for_intent(
        &self,
        intent_id: Uuid,
    ) -> Result<Option<checkout_session::Model>, ServiceError>;

    /// Close an `open` session with `outcome`; closed sessions are left alone.
    async fn close_session(
        &self,
        session_id: Uuid,
        outcome: SessionStatus,
    ) -> Result<bool, ServiceError>;

    async fn insert_event(&self, event: payment_event::Model) -> Result<(), ServiceError>;

    /// Stamp `processed_at`, or record `processing_error` and leave it unset.
    async fn mark_event_processed(
        &self,
        event_id: Uuid,
        processing_error: Option<String>,
    ) -> Result<(), ServiceError>;
}
