use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde_json::Value;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{AttemptRegistration, LedgerStore, NewCheckout, ProviderAccountUpsert};
use crate::entities::{
    checkout_session, customer, org_provider_account, org_provider_account_secret,
    payment_attempt, payment_event, payment_intent, AccountStatus, PaymentStatus,
    ProviderEnvironment, SessionStatus,
};
use crate::errors::ServiceError;

/// Ledger backed by a SeaORM connection (Postgres or SQLite).
#[derive(Debug, Clone)]
pub struct SeaOrmLedger {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmLedger {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    fn conn(&self) -> &DatabaseConnection {
        &self.db
    }
}

fn intent_active_model(m: payment_intent::Model) -> payment_intent::ActiveModel {
    payment_intent::ActiveModel {
        id: Set(m.id),
        org_id: Set(m.org_id),
        amount_minor: Set(m.amount_minor),
        currency: Set(m.currency),
        description: Set(m.description),
        order_id: Set(m.order_id),
        status: Set(m.status),
        client_secret: Set(m.client_secret),
        return_url: Set(m.return_url),
        metadata: Set(m.metadata),
        created_at: Set(m.created_at),
        updated_at: Set(m.updated_at),
    }
}

fn session_active_model(m: checkout_session::Model) -> checkout_session::ActiveModel {
    checkout_session::ActiveModel {
        id: Set(m.id),
        org_id: Set(m.org_id),
        public_token: Set(m.public_token),
        payment_intent_id: Set(m.payment_intent_id),
        customer_id: Set(m.customer_id),
        status: Set(m.status),
        selected_provider_id: Set(m.selected_provider_id),
        selected_attempt_id: Set(m.selected_attempt_id),
        success_url: Set(m.success_url),
        cancel_url: Set(m.cancel_url),
        return_url: Set(m.return_url),
        metadata: Set(m.metadata),
        created_at: Set(m.created_at),
        updated_at: Set(m.updated_at),
    }
}

fn customer_active_model(m: customer::Model) -> customer::ActiveModel {
    customer::ActiveModel {
        id: Set(m.id),
        org_id: Set(m.org_id),
        email: Set(m.email),
        phone: Set(m.phone),
        customer_user_ref: Set(m.customer_user_ref),
        metadata: Set(m.metadata),
        created_at: Set(m.created_at),
    }
}

#[async_trait]
impl LedgerStore for SeaOrmLedger {
    #[instrument(skip(self, checkout), fields(session_id = %checkout.session.id))]
    async fn create_checkout(&self, checkout: NewCheckout) -> Result<(), ServiceError> {
        let txn = self.conn().begin().await?;

        intent_active_model(checkout.intent).insert(&txn).await?;
        if let Some(customer) = checkout.customer {
            customer_active_model(customer).insert(&txn).await?;
        }
        session_active_model(checkout.session).insert(&txn).await?;

        txn.commit().await?;
        Ok(())
    }

    async fn find_session_by_token(
        &self,
        public_token: &str,
    ) -> Result<Option<checkout_session::Model>, ServiceError> {
        Ok(checkout_session::Entity::find()
            .filter(checkout_session::Column::PublicToken.eq(public_token))
            .one(self.conn())
            .await?)
    }

    async fn find_intent(&self, id: Uuid) -> Result<Option<payment_intent::Model>, ServiceError> {
        Ok(payment_intent::Entity::find_by_id(id).one(self.conn()).await?)
    }

    async fn find_attempt(&self, id: Uuid) -> Result<Option<payment_attempt::Model>, ServiceError> {
        Ok(payment_attempt::Entity::find_by_id(id).one(self.conn()).await?)
    }

    async fn find_active_provider_account(
        &self,
        org_id: &str,
        provider_id: &str,
        environment: ProviderEnvironment,
    ) -> Result<Option<org_provider_account::Model>, ServiceError> {
        let mut rows = org_provider_account::Entity::find()
            .filter(org_provider_account::Column::OrgId.eq(org_id))
            .filter(org_provider_account::Column::ProviderId.eq(provider_id))
            .filter(org_provider_account::Column::Environment.eq(environment))
            .filter(org_provider_account::Column::Status.eq(AccountStatus::Active))
            .limit(2)
            .all(self.conn())
            .await?;

        if rows.len() > 1 {
            return Err(ServiceError::AmbiguousProviderAccount(
                provider_id.to_string(),
            ));
        }
        Ok(rows.pop())
    }

    async fn list_active_provider_accounts(
        &self,
        org_id: &str,
        environment: ProviderEnvironment,
    ) -> Result<Vec<org_provider_account::Model>, ServiceError> {
        Ok(org_provider_account::Entity::find()
            .filter(org_provider_account::Column::OrgId.eq(org_id))
            .filter(org_provider_account::Column::Environment.eq(environment))
            .filter(org_provider_account::Column::Status.eq(AccountStatus::Active))
            .order_by_asc(org_provider_account::Column::ProviderId)
            .all(self.conn())
            .await?)
    }

    async fn find_account_credentials(
        &self,
        org_provider_account_id: Uuid,
    ) -> Result<Option<Value>, ServiceError> {
        Ok(org_provider_account_secret::Entity::find()
            .filter(
                org_provider_account_secret::Column::OrgProviderAccountId
                    .eq(org_provider_account_id),
            )
            .one(self.conn())
            .await?
            .map(|secret| secret.credentials))
    }

    #[instrument(skip(self, account), fields(org_id = %account.org_id, provider_id = %account.provider_id))]
    async fn upsert_provider_account(
        &self,
        account: ProviderAccountUpsert,
    ) -> Result<org_provider_account::Model, ServiceError> {
        let txn = self.conn().begin().await?;
        let now = Utc::now();

        let existing = org_provider_account::Entity::find()
            .filter(org_provider_account::Column::OrgId.eq(account.org_id.as_str()))
            .filter(org_provider_account::Column::ProviderId.eq(account.provider_id.as_str()))
            .filter(org_provider_account::Column::Environment.eq(account.environment))
            .one(&txn)
            .await?;

        let saved = match existing {
            Some(current) => {
                let mut active: org_provider_account::ActiveModel = current.into();
                active.status = Set(account.status);
                active.display_label = Set(account.display_label);
                active.metadata = Set(account.metadata);
                active.updated_at = Set(now);
                active.update(&txn).await?
            }
            None => {
                org_provider_account::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    org_id: Set(account.org_id),
                    provider_id: Set(account.provider_id),
                    environment: Set(account.environment),
                    status: Set(account.status),
                    display_label: Set(account.display_label),
                    metadata: Set(account.metadata),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?
            }
        };

        let secret = org_provider_account_secret::Entity::find()
            .filter(org_provider_account_secret::Column::OrgProviderAccountId.eq(saved.id))
            .one(&txn)
            .await?;
        match secret {
            Some(current) => {
                let rotation = current.rotation_version + 1;
                let mut active: org_provider_account_secret::ActiveModel = current.into();
                active.credentials = Set(account.credentials);
                active.rotation_version = Set(rotation);
                active.update(&txn).await?;
            }
            None => {
                org_provider_account_secret::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    org_provider_account_id: Set(saved.id),
                    credentials: Set(account.credentials),
                    rotation_version: Set(1),
                    created_at: Set(now),
                }
                .insert(&txn)
                .await?;
            }
        }

        txn.commit().await?;
        Ok(saved)
    }

    async fn insert_attempt(&self, attempt: payment_attempt::Model) -> Result<(), ServiceError> {
        payment_attempt::ActiveModel {
            id: Set(attempt.id),
            payment_intent_id: Set(attempt.payment_intent_id),
            provider_id: Set(attempt.provider_id),
            org_provider_account_id: Set(attempt.org_provider_account_id),
            status: Set(attempt.status),
            provider_payment_id: Set(attempt.provider_payment_id),
            checkout_url: Set(attempt.checkout_url),
            raw_init_response: Set(attempt.raw_init_response),
            created_at: Set(attempt.created_at),
            updated_at: Set(attempt.updated_at),
        }
        .insert(self.conn())
        .await?;
        Ok(())
    }

    async fn record_attempt_registration(
        &self,
        attempt_id: Uuid,
        registration: AttemptRegistration,
    ) -> Result<bool, ServiceError> {
        let result = payment_attempt::Entity::update_many()
            .col_expr(payment_attempt::Column::Status, Expr::value(registration.status))
            .col_expr(
                payment_attempt::Column::ProviderPaymentId,
                Expr::value(registration.provider_payment_id),
            )
            .col_expr(
                payment_attempt::Column::CheckoutUrl,
                Expr::value(Some(registration.checkout_url)),
            )
            .col_expr(
                payment_attempt::Column::RawInitResponse,
                Expr::value(registration.raw),
            )
            .col_expr(payment_attempt::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(payment_attempt::Column::Id.eq(attempt_id))
            .filter(payment_attempt::Column::Status.eq(PaymentStatus::Initialized))
            .exec(self.conn())
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn claim_session_selection(
        &self,
        session_id: Uuid,
        expected_attempt_id: Option<Uuid>,
        provider_id: &str,
        attempt_id: Uuid,
    ) -> Result<bool, ServiceError> {
        let expected = match expected_attempt_id {
            Some(id) => checkout_session::Column::SelectedAttemptId.eq(id),
            None => checkout_session::Column::SelectedAttemptId.is_null(),
        };

        let result = checkout_session::Entity::update_many()
            .col_expr(
                checkout_session::Column::SelectedProviderId,
                Expr::value(Some(provider_id.to_string())),
            )
            .col_expr(
                checkout_session::Column::SelectedAttemptId,
                Expr::value(Some(attempt_id)),
            )
            .col_expr(checkout_session::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(checkout_session::Column::Id.eq(session_id))
            .filter(checkout_session::Column::Status.eq(SessionStatus::Open))
            .filter(expected)
            .exec(self.conn())
            .await?;
        debug!(%session_id, rows = result.rows_affected, "session selection claim");
        Ok(result.rows_affected > 0)
    }

    async fn find_attempts_by_provider_payment(
        &self,
        provider_id: &str,
        provider_payment_id: &str,
    ) -> Result<Vec<payment_attempt::Model>, ServiceError> {
        Ok(payment_attempt::Entity::find()
            .filter(payment_attempt::Column::ProviderId.eq(provider_id))
            .filter(payment_attempt::Column::ProviderPaymentId.eq(provider_payment_id))
            .order_by_desc(payment_attempt::Column::CreatedAt)
            .all(self.conn())
            .await?)
    }

    async fn transition_attempt_status(
        &self,
        attempt_id: Uuid,
        target: PaymentStatus,
    ) -> Result<bool, ServiceError> {
        let result = payment_attempt::Entity::update_many()
            .col_expr(payment_attempt::Column::Status, Expr::value(target))
            .col_expr(payment_attempt::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(payment_attempt::Column::Id.eq(attempt_id))
            .filter(payment_attempt::Column::Status.is_in(PaymentStatus::predecessors_of(target)))
            .exec(self.conn())
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn transition_intent_status(
        &self,
        intent_id: Uuid,
        target: PaymentStatus,
    ) -> Result<bool, ServiceError> {
        let result = payment_intent::Entity::update_many()
            .col_expr(payment_intent::Column::Status, Expr::value(target))
            .col_expr(payment_intent::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(payment_intent::Column::Id.eq(intent_id))
            .filter(payment_intent::Column::Status.is_in(PaymentStatus::predecessors_of(target)))
            .exec(self.conn())
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn find_latest_session_for_intent(
        &self,
        intent_id: Uuid,
    ) -> Result<Option<checkout_session::Model>, ServiceError> {
        Ok(checkout_session::Entity::find()
            .filter(checkout_session::Column::PaymentIntentId.eq(intent_id))
            .order_by_desc(checkout_session::Column::CreatedAt)
            .one(self.conn())
            .await?)
    }

    async fn close_session(
        &self,
        session_id: Uuid,
        outcome: SessionStatus,
    ) -> Result<bool, ServiceError> {
        let result = checkout_session::Entity::update_many()
            .col_expr(checkout_session::Column::Status, Expr::value(outcome))
            .col_expr(checkout_session::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(checkout_session::Column::Id.eq(session_id))
            .filter(checkout_session::Column::Status.eq(SessionStatus::Open))
            .exec(self.conn())
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn insert_event(&self, event: payment_event::Model) -> Result<(), ServiceError> {
        payment_event::ActiveModel {
            id: Set(event.id),
            provider_id: Set(event.provider_id),
            environment: Set(event.environment),
            org_id: Set(event.org_id),
            provider_event_id: Set(event.provider_event_id),
            provider_payment_id: Set(event.provider_payment_id),
            event_type: Set(event.event_type),
            payload: Set(event.payload),
            received_at: Set(event.received_at),
            processed_at: Set(event.processed_at),
            processing_error: Set(event.processing_error),
        }
        .insert(self.conn())
        .await?;
        Ok(())
    }

    async fn mark_event_processed(
        &self,
        event_id: Uuid,
        processing_error: Option<String>,
    ) -> Result<(), ServiceError> {
        let update = payment_event::Entity::update_many().filter(payment_event::Column::Id.eq(event_id));
        let update = match processing_error {
            Some(message) => update.col_expr(
                payment_event::Column::ProcessingError,
                Expr::value(Some(message)),
            ),
            None => update
                .col_expr(payment_event::Column::ProcessedAt, Expr::value(Some(Utc::now())))
                .col_expr(
                    payment_event::Column::ProcessingError,
                    Expr::value(Option::<String>::None),
                ),
        };
        update.exec(self.conn()).await?;
        Ok(())
    }
}
