//! Webhook reconciliation.
//!
//! Each delivery is first appended to the event log, then mapped to an outcome
//! and applied with conditional status updates. Replays and reordered
//! deliveries converge on the same state because statuses only move forward.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::entities::{payment_event, PaymentStatus, ProviderEnvironment, SessionStatus};
use crate::errors::ServiceError;
use crate::providers::{interpret_generic, ProviderRegistry, WebhookInterpretation, WebhookOutcome};
use crate::repositories::LedgerStore;

/// What a handled webhook resolved to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebhookResult {
    pub checkout_public_token: Option<String>,
    pub payment_intent_id: Option<Uuid>,
    /// Intent status after reconciliation.
    pub status: Option<PaymentStatus>,
}

/// Body as JSON, or `{ "raw": body }` when it is not valid JSON.
pub fn parse_payload(raw_body: &[u8]) -> Value {
    serde_json::from_slice(raw_body)
        .unwrap_or_else(|_| json!({ "raw": String::from_utf8_lossy(raw_body) }))
}

#[derive(Clone)]
pub struct WebhookReconciler {
    ledger: Arc<dyn LedgerStore>,
    providers: Arc<ProviderRegistry>,
}

impl WebhookReconciler {
    pub fn new(ledger: Arc<dyn LedgerStore>, providers: Arc<ProviderRegistry>) -> Self {
        Self { ledger, providers }
    }

    /// Log the delivery, then apply it.
    ///
    /// Only a failure to persist the event is returned as an error; anything
    /// after that is recorded on the event and logged.
    #[instrument(skip(self, raw_body, _headers), fields(body_len = raw_body.len()))]
    pub async fn handle_webhook_event(
        &self,
        provider_id: &str,
        raw_body: &[u8],
        _headers: &axum::http::HeaderMap,
        environment: ProviderEnvironment,
    ) -> Result<WebhookResult, ServiceError> {
        let payload = parse_payload(raw_body);
        let adapter = self.providers.dispatch(provider_id).ok();
        let interpretation = match &adapter {
            Some(adapter) => adapter.interpret_webhook(&payload),
            None => interpret_generic(&payload),
        };

        let event_id = Uuid::new_v4();
        self.ledger
            .insert_event(payment_event::Model {
                id: event_id,
                provider_id: provider_id.to_string(),
                environment,
                org_id: None,
                provider_event_id: interpretation.provider_event_id.clone(),
                provider_payment_id: interpretation.provider_payment_id.clone(),
                event_type: interpretation.event_type.clone(),
                payload,
                received_at: Utc::now(),
                processed_at: None,
                processing_error: None,
            })
            .await
            .map_err(|err| {
                error!(%event_id, error = %err, "failed to persist webhook event");
                err
            })?;

        if adapter.is_none() {
            warn!(%event_id, "webhook for unsupported provider logged without processing");
            self.stamp(event_id, None).await;
            return Ok(WebhookResult::default());
        }

        match self.apply(event_id, provider_id, &interpretation).await {
            Ok(result) => {
                self.stamp(event_id, None).await;
                Ok(result)
            }
            Err(err) => {
                error!(%event_id, error = %err, "webhook reconciliation failed");
                self.stamp(event_id, Some(err.to_string())).await;
                Ok(WebhookResult::default())
            }
        }
    }

    async fn apply(
        &self,
        event_id: Uuid,
        provider_id: &str,
        interpretation: &WebhookInterpretation,
    ) -> Result<WebhookResult, ServiceError> {
        let Some(target) = interpretation.outcome.target_status() else {
            match interpretation.outcome {
                WebhookOutcome::NotActionable => {
                    info!(%event_id, event_type = %interpretation.event_type, "webhook not actionable")
                }
                _ => {
                    warn!(%event_id, event_type = %interpretation.event_type, "unrecognized webhook status")
                }
            }
            return Ok(WebhookResult::default());
        };

        let Some(provider_payment_id) = interpretation.provider_payment_id.as_deref() else {
            warn!(%event_id, "webhook carries no provider payment id");
            return Ok(WebhookResult::default());
        };

        let attempts = self
            .ledger
            .find_attempts_by_provider_payment(provider_id, provider_payment_id)
            .await?;
        let Some(attempt) = attempts.first().cloned() else {
            warn!(%event_id, provider_payment_id, "orphan webhook; no matching attempt");
            return Ok(WebhookResult::default());
        };
        // A payment id shared by two intents cannot say which payer paid.
        if attempts
            .iter()
            .any(|a| a.payment_intent_id != attempt.payment_intent_id)
        {
            warn!(%event_id, provider_payment_id, "provider payment id spans several intents");
            return Err(ServiceError::ProviderPaymentIdReused {
                provider_id: provider_id.to_string(),
                provider_payment_id: provider_payment_id.to_string(),
            });
        }

        let attempt_changed = self
            .ledger
            .transition_attempt_status(attempt.id, target)
            .await?;
        let intent_changed = self
            .ledger
            .transition_intent_status(attempt.payment_intent_id, target)
            .await?;

        let session = self
            .ledger
            .find_latest_session_for_intent(attempt.payment_intent_id)
            .await?;

        let intent_status = self
            .ledger
            .find_intent(attempt.payment_intent_id)
            .await?
            .map(|intent| intent.status);

        let mut session_closed = false;
        if let (Some(session), Some(status)) = (&session, intent_status) {
            if let Some(outcome) = SessionStatus::closed_by(status) {
                session_closed = self.ledger.close_session(session.id, outcome).await?;
            }
        }

        info!(
            %event_id,
            attempt_id = %attempt.id,
            %target,
            attempt_changed,
            intent_changed,
            session_closed,
            "webhook applied"
        );

        Ok(WebhookResult {
            checkout_public_token: session.map(|s| s.public_token),
            payment_intent_id: Some(attempt.payment_intent_id),
            status: intent_status,
        })
    }

    async fn stamp(&self, event_id: Uuid, processing_error: Option<String>) {
        if let Err(err) = self
            .ledger
            .mark_event_processed(event_id, processing_error)
            .await
        {
            warn!(%event_id, error = %err, "failed to stamp webhook event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_json_bodies_are_wrapped() {
        assert_eq!(parse_payload(b"status=ok"), json!({ "raw": "status=ok" }));
        assert_eq!(parse_payload(br#"{"a":1}"#), json!({ "a": 1 }));
    }
}
