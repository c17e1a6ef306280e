//! Realtime checkout updates.
//!
//! Publishing is best-effort: callers must invoke [`Notifier::publish`] but are
//! allowed to drop its error, and a failed publish never changes the outcome
//! of the operation that triggered it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::PaymentStatus;

pub const CHECKOUT_UPDATED_EVENT: &str = "checkout_updated";

const LOCAL_CHANNEL_CAPACITY: usize = 16;

/// Signal that a checkout's status may have changed; clients refetch status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutUpdate {
    pub event: String,
    pub public_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_intent_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PaymentStatus>,
    pub at: DateTime<Utc>,
}

impl CheckoutUpdate {
    pub fn new(
        public_token: impl Into<String>,
        payment_intent_id: Option<Uuid>,
        status: Option<PaymentStatus>,
    ) -> Self {
        Self {
            event: CHECKOUT_UPDATED_EVENT.to_string(),
            public_token: public_token.into(),
            payment_intent_id,
            status,
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Publish timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, public_token: &str, update: &CheckoutUpdate)
        -> Result<(), NotifierError>;
}

/// Channel name used for a checkout's updates.
pub fn channel_for(public_token: &str) -> String {
    format!("checkout:{}", public_token)
}

/// In-process fan-out; feeds the server-sent-events endpoint.
#[derive(Default, Clone)]
pub struct LocalNotifier {
    channels: Arc<DashMap<String, broadcast::Sender<CheckoutUpdate>>>,
}

impl LocalNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one checkout's updates. The channel is dropped with its last subscription.
    pub fn subscribe(&self, public_token: &str) -> Subscription {
        let receiver = self
            .channels
            .entry(public_token.to_string())
            .or_insert_with(|| broadcast::channel(LOCAL_CHANNEL_CAPACITY).0)
            .subscribe();
        Subscription {
            receiver: Some(receiver),
            public_token: public_token.to_string(),
            channels: Arc::clone(&self.channels),
        }
    }

    /// Tokens that currently hold a channel.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn subscriber_count(&self, public_token: &str) -> usize {
        self.channels
            .get(public_token)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

/// A live subscription to one checkout's local channel.
pub struct Subscription {
    receiver: Option<broadcast::Receiver<CheckoutUpdate>>,
    public_token: String,
    channels: Arc<DashMap<String, broadcast::Sender<CheckoutUpdate>>>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Result<CheckoutUpdate, RecvError> {
        match self.receiver.as_mut() {
            Some(receiver) => receiver.recv().await,
            None => Err(RecvError::Closed),
        }
    }

    pub fn try_recv(&mut self) -> Result<CheckoutUpdate, TryRecvError> {
        match self.receiver.as_mut() {
            Some(receiver) => receiver.try_recv(),
            None => Err(TryRecvError::Closed),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Release our receiver first so the count reflects the remaining subscribers.
        drop(self.receiver.take());
        self.channels
            .remove_if(&self.public_token, |_, sender| sender.receiver_count() == 0);
    }
}

#[async_trait]
impl Notifier for LocalNotifier {
    async fn publish(
        &self,
        public_token: &str,
        update: &CheckoutUpdate,
    ) -> Result<(), NotifierError> {
        let delivered = match self.channels.get(public_token) {
            Some(sender) => sender.send(update.clone()).unwrap_or(0),
            None => 0,
        };
        if delivered == 0 {
            self.channels
                .remove_if(public_token, |_, sender| sender.receiver_count() == 0);
        }
        debug!(public_token, delivered, "local checkout update published");
        Ok(())
    }
}

/// Publishes on the Redis channel `checkout:{token}` for out-of-process subscribers.
#[derive(Clone)]
pub struct RedisNotifier {
    client: Arc<Client>,
    timeout: Duration,
}

impl RedisNotifier {
    pub fn new(redis_url: &str, timeout: Duration) -> Result<Self, NotifierError> {
        let client = Client::open(redis_url)?;
        Ok(Self {
            client: Arc::new(client),
            timeout,
        })
    }

    async fn publish_inner(&self, channel: String, payload: String) -> Result<(), NotifierError> {
        let mut conn = self.client.get_async_connection().await?;
        let receivers: i64 = conn.publish(channel, payload).await?;
        debug!(receivers, "redis checkout update published");
        Ok(())
    }
}

#[async_trait]
impl Notifier for RedisNotifier {
    #[instrument(skip(self, update))]
    async fn publish(
        &self,
        public_token: &str,
        update: &CheckoutUpdate,
    ) -> Result<(), NotifierError> {
        let payload = serde_json::to_string(update)?;
        tokio::time::timeout(
            self.timeout,
            self.publish_inner(channel_for(public_token), payload),
        )
        .await
        .map_err(|_| NotifierError::Timeout(self.timeout))?
    }
}

/// Publishes to every inner notifier; the first error is returned after all were tried.
#[derive(Clone, Default)]
pub struct FanoutNotifier {
    targets: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new(targets: Vec<Arc<dyn Notifier>>) -> Self {
        Self { targets }
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn publish(
        &self,
        public_token: &str,
        update: &CheckoutUpdate,
    ) -> Result<(), NotifierError> {
        let mut first_error = None;
        for target in &self.targets {
            if let Err(err) = target.publish(public_token, update).await {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Used when realtime updates are disabled; clients fall back to polling.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn publish(
        &self,
        _public_token: &str,
        _update: &CheckoutUpdate,
    ) -> Result<(), NotifierError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn local_subscribers_receive_updates_for_their_token_only() {
        let notifier = LocalNotifier::new();
        let mut rx = notifier.subscribe("tok-a");
        let mut other = notifier.subscribe("tok-b");

        let update = CheckoutUpdate::new("tok-a", None, Some(PaymentStatus::Succeeded));
        notifier.publish("tok-a", &update).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), update);
        assert_matches!(other.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_ok_and_drops_the_channel() {
        let notifier = LocalNotifier::new();
        drop(notifier.subscribe("tok"));
        let update = CheckoutUpdate::new("tok", None, None);
        assert!(notifier.publish("tok", &update).await.is_ok());
        assert_eq!(notifier.subscriber_count("tok"), 0);
        assert!(notifier.channels.get("tok").is_none());
    }

    #[test]
    fn dropped_subscriptions_release_their_channels() {
        let notifier = LocalNotifier::new();
        for i in 0..1000 {
            drop(notifier.subscribe(&format!("tok-{i}")));
        }
        assert_eq!(notifier.channel_count(), 0);
    }

    #[test]
    fn channel_survives_until_its_last_subscription_drops() {
        let notifier = LocalNotifier::new();
        let first = notifier.subscribe("tok");
        let second = notifier.subscribe("tok");
        assert_eq!(notifier.subscriber_count("tok"), 2);

        drop(first);
        assert_eq!(notifier.subscriber_count("tok"), 1);
        assert_eq!(notifier.channel_count(), 1);

        drop(second);
        assert_eq!(notifier.channel_count(), 0);
    }

    #[tokio::test]
    async fn redis_publish_to_unreachable_server_errors_instead_of_hanging() {
        let notifier =
            RedisNotifier::new("redis://127.0.0.1:1/", Duration::from_millis(200)).unwrap();
        let update = CheckoutUpdate::new("tok", None, None);
        assert!(notifier.publish("tok", &update).await.is_err());
    }

    #[tokio::test]
    async fn fanout_still_delivers_locally_when_redis_fails() {
        let local = LocalNotifier::new();
        let mut rx = local.subscribe("tok");
        let redis =
            RedisNotifier::new("redis://127.0.0.1:1/", Duration::from_millis(200)).unwrap();
        let fanout = FanoutNotifier::new(vec![Arc::new(redis), Arc::new(local.clone())]);

        let update = CheckoutUpdate::new("tok", None, Some(PaymentStatus::Succeeded));
        assert!(fanout.publish("tok", &update).await.is_err());
        assert_eq!(rx.recv().await.unwrap(), update);
    }

    #[test]
    fn update_serializes_with_camel_case_fields() {
        let update = CheckoutUpdate::new("tok", None, Some(PaymentStatus::Failed));
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["event"], "checkout_updated");
        assert_eq!(value["publicToken"], "tok");
        assert_eq!(value["status"], "failed");
        assert!(value.get("paymentIntentId").is_none());
        assert_eq!(channel_for("tok"), "checkout:tok");
    }
}
