#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use serde_json::{json, Value};
use tokio::sync::Barrier;
use tower::ServiceExt;
use uuid::Uuid;

use pay_orchestrator::{
    entities::{
        checkout_session, org_provider_account, payment_attempt, payment_event, payment_intent,
        AccountStatus, PaymentStatus, ProviderEnvironment, SessionStatus,
    },
    errors::ServiceError,
    handlers::AppServices,
    health::HealthState,
    notifications::{CheckoutUpdate, LocalNotifier, Notifier, NotifierError},
    providers::{
        AttemptContext, ProviderAdapter, ProviderAttemptResult, ProviderError, ProviderRegistry,
        RegistrationRecord,
    },
    repositories::{
        AttemptRegistration, InMemoryLedger, LedgerStore, NewCheckout, ProviderAccountUpsert,
    },
    services::{CheckoutService, CheckoutSettings, WebhookReconciler},
    AppState,
};

pub const ADMIN_KEY: &str = "test-admin-key";
pub const FAKE_PROVIDER: &str = "uzum";

/// What the fake adapter does on its next registration.
#[derive(Clone)]
pub enum Script {
    /// Succeed; without a fixed payment id one is derived from the attempt id.
    Register {
        redirect_url: String,
        provider_payment_id: Option<String>,
    },
    Fail(ProviderError),
    /// Never answer; exercises the orchestrator's timeout.
    Hang,
}

/// Scripted adapter standing in for a real provider.
pub struct FakeAdapter {
    id: String,
    script: Mutex<Script>,
    barrier: Mutex<Option<Arc<Barrier>>>,
    calls: AtomicUsize,
}

impl FakeAdapter {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            script: Mutex::new(Script::Register {
                redirect_url: "https://pay.example/abc".to_string(),
                provider_payment_id: None,
            }),
            barrier: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_script(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }

    /// Hold every registration until `parties` calls are in flight.
    pub fn rendezvous(&self, parties: usize) {
        *self.barrier.lock().unwrap() = Some(Arc::new(Barrier::new(parties)));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for FakeAdapter {
    fn provider_id(&self) -> &str {
        &self.id
    }

    async fn create_attempt(
        &self,
        ctx: &AttemptContext,
    ) -> Result<ProviderAttemptResult, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let barrier = self.barrier.lock().unwrap().clone();
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }

        let script = self.script.lock().unwrap().clone();
        match script {
            Script::Register {
                redirect_url,
                provider_payment_id,
            } => Ok(ProviderAttemptResult {
                provider_payment_id: Some(
                    provider_payment_id.unwrap_or_else(|| format!("fake-{}", ctx.attempt_id)),
                ),
                status: PaymentStatus::RequiresAction,
                raw: RegistrationRecord::External {
                    provider_id: self.id.clone(),
                    body: json!({ "redirectUrl": redirect_url }),
                },
                redirect_url,
            }),
            Script::Fail(err) => Err(err),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ProviderError::InvalidResponse { provider: "fake" })
            }
        }
    }
}

/// Records every publish and forwards it to the in-process channels.
#[derive(Default)]
pub struct RecordingNotifier {
    published: Mutex<Vec<CheckoutUpdate>>,
    fail: AtomicBool,
    local: LocalNotifier,
}

impl RecordingNotifier {
    pub fn fail_publishes(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<CheckoutUpdate> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn publish(
        &self,
        public_token: &str,
        update: &CheckoutUpdate,
    ) -> Result<(), NotifierError> {
        self.published.lock().unwrap().push(update.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifierError::Timeout(Duration::from_millis(1)));
        }
        self.local.publish(public_token, update).await
    }
}

/// Delegates to an in-memory ledger; attempt transitions can be made to fail.
pub struct FaultyLedger {
    inner: InMemoryLedger,
    fail_attempt_transitions: AtomicBool,
}

impl FaultyLedger {
    pub fn new(inner: InMemoryLedger) -> Self {
        Self {
            inner,
            fail_attempt_transitions: AtomicBool::new(false),
        }
    }

    pub fn fail_attempt_transitions(&self, fail: bool) {
        self.fail_attempt_transitions.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerStore for FaultyLedger {
    async fn create_checkout(&self, checkout: NewCheckout) -> Result<(), ServiceError> {
        self.inner.create_checkout(checkout).await
    }

    async fn find_session_by_token(
        &self,
        public_token: &str,
    ) -> Result<Option<checkout_session::Model>, ServiceError> {
        self.inner.find_session_by_token(public_token).await
    }

    async fn find_intent(&self, id: Uuid) -> Result<Option<payment_intent::Model>, ServiceError> {
        self.inner.find_intent(id).await
    }

    async fn find_attempt(&self, id: Uuid) -> Result<Option<payment_attempt::Model>, ServiceError> {
        self.inner.find_attempt(id).await
    }

    async fn find_active_provider_account(
        &self,
        org_id: &str,
        provider_id: &str,
        environment: ProviderEnvironment,
    ) -> Result<Option<org_provider_account::Model>, ServiceError> {
        self.inner
            .find_active_provider_account(org_id, provider_id, environment)
            .await
    }

    async fn list_active_provider_accounts(
        &self,
        org_id: &str,
        environment: ProviderEnvironment,
    ) -> Result<Vec<org_provider_account::Model>, ServiceError> {
        self.inner
            .list_active_provider_accounts(org_id, environment)
            .await
    }

    async fn find_account_credentials(
        &self,
        org_provider_account_id: Uuid,
    ) -> Result<Option<Value>, ServiceError> {
        self.inner
            .find_account_credentials(org_provider_account_id)
            .await
    }

    async fn upsert_provider_account(
        &self,
        account: ProviderAccountUpsert,
    ) -> Result<org_provider_account::Model, ServiceError> {
        self.inner.upsert_provider_account(account).await
    }

    async fn insert_attempt(&self, attempt: payment_attempt::Model) -> Result<(), ServiceError> {
        self.inner.insert_attempt(attempt).await
    }

    async fn record_attempt_registration(
        &self,
        attempt_id: Uuid,
        registration: AttemptRegistration,
    ) -> Result<bool, ServiceError> {
        self.inner
            .record_attempt_registration(attempt_id, registration)
            .await
    }

    async fn claim_session_selection(
        &self,
        session_id: Uuid,
        expected_attempt_id: Option<Uuid>,
        provider_id: &str,
        attempt_id: Uuid,
    ) -> Result<bool, ServiceError> {
        self.inner
            .claim_session_selection(session_id, expected_attempt_id, provider_id, attempt_id)
            .await
    }

    async fn find_attempts_by_provider_payment(
        &self,
        provider_id: &str,
        provider_payment_id: &str,
    ) -> Result<Vec<payment_attempt::Model>, ServiceError> {
        self.inner
            .find_attempts_by_provider_payment(provider_id, provider_payment_id)
            .await
    }

    async fn transition_attempt_status(
        &self,
        attempt_id: Uuid,
        target: PaymentStatus,
    ) -> Result<bool, ServiceError> {
        if self.fail_attempt_transitions.load(Ordering::SeqCst) {
            return Err(ServiceError::InternalError(
                "attempt store unavailable".to_string(),
            ));
        }
        self.inner.transition_attempt_status(attempt_id, target).await
    }

    async fn transition_intent_status(
        &self,
        intent_id: Uuid,
        target: PaymentStatus,
    ) -> Result<bool, ServiceError> {
        self.inner.transition_intent_status(intent_id, target).await
    }

    async fn find_latest_session_for_intent(
        &self,
        intent_id: Uuid,
    ) -> Result<Option<checkout_session::Model>, ServiceError> {
        self.inner.find_latest_session_for_intent(intent_id).await
    }

    async fn close_session(
        &self,
        session_id: Uuid,
        outcome: SessionStatus,
    ) -> Result<bool, ServiceError> {
        self.inner.close_session(session_id, outcome).await
    }

    async fn insert_event(&self, event: payment_event::Model) -> Result<(), ServiceError> {
        self.inner.insert_event(event).await
    }

    async fn mark_event_processed(
        &self,
        event_id: Uuid,
        processing_error: Option<String>,
    ) -> Result<(), ServiceError> {
        self.inner
            .mark_event_processed(event_id, processing_error)
            .await
    }
}

pub struct TestOptions {
    pub provider_timeout: Duration,
    /// Registered after the fake, so an adapter with the same id replaces it.
    pub adapters: Vec<Arc<dyn ProviderAdapter>>,
    pub pay_base_url: String,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(2),
            adapters: Vec::new(),
            pay_base_url: "https://pay.test".to_string(),
        }
    }
}

/// Router over an in-memory ledger, a scripted fake provider and a recording notifier.
pub struct TestApp {
    router: Router,
    pub ledger: InMemoryLedger,
    /// The store the services write through; wraps `ledger`.
    pub store: Arc<FaultyLedger>,
    pub fake: Arc<FakeAdapter>,
    pub notifier: Arc<RecordingNotifier>,
    pub updates: LocalNotifier,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_options(TestOptions::default())
    }

    pub fn with_options(options: TestOptions) -> Self {
        let ledger = InMemoryLedger::new();
        let fake = Arc::new(FakeAdapter::new(FAKE_PROVIDER));

        let mut registry = ProviderRegistry::new().with(fake.clone());
        for adapter in options.adapters {
            registry = registry.with(adapter);
        }
        let providers = Arc::new(registry);

        let faulty = Arc::new(FaultyLedger::new(ledger.clone()));
        let store: Arc<dyn LedgerStore> = faulty.clone();
        let checkout = CheckoutService::new(
            store.clone(),
            providers.clone(),
            CheckoutSettings {
                pay_base_url: options.pay_base_url,
                environment: ProviderEnvironment::Live,
                provider_timeout: options.provider_timeout,
            },
        );
        let webhooks = WebhookReconciler::new(store, providers);

        let notifier = Arc::new(RecordingNotifier::default());
        let updates = notifier.local.clone();
        let state = AppState {
            services: AppServices::new(checkout, webhooks),
            notifier: notifier.clone(),
            updates: updates.clone(),
            environment: ProviderEnvironment::Live,
            admin_api_key: Some(ADMIN_KEY.to_string()),
        };

        Self {
            router: pay_orchestrator::app_router(state, HealthState::default()),
            ledger,
            store: faulty,
            fake,
            notifier,
            updates,
        }
    }

    /// Send a request against the router with an optional JSON body.
    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        self.request_with_headers(method, uri, body, &[]).await
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Deliver a webhook body exactly as a provider would.
    pub async fn deliver_webhook(&self, provider_id: &str, body: impl Into<Body>) -> Response {
        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("/webhooks/{}", provider_id))
            .header("content-type", "application/json")
            .body(body.into())
            .expect("failed to build webhook request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during webhook delivery")
    }

    pub async fn webhook_json(&self, provider_id: &str, payload: Value) -> Response {
        self.deliver_webhook(provider_id, payload.to_string()).await
    }

    /// Create a checkout and return the 201 body.
    pub async fn create_checkout(&self, payload: Value) -> Value {
        let response = self
            .request(Method::POST, "/checkout_sessions", Some(payload))
            .await;
        assert_eq!(response.status(), 201, "checkout creation failed");
        response_json(response).await
    }

    pub async fn create_default_checkout(&self) -> Value {
        self.create_checkout(json!({
            "orgId": "O1",
            "amountMinor": 150000,
            "currency": "UZS"
        }))
        .await
    }

    pub async fn select(&self, public_token: &str, provider_id: &str) -> Response {
        self.request(
            Method::POST,
            &format!("/checkout_sessions/{}/select_provider", public_token),
            Some(json!({ "providerId": provider_id })),
        )
        .await
    }

    pub async fn status(&self, public_token: &str) -> Value {
        let response = self
            .request(
                Method::GET,
                &format!("/checkout_sessions/{}/status", public_token),
                None,
            )
            .await;
        assert_eq!(response.status(), 200, "status poll failed");
        response_json(response).await
    }

    /// Activate a live account for `org_id`/`provider_id` directly in the ledger.
    pub async fn seed_account(&self, org_id: &str, provider_id: &str, credentials: Value) {
        self.ledger
            .upsert_provider_account(ProviderAccountUpsert {
                org_id: org_id.to_string(),
                provider_id: provider_id.to_string(),
                environment: ProviderEnvironment::Live,
                status: AccountStatus::Active,
                display_label: None,
                metadata: json!({}),
                credentials,
            })
            .await
            .expect("failed to seed provider account");
    }

    pub fn intent_id(created: &Value) -> Uuid {
        created["paymentIntentId"]
            .as_str()
            .and_then(|id| Uuid::parse_str(id).ok())
            .expect("paymentIntentId in creation response")
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

pub fn token_of(created: &Value) -> String {
    created["publicToken"]
        .as_str()
        .expect("publicToken in creation response")
        .to_string()
}
