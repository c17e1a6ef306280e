pub mod admin;
pub mod checkout_sessions;
pub mod common;
pub mod pay;
pub mod webhooks;

use std::sync::Arc;

use crate::services::{CheckoutService, WebhookReconciler};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub checkout: Arc<CheckoutService>,
    pub webhooks: Arc<WebhookReconciler>,
}

impl AppServices {
    pub fn new(checkout: CheckoutService, webhooks: WebhookReconciler) -> Self {
        Self {
            checkout: Arc::new(checkout),
            webhooks: Arc::new(webhooks),
        }
    }
}
