// Checkout orchestration
pub mod checkout;

// Provider callback reconciliation
pub mod webhooks;

pub use checkout::{CheckoutService, CheckoutSettings};
pub use webhooks::{WebhookReconciler, WebhookResult};
