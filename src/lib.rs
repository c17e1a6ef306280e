//! Payment orchestration core
//!
//! Creates checkout sessions, routes payment attempts to provider adapters and
//! reconciles provider webhooks into one consistent payment status.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod health;
pub mod middleware_helpers;
pub mod migrator;
pub mod notifications;
pub mod openapi;
pub mod providers;
pub mod repositories;
pub mod services;
pub mod tracing;

use std::sync::Arc;

use axum::{middleware, Router};

use crate::entities::ProviderEnvironment;
use crate::health::HealthState;
use crate::notifications::{LocalNotifier, Notifier};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub services: handlers::AppServices,
    /// Where webhook-driven checkout updates are published.
    pub notifier: Arc<dyn Notifier>,
    /// In-process channels backing the server-sent-events endpoint.
    pub updates: LocalNotifier,
    /// Environment stamped on webhook events and used to pick provider accounts.
    pub environment: ProviderEnvironment,
    pub admin_api_key: Option<String>,
}

/// Checkout, pay page and webhook routes.
pub fn api_routes(admin_enabled: bool) -> Router<Arc<AppState>> {
    let router = Router::new()
        .nest(
            "/checkout_sessions",
            handlers::checkout_sessions::checkout_session_routes(),
        )
        .nest("/pay", handlers::pay::pay_routes())
        .nest("/webhooks", handlers::webhooks::webhook_routes());

    if admin_enabled {
        router.nest("/admin", handlers::admin::admin_routes())
    } else {
        router
    }
}

/// The full application router with request ids, HTTP tracing, health and API docs.
pub fn app_router(state: AppState, health: HealthState) -> Router {
    let admin_enabled = state.admin_api_key.is_some();

    api_routes(admin_enabled)
        .with_state(Arc::new(state))
        .nest("/health", health::health_routes(health))
        .merge(openapi::swagger_ui())
        // HTTP tracing layer for consistent request/response telemetry
        .layer(crate::tracing::configure_http_tracing())
        .layer(middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
}
