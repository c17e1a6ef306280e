/*!
 * # Health Check Module
 *
 * - Basic health check (`/health`) - process is up, with version and timestamp
 * - Readiness check (`/health/ready`) - the ledger database answers a ping
 * - Version (`/health/version`) - build information
 */

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error};
use utoipa::ToSchema;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Up,
    Down,
}

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct HealthInfo {
    pub status: HealthStatus,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

/// Health check state. `db_pool` is `None` when the ledger lives in memory.
#[derive(Clone, Default)]
pub struct HealthState {
    pub db_pool: Option<Arc<DatabaseConnection>>,
}

impl HealthState {
    pub fn new(db_pool: Option<Arc<DatabaseConnection>>) -> Self {
        Self { db_pool }
    }

    async fn ledger_status(&self) -> HealthStatus {
        match &self.db_pool {
            Some(pool) => match pool.ping().await {
                Ok(_) => HealthStatus::Up,
                Err(e) => {
                    error!("Database health check failed: {}", e);
                    HealthStatus::Down
                }
            },
            None => HealthStatus::Up,
        }
    }
}

/// Basic health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthInfo)),
    tag = "health"
)]
pub async fn health_check() -> impl IntoResponse {
    debug!("Health check endpoint called");
    Json(HealthInfo {
        status: HealthStatus::Up,
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    })
}

/// Readiness check endpoint
pub async fn readiness_check(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let status = state.ledger_status().await;
    let status_code = match status {
        HealthStatus::Up => StatusCode::OK,
        HealthStatus::Down => StatusCode::SERVICE_UNAVAILABLE,
    };

    (
        status_code,
        Json(json!({
            "ready": status == HealthStatus::Up,
            "ledger": status,
            "timestamp": Utc::now(),
        })),
    )
}

/// Returns build and version information
pub async fn version_info() -> impl IntoResponse {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "commit": option_env!("GIT_HASH").unwrap_or("unknown"),
    }))
}

/// Router mounted under `/health`.
pub fn health_routes<S>(state: HealthState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/version", get(version_info))
        .with_state(Arc::new(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn in_memory_ledger_is_always_ready() {
        let app: Router = health_routes(HealthState::default());
        let response = app
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["ready"], true);
    }

    #[tokio::test]
    async fn health_reports_version() {
        let app: Router = health_routes(HealthState::default());
        let response = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let info: HealthInfo = serde_json::from_slice(&body).unwrap();
        assert_eq!(info.status, HealthStatus::Up);
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
    }
}
