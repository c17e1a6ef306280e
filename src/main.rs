use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{bail, Context};
use http::HeaderValue;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};
use tracing::{error, info, warn};

use pay_orchestrator as api;
use pay_orchestrator::notifications::{
    FanoutNotifier, LocalNotifier, NoopNotifier, Notifier, RedisNotifier,
};
use pay_orchestrator::providers::{click::ClickAdapter, uzum::UzumAdapter, ProviderRegistry};
use pay_orchestrator::repositories::{InMemoryLedger, LedgerStore, SeaOrmLedger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Ledger store
    let (ledger, db_pool): (Arc<dyn LedgerStore>, _) = if cfg.uses_in_memory_ledger() {
        warn!("Using the in-memory ledger; state is lost on restart");
        (Arc::new(InMemoryLedger::new()) as Arc<dyn LedgerStore>, None)
    } else {
        let db_pool = api::db::establish_connection_from_app_config(&cfg)
            .await
            .context("failed to connect to the ledger database")?;
        if cfg.auto_migrate {
            api::db::run_migrations(&db_pool).await.map_err(|e| {
                error!("Failed running migrations: {}", e);
                e
            })?;
        }
        let db_arc = Arc::new(db_pool);
        (
            Arc::new(SeaOrmLedger::new(db_arc.clone())) as Arc<dyn LedgerStore>,
            Some(db_arc),
        )
    };

    // Provider adapters share one HTTP client; each call is bounded by the orchestrator.
    let http_client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .build()
        .context("failed to build provider HTTP client")?;
    let providers = Arc::new(
        ProviderRegistry::new()
            .with(Arc::new(UzumAdapter::new(http_client)))
            .with(Arc::new(ClickAdapter::new())),
    );
    info!(providers = ?providers, "provider adapters registered");

    // Realtime updates
    let updates = LocalNotifier::new();
    let notifier: Arc<dyn Notifier> = match cfg.notifier_backend.as_str() {
        "redis" => {
            let redis = RedisNotifier::new(&cfg.redis_url, cfg.notifier_timeout())
                .context("invalid redis_url for the redis notifier")?;
            Arc::new(FanoutNotifier::new(vec![
                Arc::new(redis),
                Arc::new(updates.clone()),
            ]))
        }
        "none" => {
            info!("Realtime checkout updates disabled; clients poll the status endpoint");
            Arc::new(NoopNotifier)
        }
        _ => Arc::new(updates.clone()),
    };

    // Services used by HTTP handlers
    let checkout = api::services::CheckoutService::new(
        ledger.clone(),
        providers.clone(),
        api::services::CheckoutSettings {
            pay_base_url: cfg.pay_base_url.clone(),
            environment: cfg.payment_environment,
            provider_timeout: cfg.provider_timeout(),
        },
    );
    let webhooks = api::services::WebhookReconciler::new(ledger, providers);

    if cfg.admin_api_key.is_none() {
        info!("Admin endpoints disabled; set APP__ADMIN_API_KEY to enable provider account seeding");
    }

    let app_state = api::AppState {
        services: api::handlers::AppServices::new(checkout, webhooks),
        notifier,
        updates,
        environment: cfg.payment_environment,
        admin_api_key: cfg.admin_api_key.clone(),
    };

    // Build CORS layer from config
    let configured_origins: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    let cors_layer = if let Some(origins) = configured_origins {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
            .allow_credentials(cfg.cors_allow_credentials)
    } else if cfg.should_allow_permissive_cors() {
        info!(
            "Using permissive CORS because explicit origins were not configured ({})",
            if cfg.is_development() {
                "development environment"
            } else {
                "explicit override enabled"
            }
        );
        CorsLayer::permissive()
    } else {
        bail!("Missing CORS configuration: set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true");
    };

    let app = api::app_router(app_state, api::health::HealthState::new(db_pool))
        .layer(TimeoutLayer::new(Duration::from_secs(cfg.request_timeout_secs)))
        .layer(cors_layer);

    // Bind and serve
    let host: std::net::IpAddr = cfg
        .host
        .parse()
        .with_context(|| format!("invalid host address {}", cfg.host))?;
    let addr = SocketAddr::new(host, cfg.port);
    info!(
        environment = %cfg.payment_environment,
        "pay-orchestrator listening on http://{}", addr
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!("failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
