use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::entities::ProviderEnvironment;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_LEDGER_BACKEND: &str = "database";
const DEFAULT_NOTIFIER_BACKEND: &str = "in-memory";
const DEFAULT_PAY_BASE_URL: &str = "http://localhost:8080";
const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 15;
const DEFAULT_NOTIFIER_TIMEOUT_MS: u64 = 2500;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Ledger backend: "database" or "in-memory"
    #[serde(default = "default_ledger_backend")]
    #[validate(custom = "validate_ledger_backend")]
    pub ledger_backend: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment (development, staging, production)
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Base URL of the customer-facing pay page, e.g. https://pay.example.com
    #[serde(default = "default_pay_base_url")]
    #[validate(custom = "validate_pay_base_url")]
    pub pay_base_url: String,

    /// Provider environment whose merchant accounts are eligible ("test" or "live")
    #[serde(default = "default_payment_environment")]
    pub payment_environment: ProviderEnvironment,

    /// Upper bound for a single provider registration call
    #[serde(default = "default_provider_timeout_secs")]
    #[validate(custom = "validate_non_zero_u64")]
    pub provider_timeout_secs: u64,

    /// Realtime notifier: "in-memory", "redis" or "none"
    #[serde(default = "default_notifier_backend")]
    #[validate(custom = "validate_notifier_backend")]
    pub notifier_backend: String,

    /// Redis connection URL (used by the redis notifier)
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Upper bound for a single realtime publish
    #[serde(default = "default_notifier_timeout_ms")]
    #[validate(custom = "validate_non_zero_u64")]
    pub notifier_timeout_ms: u64,

    /// Outer timeout applied to every HTTP request
    #[serde(default = "default_request_timeout_secs")]
    #[validate(custom = "validate_non_zero_u64")]
    pub request_timeout_secs: u64,

    /// Shared key for the operator endpoints; they are not mounted when unset
    #[serde(default)]
    pub admin_api_key: Option<String>,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// CORS: allow credentials
    #[serde(default)]
    pub cors_allow_credentials: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the essentials.
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            ledger_backend: default_ledger_backend(),
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            pay_base_url: default_pay_base_url(),
            payment_environment: default_payment_environment(),
            provider_timeout_secs: default_provider_timeout_secs(),
            notifier_backend: default_notifier_backend(),
            redis_url: default_redis_url(),
            notifier_timeout_ms: default_notifier_timeout_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            admin_api_key: None,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            cors_allow_credentials: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
        }
    }

    /// Gets database URL reference
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// True when the ledger lives in process memory rather than the database.
    pub fn uses_in_memory_ledger(&self) -> bool {
        self.ledger_backend.eq_ignore_ascii_case("in-memory")
    }

    pub fn provider_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn notifier_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.notifier_timeout_ms)
    }

    /// Returns true if explicit CORS origins are configured
    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_ref()
            .map(|raw| raw.split(',').any(|origin| !origin.trim().is_empty()))
            .unwrap_or(false)
    }

    /// Whether we should fall back to permissive CORS
    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or explicitly opt-in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if self.is_production() && !self.pay_base_url.starts_with("https://") {
            let mut err = ValidationError::new("pay_base_url_https_required");
            err.message = Some(
                "Production pay pages must be served over https; set APP__PAY_BASE_URL".into(),
            );
            errors.add("pay_base_url", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_ledger_backend() -> String {
    DEFAULT_LEDGER_BACKEND.to_string()
}

fn default_notifier_backend() -> String {
    DEFAULT_NOTIFIER_BACKEND.to_string()
}

fn default_pay_base_url() -> String {
    DEFAULT_PAY_BASE_URL.to_string()
}

fn default_payment_environment() -> ProviderEnvironment {
    ProviderEnvironment::Live
}

fn default_provider_timeout_secs() -> u64 {
    DEFAULT_PROVIDER_TIMEOUT_SECS
}

fn default_notifier_timeout_ms() -> u64 {
    DEFAULT_NOTIFIER_TIMEOUT_MS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_db_max_connections() -> u32 {
    16
}

fn default_db_min_connections() -> u32 {
    2
}

fn default_db_connect_timeout_secs() -> u64 {
    30
}

fn default_db_idle_timeout_secs() -> u64 {
    600
}

fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn validate_ledger_backend(value: &str) -> Result<(), ValidationError> {
    match value.to_ascii_lowercase().as_str() {
        "database" | "in-memory" => Ok(()),
        _ => {
            let mut err = ValidationError::new("ledger_backend");
            err.message = Some("Must be one of: database, in-memory".into());
            Err(err)
        }
    }
}

fn validate_notifier_backend(value: &str) -> Result<(), ValidationError> {
    match value.to_ascii_lowercase().as_str() {
        "in-memory" | "redis" | "none" => Ok(()),
        _ => {
            let mut err = ValidationError::new("notifier_backend");
            err.message = Some("Must be one of: in-memory, redis, none".into());
            Err(err)
        }
    }
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_pay_base_url(value: &str) -> Result<(), ValidationError> {
    match url::Url::parse(value) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.has_host() => Ok(()),
        _ => {
            let mut err = ValidationError::new("pay_base_url");
            err.message = Some("Must be an absolute http(s) URL".into());
            Err(err)
        }
    }
}

fn validate_non_zero_u64(value: u64) -> Result<(), ValidationError> {
    if value == 0 {
        let mut err = ValidationError::new("non_zero");
        err.message = Some("Value must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("pay_orchestrator={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    load_config_from(Path::new(CONFIG_DIR))
}

/// Same as [`load_config`] but reading the toml layers from `dir`.
pub fn load_config_from(dir: &Path) -> Result<AppConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            dir.display()
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://pay_orchestrator.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&dir.join("default").to_string_lossy()).required(false))
        .add_source(File::with_name(&dir.join(&run_env).to_string_lossy()).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
