use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_GATEWAY_BASE_URL: &str = "https://api.stripe.com";
const DEFAULT_SUCCESS_URL: &str =
    "http://localhost:3000/success?session_id={CHECKOUT_SESSION_ID}";
const DEFAULT_CANCEL_URL: &str = "http://localhost:3000/cart";
const DEFAULT_STORE_NAME: &str = "SmartMart";

/// Payment gateway settings
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Base URL of the gateway's REST API
    #[validate(url)]
    #[serde(default = "default_gateway_base_url")]
    pub api_base_url: String,

    /// Secret API key sent as bearer token
    #[serde(default)]
    pub secret_key: String,

    /// Upper bound for a single gateway call, in seconds
    #[validate(range(min = 1, max = 120))]
    #[serde(default = "default_gateway_timeout_secs")]
    pub timeout_secs: u64,

    /// Where the gateway sends the buyer after payment. May contain `{CHECKOUT_SESSION_ID}`.
    #[validate(length(min = 1))]
    #[serde(default = "default_success_url")]
    pub success_url: String,

    /// Where the gateway sends the buyer after abandoning payment
    #[validate(length(min = 1))]
    #[serde(default = "default_cancel_url")]
    pub cancel_url: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_gateway_base_url(),
            secret_key: String::new(),
            timeout_secs: default_gateway_timeout_secs(),
            success_url: default_success_url(),
            cancel_url: default_cancel_url(),
        }
    }
}

/// Order confirmation delivery settings
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct NotificationConfig {
    /// HTTP relay that turns confirmation payloads into mail. Unset means log-only delivery.
    #[validate(url)]
    #[serde(default)]
    pub relay_url: Option<String>,

    /// HMAC key for signing relay payloads
    #[serde(default)]
    pub signing_secret: Option<String>,

    #[validate(range(min = 1, max = 10))]
    #[serde(default = "default_notification_attempts")]
    pub max_attempts: u32,

    #[validate(range(min = 1, max = 60))]
    #[serde(default = "default_notification_timeout_secs")]
    pub timeout_secs: u64,

    /// Store name used in the confirmation subject and signature
    #[validate(length(min = 1, max = 100))]
    #[serde(default = "default_store_name")]
    pub store_name: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            relay_url: None,
            signing_secret: None,
            max_attempts: default_notification_attempts(),
            timeout_secs: default_notification_timeout_secs(),
            store_name: default_store_name(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    #[validate(length(min = 1))]
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[validate(custom = "validate_log_level")]
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Maximum number of database connections in the pool
    #[validate(range(min = 1, max = 1000))]
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// Minimum number of database connections in the pool
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,

    /// Capacity of the in-process domain event channel
    #[validate(range(min = 1))]
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Whole-request timeout applied by the HTTP layer, in seconds
    #[validate(range(min = 1, max = 300))]
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Comma-separated browser origins allowed by CORS; permissive outside production when unset
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    #[validate]
    #[serde(default)]
    pub gateway: GatewayConfig,

    #[validate]
    #[serde(default)]
    pub notification: NotificationConfig,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the essentials
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            request_timeout_secs: default_request_timeout_secs(),
            cors_allowed_origins: None,
            gateway: GatewayConfig::default(),
            notification: NotificationConfig::default(),
        }
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Time a confirmation may spend delivering its notification: half the request timeout.
    pub fn notification_budget(&self) -> Duration {
        Duration::from_millis(self.request_timeout_secs.saturating_mul(500))
    }

    /// Checks that only make sense across fields
    pub fn validate_additional_constraints(&self) -> Result<(), validator::ValidationErrors> {
        let mut errors = validator::ValidationErrors::new();

        if self.db_min_connections > self.db_max_connections {
            let mut err = ValidationError::new("db_min_connections");
            err.message = Some("db_min_connections cannot exceed db_max_connections".into());
            errors.add("db_min_connections", err);
        }

        if self.is_production() && self.gateway.secret_key.trim().is_empty() {
            let mut err = ValidationError::new("gateway.secret_key");
            err.message = Some("A gateway secret key is required in production".into());
            errors.add("gateway", err);
        }

        if self.notification.signing_secret.is_some() && self.notification.relay_url.is_none() {
            let mut err = ValidationError::new("notification.signing_secret");
            err.message = Some("signing_secret is only used together with relay_url".into());
            errors.add("notification", err);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

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

fn default_db_max_connections() -> u32 {
    20
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    10
}
fn default_db_idle_timeout_secs() -> u64 {
    300
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_gateway_base_url() -> String {
    DEFAULT_GATEWAY_BASE_URL.to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    10
}

fn default_success_url() -> String {
    DEFAULT_SUCCESS_URL.to_string()
}

fn default_cancel_url() -> String {
    DEFAULT_CANCEL_URL.to_string()
}

fn default_notification_attempts() -> u32 {
    3
}

fn default_notification_timeout_secs() -> u64 {
    10
}

fn default_store_name() -> String {
    DEFAULT_STORE_NAME.to_string()
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

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=debug", level);
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
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration constraint validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite://storefront.db?mode=memory".into(),
            "127.0.0.1".into(),
            8080,
            "development".into(),
        )
    }

    #[test]
    fn defaults_pass_validation() {
        let cfg = base_config();
        assert!(cfg.validate().is_ok());
        assert!(cfg.validate_additional_constraints().is_ok());
        assert!(cfg.gateway.success_url.contains("{CHECKOUT_SESSION_ID}"));
        assert_eq!(cfg.notification.store_name, "SmartMart");
    }

    #[test]
    fn production_requires_gateway_secret() {
        let mut cfg = base_config();
        cfg.environment = "production".into();
        assert!(cfg.validate_additional_constraints().is_err());

        cfg.gateway.secret_key = "sk_live_abc".into();
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn rejects_unknown_log_level() {
        let mut cfg = base_config();
        cfg.log_level = "loud".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_gateway_timeout() {
        let mut cfg = base_config();
        cfg.gateway.timeout_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn signing_secret_without_relay_is_rejected() {
        let mut cfg = base_config();
        cfg.notification.signing_secret = Some("whsec".into());
        assert!(cfg.validate_additional_constraints().is_err());

        cfg.notification.relay_url = Some("https://relay.example.com/mail".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn notification_budget_is_half_the_request_timeout() {
        let mut cfg = base_config();
        assert_eq!(cfg.notification_budget(), Duration::from_secs(15));

        cfg.request_timeout_secs = 3;
        assert_eq!(cfg.notification_budget(), Duration::from_millis(1500));
    }

    #[test]
    fn pool_bounds_are_checked() {
        let mut cfg = base_config();
        cfg.db_min_connections = 50;
        cfg.db_max_connections = 5;
        assert!(cfg.validate_additional_constraints().is_err());
    }
}
