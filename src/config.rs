use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;
use thiserror::Error;
use tracing::info;
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_GATEWAY_BASE_URL: &str = "https://api.mercadopago.com";
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;
const DEFAULT_CURRENCY: &str = "USD";

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

fn validate_currency(currency: &str) -> Result<(), ValidationError> {
    if currency.len() == 3 && currency.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("currency");
        err.message = Some("Currency must be a 3-letter ISO code".into());
        Err(err)
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// MercadoPago access token. Adapter operations that need the gateway
    /// fail with a configuration error when this is absent.
    #[serde(default)]
    pub mp_access_token: Option<String>,

    /// MercadoPago public key (exposed to checkout pages, unused server-side)
    #[serde(default)]
    pub mp_public_key: Option<String>,

    /// Gateway API base URL (overridden in tests)
    #[serde(default = "default_gateway_base_url")]
    pub gateway_base_url: String,

    /// Per-request gateway timeout in seconds
    #[serde(default = "default_gateway_timeout_secs")]
    pub gateway_timeout_secs: u64,

    /// Storefront base URL, used to build checkout return links
    pub store_url: String,

    /// Public base URL of this service, used to build the notification URL
    pub backend_url: String,

    /// Base URL of the order-management backend API
    pub store_api_url: String,

    /// Shared secret for webhook signature verification (unsigned when absent)
    #[serde(default)]
    pub webhook_secret: Option<String>,

    /// Allowed clock skew for signed webhook timestamps, in seconds
    #[serde(default = "default_webhook_tolerance_secs")]
    pub webhook_tolerance_secs: u64,

    /// Currency used when a checkout request does not carry one
    #[serde(default = "default_currency")]
    #[validate(custom = "validate_currency")]
    pub default_currency: String,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_gateway_base_url() -> String {
    DEFAULT_GATEWAY_BASE_URL.to_string()
}
fn default_gateway_timeout_secs() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}
fn default_webhook_tolerance_secs() -> u64 {
    DEFAULT_WEBHOOK_TOLERANCE_SECS
}
fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

impl AppConfig {
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The URL the gateway is told to notify on payment events.
    pub fn notification_url(&self) -> String {
        format!(
            "{}/api/v1/payments/webhook",
            self.backend_url.trim_end_matches('/')
        )
    }
}

/// Loads configuration from `config/default`, an environment-specific file,
/// and `APP_*` environment variables, in increasing precedence.
pub fn load_config() -> Result<AppConfig, ConfigLoadError> {
    let run_env = env::var("RUN_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let cfg: AppConfig = Config::builder()
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?
        .try_deserialize()?;

    cfg.validate()?;

    info!(
        environment = %cfg.environment,
        gateway_base_url = %cfg.gateway_base_url,
        store_api_url = %cfg.store_api_url,
        gateway_configured = cfg.mp_access_token.is_some(),
        "Configuration loaded"
    );

    Ok(cfg)
}

/// Initializes the global tracing subscriber. Idempotent so tests can call it freely.
pub fn init_tracing(log_level: &str, json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    // try_init keeps a subscriber installed by a test harness or embedding process.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            log_json: false,
            mp_access_token: Some("TEST-token".to_string()),
            mp_public_key: None,
            gateway_base_url: default_gateway_base_url(),
            gateway_timeout_secs: default_gateway_timeout_secs(),
            store_url: "https://shop.example.com".to_string(),
            backend_url: "https://payments.example.com/".to_string(),
            store_api_url: "https://orders.internal.example.com".to_string(),
            webhook_secret: None,
            webhook_tolerance_secs: default_webhook_tolerance_secs(),
            default_currency: default_currency(),
            cors_allowed_origins: None,
        }
    }

    #[test]
    fn notification_url_strips_trailing_slash() {
        let cfg = base_config();
        assert_eq!(
            cfg.notification_url(),
            "https://payments.example.com/api/v1/payments/webhook"
        );
    }

    #[test]
    fn currency_must_be_three_letter_code() {
        let mut cfg = base_config();
        cfg.default_currency = "DOLLARS".to_string();
        assert!(cfg.validate().is_err());

        cfg.default_currency = "ARS".to_string();
        assert!(cfg.validate().is_ok());
    }
}
