use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use validator::Validate;

/// Application configuration, loaded from an optional `config/{env}.toml`
/// file layered with `APP_*` environment variables.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging filter (tracing env-filter syntax)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to create missing tables on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB connect timeout (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    /// Payment gateway public key id, returned to clients for the checkout
    /// widget.
    pub gateway_key_id: String,

    /// Merchant secret for the confirm-payment HMAC.
    #[validate(length(min = 16))]
    pub gateway_key_secret: String,

    /// Separate secret for webhook body HMAC.
    #[validate(length(min = 16))]
    pub gateway_webhook_secret: String,

    /// Gateway REST base URL
    #[serde(default = "default_gateway_base_url")]
    pub gateway_base_url: String,

    /// Settlement currency (minor units everywhere)
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Subtotal (minor units) at or above which shipping is free
    #[serde(default = "default_free_shipping_threshold")]
    pub free_shipping_threshold: i64,

    /// Flat shipping fee (minor units) below the threshold
    #[serde(default = "default_shipping_fee")]
    pub shipping_fee: i64,

    /// Cash-on-delivery surcharge (minor units)
    #[serde(default = "default_cod_fee")]
    pub cod_fee: i64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_environment() -> String {
    "development".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_gateway_base_url() -> String {
    "https://api.razorpay.com/v1".to_string()
}
fn default_currency() -> String {
    "INR".to_string()
}
fn default_free_shipping_threshold() -> i64 {
    49_900
}
fn default_shipping_fee() -> i64 {
    4_900
}
fn default_cod_fee() -> i64 {
    3_000
}

impl AppConfig {
    /// Load configuration from `config/{APP_ENV}.toml` (optional) layered
    /// with `APP_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let cfg: AppConfig = Config::builder()
            .add_source(File::with_name(&format!("config/{env}")).required(false))
            .add_source(Environment::with_prefix("APP"))
            .build()?
            .try_deserialize()?;

        cfg.validate()
            .map_err(|e| ConfigError::Message(format!("invalid configuration: {e}")))?;
        Ok(cfg)
    }

    /// Minimal constructor used by tests and embedding.
    pub fn new(
        database_url: impl Into<String>,
        gateway_key_id: impl Into<String>,
        gateway_key_secret: impl Into<String>,
        gateway_webhook_secret: impl Into<String>,
    ) -> Self {
        Self {
            database_url: database_url.into(),
            host: default_host(),
            port: default_port(),
            environment: "test".to_string(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: true,
            db_max_connections: 1,
            db_min_connections: 1,
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            gateway_key_id: gateway_key_id.into(),
            gateway_key_secret: gateway_key_secret.into(),
            gateway_webhook_secret: gateway_webhook_secret.into(),
            gateway_base_url: default_gateway_base_url(),
            currency: default_currency(),
            free_shipping_threshold: default_free_shipping_threshold(),
            shipping_fee: default_shipping_fee(),
            cod_fee: default_cod_fee(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
