use serde::Deserialize;
use config::{Config, ConfigError, Environment, File};

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub stripe: StripeConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub evaluations: EvaluationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Used to build links embedded in notifications and emails.
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub session_duration_hours: i64,
    #[serde(default)]
    pub secure_cookies: bool,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StripeConfig {
    pub secret_key: Option<String>,
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmailConfig {
    #[serde(default)]
    pub enabled: bool,
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub from_address: String,
    pub reply_to: Option<String>,
}

fn default_smtp_port() -> u16 {
    587
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: None,
            smtp_port: default_smtp_port(),
            smtp_username: None,
            smtp_password: None,
            from_address: "Got1 <noreply@got1.app>".to_string(),
            reply_to: None,
        }
    }
}

/// When the player's money is collected.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentFlow {
    /// Checkout at request time; funds are held until the scout answers.
    Upfront,
    /// The scout confirms first and the player then receives a payment link.
    ConfirmThenPay,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EvaluationConfig {
    pub payment_flow: PaymentFlow,
    /// Platform share of each evaluation in basis points.
    pub platform_fee_bps: u32,
    pub max_price_cents: i64,
    pub response_window_hours: i64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            payment_flow: PaymentFlow::Upfront,
            platform_fee_bps: 1000,
            max_price_cents: 1_000_000,
            response_window_hours: 72,
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.base_url", "http://localhost:3000")?
            .set_default("database.url", "sqlite://got1.db?mode=rwc")?
            .set_default("database.max_connections", 10)?
            .set_default("auth.session_duration_hours", 24)?
            .set_default("stripe.enabled", false)?
            .set_default("evaluations.payment_flow", "upfront")?
            .set_default("evaluations.platform_fee_bps", 1000)?
            .set_default("evaluations.max_price_cents", 1_000_000)?
            .set_default("evaluations.response_window_hours", 72)?

            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))

            // Add environment variables (with GOT1__ prefix, double underscore separates levels)
            .add_source(Environment::with_prefix("GOT1").separator("__"))

            .build()?;

        config.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                base_url: "http://localhost:3000".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://got1.db?mode=rwc".to_string(),
                max_connections: 10,
            },
            auth: AuthConfig {
                session_duration_hours: 24,
                secure_cookies: false,
            },
            stripe: StripeConfig::default(),
            email: EmailConfig::default(),
            evaluations: EvaluationConfig::default(),
        }
    }
}
