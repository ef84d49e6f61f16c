use std::env;
use std::str::FromStr;

/// Runtime settings, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: String,
    pub database_url: String,
    pub bind_addr: String,
    pub server_url: String,
    pub frontend_url: String,
    pub jwt_secret_key: String,
    pub encryption_key: String,
    pub sentry_dsn: Option<String>,

    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub credit_price_cents: i64,
    pub min_credit_purchase: i32,
    pub max_credit_purchase: i32,

    pub lix_api_key: String,
    pub lix_base_url: String,
    pub lix_timeout_secs: u64,
    pub credits_per_lead: i32,
    pub stale_enrichment_secs: i64,

    pub google_calendar_client_id: String,
    pub google_calendar_client_secret: String,
    pub google_calendar_api_base: String,
    pub google_auth_url: String,
    pub google_token_url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(AppConfig {
            environment: optional("ENVIRONMENT", "development".to_string())?,
            database_url: optional("DATABASE_URL", "database.db".to_string())?,
            bind_addr: optional("BIND_ADDR", "127.0.0.1:3000".to_string())?,
            server_url: required("SERVER_URL")?,
            frontend_url: required("FRONTEND_URL")?,
            jwt_secret_key: required("JWT_SECRET_KEY")?,
            encryption_key: required("ENCRYPTION_KEY")?,
            sentry_dsn: env::var("SENTRY_DSN").ok().filter(|dsn| !dsn.trim().is_empty()),

            stripe_secret_key: required("STRIPE_SECRET_KEY")?,
            stripe_webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
            credit_price_cents: optional("CREDIT_PRICE_CENTS", 10)?,
            min_credit_purchase: optional("MIN_CREDIT_PURCHASE", 50)?,
            max_credit_purchase: optional("MAX_CREDIT_PURCHASE", 100_000)?,

            lix_api_key: required("LIX_API_KEY")?,
            lix_base_url: optional("LIX_BASE_URL", "https://api.lix-it.com".to_string())?,
            lix_timeout_secs: optional("LIX_TIMEOUT_SECS", 30)?,
            credits_per_lead: optional("CREDITS_PER_LEAD", 1)?,
            stale_enrichment_secs: optional("STALE_ENRICHMENT_SECS", 300)?,

            google_calendar_client_id: required("GOOGLE_CALENDAR_CLIENT_ID")?,
            google_calendar_client_secret: required("GOOGLE_CALENDAR_CLIENT_SECRET")?,
            google_calendar_api_base: optional(
                "GOOGLE_CALENDAR_API_BASE",
                "https://www.googleapis.com/calendar/v3".to_string(),
            )?,
            google_auth_url: optional(
                "GOOGLE_AUTH_URL",
                "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            )?,
            google_token_url: optional(
                "GOOGLE_TOKEN_URL",
                "https://oauth2.googleapis.com/token".to_string(),
            )?,
        })
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    pub fn google_calendar_redirect_url(&self) -> String {
        format!("{}/api/auth/google/calendar/callback", self.server_url.trim_end_matches('/'))
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(name)),
    }
}

fn optional<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { name, value }),
        _ => Ok(default),
    }
}

#[cfg(test)]
impl AppConfig {
    pub fn for_tests() -> Self {
        AppConfig {
            environment: "test".to_string(),
            database_url: ":memory:".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            server_url: "http://localhost:3000".to_string(),
            frontend_url: "http://localhost:8080".to_string(),
            jwt_secret_key: "test-jwt-secret".to_string(),
            // 32 zero bytes
            encryption_key: "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=".to_string(),
            sentry_dsn: None,
            stripe_secret_key: "sk_test_dummy".to_string(),
            stripe_webhook_secret: "whsec_dummy".to_string(),
            credit_price_cents: 10,
            min_credit_purchase: 50,
            max_credit_purchase: 100_000,
            lix_api_key: "lix-test-key".to_string(),
            lix_base_url: "http://127.0.0.1:9".to_string(),
            lix_timeout_secs: 30,
            credits_per_lead: 1,
            stale_enrichment_secs: 300,
            google_calendar_client_id: "client-id".to_string(),
            google_calendar_client_secret: "client-secret".to_string(),
            google_calendar_api_base: "http://127.0.0.1:9".to_string(),
            google_auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            google_token_url: "http://127.0.0.1:9/token".to_string(),
        }
    }
}
