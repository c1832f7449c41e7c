//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `STOREFRONT_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `STOREFRONT_BASE_URL` - Public URL for the storefront
//! - `PAYMENT_SECRET_KEY` - Gateway secret key (only when `PAYMENT_GATEWAY=http`)
//!
//! ## Optional
//! - `STOREFRONT_HOST` - Bind address (default: 127.0.0.1)
//! - `STOREFRONT_PORT` - Listen port (default: 3000)
//! - `PAYMENT_GATEWAY` - `http` or `fake` (default: http)
//! - `PAYMENT_API_BASE` - Gateway base URL (default: <https://api.stripe.com>)
//! - `PAYMENT_WEBHOOK_SECRET` - Webhook signing secret; unsigned webhooks are refused without it
//! - `PAYMENT_CURRENCY` - Store currency (default: usd)
//! - `PAYMENT_TIMEOUT_SECS` - Gateway request timeout (default: 10)
//! - `CART_GUEST_TTL_HOURS` - Guest cart lifetime after the last change (default: 24)
//! - `CHECKOUT_INTENT_TTL_HOURS` - Age after which an unpaid checkout counts as expired (default: 24)
//! - `REAPER_INTERVAL_SECS` - Expired cart sweep interval (default: 3600)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

use larder_core::CurrencyCode;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Storefront application configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL for the storefront
    pub base_url: String,
    /// Payment gateway configuration
    pub payment: PaymentConfig,
    /// Cart and checkout timing
    pub cart: CartConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

/// Which payment gateway implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GatewayKind {
    /// Stripe-compatible REST API.
    #[default]
    Http,
    /// In-process gateway for local development.
    Fake,
}

impl FromStr for GatewayKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" | "stripe" => Ok(Self::Http),
            "fake" => Ok(Self::Fake),
            other => Err(format!("unknown gateway '{other}' (expected http or fake)")),
        }
    }
}

/// Payment gateway configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct PaymentConfig {
    pub gateway: GatewayKind,
    /// Gateway API base URL
    pub api_base: Url,
    /// Gateway secret key (server-side only)
    pub secret_key: Option<SecretString>,
    /// Shared secret for webhook signatures
    pub webhook_secret: Option<SecretString>,
    /// The single currency the store charges in
    pub currency: CurrencyCode,
    /// Timeout for each gateway call
    pub timeout: Duration,
}

impl std::fmt::Debug for PaymentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |s: &Option<SecretString>| s.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("PaymentConfig")
            .field("gateway", &self.gateway)
            .field("api_base", &self.api_base.as_str())
            .field("secret_key", &redact(&self.secret_key))
            .field("webhook_secret", &redact(&self.webhook_secret))
            .field("currency", &self.currency)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Cart lifetime and checkout timing.
#[derive(Debug, Clone, Copy)]
pub struct CartConfig {
    /// How long a guest cart lives after its last change
    pub guest_ttl: chrono::Duration,
    /// How long an unpaid checkout stays open
    pub intent_ttl: chrono::Duration,
    /// How often expired guest carts are swept
    pub reaper_interval: Duration,
}

impl Default for CartConfig {
    fn default() -> Self {
        Self {
            guest_ttl: chrono::Duration::hours(24),
            intent_ttl: chrono::Duration::hours(24),
            reaper_interval: Duration::from_secs(3600),
        }
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`StorefrontConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let database_url = env
            .get("STOREFRONT_DATABASE_URL")
            .or_else(|| env.get("DATABASE_URL"))
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingEnvVar("STOREFRONT_DATABASE_URL".to_string()))?;
        let host = env.parse_or("STOREFRONT_HOST", "127.0.0.1".parse::<IpAddr>().ok())?;
        let port = env.parse_or("STOREFRONT_PORT", Some(3000_u16))?;
        let base_url = env.required("STOREFRONT_BASE_URL")?;

        let payment = PaymentConfig::from_env(&env)?;
        let cart = CartConfig::from_env(&env)?;

        Ok(Self {
            database_url,
            host,
            port,
            base_url,
            payment,
            cart,
            sentry_dsn: env.get("SENTRY_DSN"),
            sentry_environment: env.get("SENTRY_ENVIRONMENT"),
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl PaymentConfig {
    fn from_env<F: Fn(&str) -> Option<String>>(env: &Env<F>) -> Result<Self, ConfigError> {
        let gateway: GatewayKind = env.parse_or("PAYMENT_GATEWAY", Some(GatewayKind::Http))?;
        let api_base = env.parse_or("PAYMENT_API_BASE", Url::parse("https://api.stripe.com").ok())?;
        let secret_key = match gateway {
            GatewayKind::Http => Some(env.validated_secret("PAYMENT_SECRET_KEY")?),
            GatewayKind::Fake => None,
        };
        let webhook_secret = if env.get("PAYMENT_WEBHOOK_SECRET").is_some() {
            Some(env.validated_secret("PAYMENT_WEBHOOK_SECRET")?)
        } else {
            None
        };
        let currency = env.parse_or("PAYMENT_CURRENCY", Some(CurrencyCode::Usd))?;
        let timeout_secs: u64 = env.parse_or("PAYMENT_TIMEOUT_SECS", Some(10))?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "PAYMENT_TIMEOUT_SECS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            gateway,
            api_base,
            secret_key,
            webhook_secret,
            currency,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

impl CartConfig {
    fn from_env<F: Fn(&str) -> Option<String>>(env: &Env<F>) -> Result<Self, ConfigError> {
        let guest_ttl_hours: u32 = env.parse_or("CART_GUEST_TTL_HOURS", Some(24))?;
        let intent_ttl_hours: u32 = env.parse_or("CHECKOUT_INTENT_TTL_HOURS", Some(24))?;
        let reaper_secs: u64 = env.parse_or("REAPER_INTERVAL_SECS", Some(3600))?;
        if reaper_secs == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "REAPER_INTERVAL_SECS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            guest_ttl: chrono::Duration::hours(i64::from(guest_ttl_hours)),
            intent_ttl: chrono::Duration::hours(i64::from(intent_ttl_hours)),
            reaper_interval: Duration::from_secs(reaper_secs),
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Variable lookup with the parsing helpers shared by every section.
struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    /// Get an optional variable; empty values count as unset.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    /// Get a required variable.
    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.get(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    /// Parse a variable, falling back to `default` when unset.
    fn parse_or<T>(&self, key: &str, default: Option<T>) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string())),
            None => default.ok_or_else(|| ConfigError::MissingEnvVar(key.to_string())),
        }
    }

    /// Load and validate a secret.
    fn validated_secret(&self, key: &str) -> Result<SecretString, ConfigError> {
        let value = self.required(key)?;
        validate_secret_strength(&value, key)?;
        Ok(SecretString::from(value))
    }
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.chars().count() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    const STRONG_KEY: &str = "sk_test_4eC39HqLyjWDarjtT1zdp7dc";

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn base_vars() -> Vec<(&'static str, &'static str)> {
        vec![
            ("STOREFRONT_DATABASE_URL", "postgres://localhost/larder"),
            ("STOREFRONT_BASE_URL", "http://localhost:3000"),
            ("PAYMENT_SECRET_KEY", STRONG_KEY),
        ]
    }

    #[test]
    fn test_defaults() {
        let config = StorefrontConfig::from_lookup(lookup(&base_vars())).unwrap();
        assert_eq!(config.socket_addr().to_string(), "127.0.0.1:3000");
        assert_eq!(config.payment.gateway, GatewayKind::Http);
        assert_eq!(config.payment.currency, CurrencyCode::Usd);
        assert_eq!(config.payment.timeout, Duration::from_secs(10));
        assert_eq!(config.payment.api_base.as_str(), "https://api.stripe.com/");
        assert!(config.payment.webhook_secret.is_none());
        assert_eq!(config.cart.guest_ttl, chrono::Duration::hours(24));
        assert_eq!(config.cart.reaper_interval, Duration::from_secs(3600));
    }

    #[test]
    fn test_database_url_fallback() {
        let vars = [
            ("DATABASE_URL", "postgres://fly/larder"),
            ("STOREFRONT_BASE_URL", "http://localhost:3000"),
            ("PAYMENT_GATEWAY", "fake"),
        ];
        let config = StorefrontConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.database_url.expose_secret(), "postgres://fly/larder");
    }

    #[test]
    fn test_fake_gateway_needs_no_key() {
        let vars = [
            ("STOREFRONT_DATABASE_URL", "postgres://localhost/larder"),
            ("STOREFRONT_BASE_URL", "http://localhost:3000"),
            ("PAYMENT_GATEWAY", "fake"),
        ];
        let config = StorefrontConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.payment.gateway, GatewayKind::Fake);
        assert!(config.payment.secret_key.is_none());
    }

    #[test]
    fn test_http_gateway_requires_key() {
        let vars = [
            ("STOREFRONT_DATABASE_URL", "postgres://localhost/larder"),
            ("STOREFRONT_BASE_URL", "http://localhost:3000"),
        ];
        let err = StorefrontConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "PAYMENT_SECRET_KEY"));
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let mut vars = base_vars();
        vars.push(("STOREFRONT_PORT", "not-a-port"));
        let err = StorefrontConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(ref k, _) if k == "STOREFRONT_PORT"));

        let mut vars = base_vars();
        vars.push(("PAYMENT_CURRENCY", "doubloons"));
        let err = StorefrontConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(ref k, _) if k == "PAYMENT_CURRENCY"));

        let mut vars = base_vars();
        vars.push(("REAPER_INTERVAL_SECS", "0"));
        assert!(StorefrontConfig::from_lookup(lookup(&vars)).is_err());
    }

    #[test]
    fn test_placeholder_key_rejected() {
        let vars = [
            ("STOREFRONT_DATABASE_URL", "postgres://localhost/larder"),
            ("STOREFRONT_BASE_URL", "http://localhost:3000"),
            ("PAYMENT_SECRET_KEY", "your-stripe-key-here"),
        ];
        let err = StorefrontConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::InsecureSecret(_, _)));
    }

    #[test]
    fn test_shannon_entropy_empty() {
        assert!((shannon_entropy("") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shannon_entropy_two_chars() {
        let entropy = shannon_entropy("ab");
        assert!((entropy - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_validate_secret_strength_low_entropy() {
        let result = validate_secret_strength("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "TEST_VAR");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_payment_config_debug_redacts_secrets() {
        let mut vars = base_vars();
        vars.push(("PAYMENT_WEBHOOK_SECRET", "whsec_9fK2LmQ8xZ4vB7nR1tY6"));
        let config = StorefrontConfig::from_lookup(lookup(&vars)).unwrap();

        let debug_output = format!("{:?}", config.payment);
        assert!(debug_output.contains("api.stripe.com"));
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains(STRONG_KEY));
        assert!(!debug_output.contains("whsec_9fK2"));
    }
}
