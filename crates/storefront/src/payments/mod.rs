//! Payment gateway boundary.
//!
//! The engine needs two calls from a gateway: create an intent for an amount
//! and look an intent up again to see whether it succeeded. Everything else
//! (capture, 3-D Secure, refunds) happens between the client and the gateway.
//!
//! # Implementations
//!
//! - [`HttpGateway`] - Stripe-compatible REST API over `reqwest`
//! - [`FakeGateway`] - In-process gateway for tests and local development

mod fake;
mod http;
pub mod webhook;

pub use fake::{FakeFailure, FakeGateway};
pub use http::HttpGateway;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use larder_core::{CurrencyCode, MoneyError};

use crate::config::{GatewayKind, PaymentConfig};

/// Errors that can occur when talking to the payment gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The gateway did not answer in time.
    #[error("payment gateway timed out")]
    Timeout,

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The gateway rejected the request.
    #[error("gateway returned {status}: {message}")]
    Api { status: u16, message: String },

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Intent does not exist at the gateway.
    #[error("payment intent not found: {0}")]
    NotFound(String),

    /// Amount cannot be charged.
    #[error("invalid amount: {0}")]
    InvalidAmount(#[from] MoneyError),

    /// The HTTP gateway was selected without a secret key.
    #[error("payment secret key is not configured")]
    MissingSecretKey,
}

/// Intent status as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Succeeded,
    Canceled,
    #[serde(alias = "payment_failed")]
    Failed,
}

impl IntentStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RequiresPaymentMethod => "requires_payment_method",
            Self::RequiresConfirmation => "requires_confirmation",
            Self::RequiresAction => "requires_action",
            Self::Processing => "processing",
            Self::RequiresCapture => "requires_capture",
            Self::Succeeded => "succeeded",
            Self::Canceled => "canceled",
            Self::Failed => "failed",
        }
    }

    /// The intent can never succeed.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Canceled | Self::Failed)
    }
}

impl std::fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for creating an intent.
#[derive(Debug, Clone)]
pub struct CreateIntent {
    /// Amount in minor units (cents).
    pub amount_minor: i64,
    pub currency: CurrencyCode,
    /// Free-form metadata echoed back by the gateway (e.g. `cart_id`).
    pub metadata: BTreeMap<String, String>,
    /// Sent as the gateway idempotency key when present.
    pub idempotency_key: Option<String>,
}

/// A payment intent as the engine sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
    pub amount_minor: i64,
    pub currency: CurrencyCode,
    pub status: IntentStatus,
}

/// A payment gateway able to create and retrieve intents.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a new payment intent.
    async fn create_intent(&self, request: &CreateIntent) -> Result<PaymentIntent, GatewayError>;

    /// Fetch the current state of an intent.
    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError>;
}

/// Build the gateway selected in configuration.
///
/// # Errors
///
/// Returns `GatewayError::MissingSecretKey` if the HTTP gateway has no key,
/// or `GatewayError::Http` if its client cannot be built.
pub fn from_config(config: &PaymentConfig) -> Result<Arc<dyn PaymentGateway>, GatewayError> {
    match config.gateway {
        GatewayKind::Http => {
            let secret_key = config
                .secret_key
                .clone()
                .ok_or(GatewayError::MissingSecretKey)?;
            let gateway = HttpGateway::new(config.api_base.clone(), secret_key, config.timeout)?;
            Ok(Arc::new(gateway))
        }
        GatewayKind::Fake => Ok(Arc::new(FakeGateway::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_status_wire_names() {
        let status: Result<IntentStatus, _> = serde_json::from_str("\"requires_payment_method\"");
        assert_eq!(status.ok(), Some(IntentStatus::RequiresPaymentMethod));
        assert_eq!(IntentStatus::Succeeded.to_string(), "succeeded");
        assert!(IntentStatus::Canceled.is_failure());
        assert!(!IntentStatus::Processing.is_failure());
    }
}
