//! Gateway webhook verification and payload parsing.
//!
//! The gateway signs each delivery with HMAC-SHA256 over `"{t}.{body}"` and
//! sends `Larder-Signature: t=<unix seconds>,v1=<hex digest>`. Deliveries
//! older than the tolerance are rejected to stop replays.

use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

use super::IntentStatus;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "larder-signature";

/// Maximum age of a delivery, in seconds.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Event type that drives payment confirmation.
pub const PAYMENT_SUCCEEDED: &str = "payment_intent.succeeded";

/// Errors that can occur when verifying a webhook delivery.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("missing signature header")]
    MissingSignature,

    #[error("malformed signature header")]
    MalformedHeader,

    #[error("signature timestamp outside tolerance")]
    Expired,

    #[error("signature mismatch")]
    Mismatch,

    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Verifies webhook signatures with a shared secret.
pub struct WebhookVerifier {
    secret: SecretString,
    tolerance_secs: i64,
}

impl WebhookVerifier {
    #[must_use]
    pub const fn new(secret: SecretString) -> Self {
        Self {
            secret,
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }

    /// Check `header` against `body` at time `now` (unix seconds).
    ///
    /// # Errors
    ///
    /// Returns a [`WebhookError`] describing why the delivery was rejected.
    pub fn verify(&self, header: &str, body: &[u8], now: i64) -> Result<(), WebhookError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => {
                    timestamp = Some(
                        value
                            .parse::<i64>()
                            .map_err(|_| WebhookError::MalformedHeader)?,
                    );
                }
                Some(("v1", value)) => signatures.push(value),
                _ => {}
            }
        }
        let timestamp = timestamp.ok_or(WebhookError::MalformedHeader)?;
        if signatures.is_empty() {
            return Err(WebhookError::MalformedHeader);
        }
        if (now - timestamp).abs() > self.tolerance_secs {
            return Err(WebhookError::Expired);
        }

        // Any v1 entry may match; gateways send several during key rotation.
        let matched = signatures.iter().any(|signature| {
            let Ok(expected) = hex::decode(signature) else {
                return false;
            };
            let Ok(mut mac) = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            else {
                return false;
            };
            mac.update(timestamp.to_string().as_bytes());
            mac.update(b".");
            mac.update(body);
            mac.verify_slice(&expected).is_ok()
        });

        if matched {
            Ok(())
        } else {
            Err(WebhookError::Mismatch)
        }
    }
}

/// Build a signature header for `body`, as the gateway would.
#[must_use]
pub fn sign(secret: &str, timestamp: i64, body: &[u8]) -> String {
    let digest = HmacSha256::new_from_slice(secret.as_bytes()).map_or_else(
        |_| String::new(),
        |mut mac| {
            mac.update(timestamp.to_string().as_bytes());
            mac.update(b".");
            mac.update(body);
            hex::encode(mac.finalize().into_bytes())
        },
    );
    format!("t={timestamp},v1={digest}")
}

/// A webhook delivery.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookData {
    pub object: IntentObject,
}

/// The intent embedded in a payment event.
#[derive(Debug, Clone, Deserialize)]
pub struct IntentObject {
    pub id: String,
    pub status: Option<IntentStatus>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl WebhookEvent {
    /// Parse a delivery body.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::Payload` for bodies that are not events.
    pub fn parse(body: &[u8]) -> Result<Self, WebhookError> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Id of the payment intent the event is about.
    #[must_use]
    pub fn intent_id(&self) -> &str {
        &self.data.object.id
    }

    #[must_use]
    pub fn is_payment_succeeded(&self) -> bool {
        self.event_type == PAYMENT_SUCCEEDED
    }
}
