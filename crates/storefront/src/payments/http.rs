//! Stripe-compatible payment gateway client.
//!
//! Requests are form-encoded and authenticated with the secret key as a
//! bearer token, which is what Stripe's `/v1/payment_intents` endpoints
//! expect.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use larder_core::CurrencyCode;

use super::{CreateIntent, GatewayError, IntentStatus, PaymentGateway, PaymentIntent};

/// Client for a Stripe-compatible payment intents API.
#[derive(Clone)]
pub struct HttpGateway {
    inner: Arc<HttpGatewayInner>,
}

struct HttpGatewayInner {
    client: reqwest::Client,
    base_url: Url,
    secret_key: SecretString,
}

#[derive(Debug, Deserialize)]
struct IntentResponse {
    id: String,
    client_secret: Option<String>,
    amount: i64,
    currency: String,
    status: IntentStatus,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    code: Option<String>,
}

impl HttpGateway {
    /// Create a new gateway client.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Http` if the HTTP client cannot be built.
    pub fn new(
        base_url: Url,
        secret_key: SecretString,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            inner: Arc::new(HttpGatewayInner {
                client,
                base_url,
                secret_key,
            }),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, GatewayError> {
        self.inner.base_url.join(path).map_err(|e| GatewayError::Api {
            status: 0,
            message: format!("invalid gateway URL: {e}"),
        })
    }

    async fn parse(&self, response: reqwest::Response) -> Result<PaymentIntent, GatewayError> {
        let status = response.status();
        let body = response.text().await.map_err(classify)?;

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(error_message(&body)));
        }
        if !status.is_success() {
            tracing::error!(
                status = %status,
                body = %body.chars().take(500).collect::<String>(),
                "Payment gateway returned non-success status"
            );
            return Err(GatewayError::Api {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        let intent: IntentResponse = serde_json::from_str(&body)?;
        let currency = intent
            .currency
            .parse::<CurrencyCode>()
            .map_err(|e| GatewayError::Api {
                status: status.as_u16(),
                message: e.to_string(),
            })?;

        Ok(PaymentIntent {
            id: intent.id,
            client_secret: intent.client_secret.unwrap_or_default(),
            amount_minor: intent.amount,
            currency,
            status: intent.status,
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    #[instrument(skip(self, request), fields(amount = request.amount_minor, currency = %request.currency))]
    async fn create_intent(&self, request: &CreateIntent) -> Result<PaymentIntent, GatewayError> {
        let mut form: Vec<(String, String)> = vec![
            ("amount".to_owned(), request.amount_minor.to_string()),
            ("currency".to_owned(), request.currency.as_str().to_owned()),
            (
                "automatic_payment_methods[enabled]".to_owned(),
                "true".to_owned(),
            ),
        ];
        form.extend(
            request
                .metadata
                .iter()
                .map(|(k, v)| (format!("metadata[{k}]"), v.clone())),
        );

        let mut builder = self
            .inner
            .client
            .post(self.endpoint("/v1/payment_intents")?)
            .bearer_auth(self.inner.secret_key.expose_secret())
            .form(&form);
        if let Some(key) = &request.idempotency_key {
            builder = builder.header("Idempotency-Key", key);
        }

        let response = builder.send().await.map_err(classify)?;
        let intent = self.parse(response).await?;
        debug!(intent_id = %intent.id, "Created payment intent");
        Ok(intent)
    }

    #[instrument(skip(self))]
    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError> {
        let path = format!("/v1/payment_intents/{intent_id}");
        let response = self
            .inner
            .client
            .get(self.endpoint(&path)?)
            .bearer_auth(self.inner.secret_key.expose_secret())
            .send()
            .await
            .map_err(classify)?;
        self.parse(response).await
    }
}

fn classify(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Http(e)
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body).map_or_else(
        |_| body.chars().take(200).collect(),
        |envelope| {
            envelope
                .error
                .message
                .or(envelope.error.code)
                .unwrap_or_else(|| "unknown gateway error".to_owned())
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_prefers_gateway_message() {
        let body = r#"{"error":{"message":"No such payment_intent","code":"resource_missing"}}"#;
        assert_eq!(error_message(body), "No such payment_intent");

        let body = r#"{"error":{"code":"card_declined"}}"#;
        assert_eq!(error_message(body), "card_declined");

        assert_eq!(error_message("Bad Gateway"), "Bad Gateway");
    }

    #[test]
    fn test_intent_response_parses() {
        let body = r#"{
            "id": "pi_123",
            "object": "payment_intent",
            "amount": 4500,
            "currency": "usd",
            "client_secret": "pi_123_secret_abc",
            "status": "requires_payment_method"
        }"#;
        let parsed: Result<IntentResponse, _> = serde_json::from_str(body);
        assert!(parsed.is_ok());
        if let Ok(intent) = parsed {
            assert_eq!(intent.amount, 4500);
            assert_eq!(intent.status, IntentStatus::RequiresPaymentMethod);
        }
    }
}
