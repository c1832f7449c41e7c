//! In-process payment gateway.
//!
//! Intents are kept in memory. A created intent reports `Succeeded` when
//! retrieved unless a different status was set for it, which stands in for
//! the customer completing payment client-side.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use rand::distr::Alphanumeric;
use tokio::sync::Mutex;

use super::{CreateIntent, GatewayError, IntentStatus, PaymentGateway, PaymentIntent};

/// Failure to inject into the next `create_intent` call.
#[derive(Debug, Clone)]
pub enum FakeFailure {
    /// Sleep this long before answering.
    Delay(Duration),
    /// Answer with `GatewayError::Timeout`.
    Timeout,
    /// Answer with a gateway API error.
    Declined(String),
    /// Create the intent, then answer with `GatewayError::Timeout`.
    LostResponse,
}

#[derive(Debug, Default)]
struct FakeState {
    intents: HashMap<String, PaymentIntent>,
    overrides: HashMap<String, IntentStatus>,
    /// Idempotency key to the intent it created.
    keys: HashMap<String, String>,
    next_failure: Option<FakeFailure>,
}

/// Gateway that never leaves the process.
#[derive(Debug, Clone, Default)]
pub struct FakeGateway {
    state: Arc<Mutex<FakeState>>,
    created: Arc<AtomicU64>,
    retrieved: Arc<AtomicU64>,
}

impl FakeGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `create_intent` call fail.
    pub async fn fail_next_create(&self, failure: FakeFailure) {
        self.state.lock().await.next_failure = Some(failure);
    }

    /// Report `status` for `intent_id` from now on.
    pub async fn set_status(&self, intent_id: &str, status: IntentStatus) {
        self.state
            .lock()
            .await
            .overrides
            .insert(intent_id.to_owned(), status);
    }

    /// Number of intents created so far.
    #[must_use]
    pub fn created_count(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    /// Number of `retrieve_intent` calls so far.
    #[must_use]
    pub fn retrieved_count(&self) -> u64 {
        self.retrieved.load(Ordering::SeqCst)
    }
}

fn random_suffix(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_intent(&self, request: &CreateIntent) -> Result<PaymentIntent, GatewayError> {
        let failure = self.state.lock().await.next_failure.take();
        let lose_response = match failure {
            Some(FakeFailure::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                false
            }
            Some(FakeFailure::Timeout) => return Err(GatewayError::Timeout),
            Some(FakeFailure::Declined(message)) => {
                return Err(GatewayError::Api {
                    status: 402,
                    message,
                });
            }
            Some(FakeFailure::LostResponse) => true,
            None => false,
        };

        let mut state = self.state.lock().await;
        let known = request
            .idempotency_key
            .as_ref()
            .and_then(|key| state.keys.get(key))
            .and_then(|id| state.intents.get(id));
        if let Some(intent) = known {
            return Ok(intent.clone());
        }

        let id = format!("pi_fake_{}", random_suffix(16));
        let intent = PaymentIntent {
            client_secret: format!("{id}_secret_{}", random_suffix(12)),
            id,
            amount_minor: request.amount_minor,
            currency: request.currency,
            status: IntentStatus::RequiresPaymentMethod,
        };
        if let Some(key) = &request.idempotency_key {
            state.keys.insert(key.clone(), intent.id.clone());
        }
        state.intents.insert(intent.id.clone(), intent.clone());
        self.created.fetch_add(1, Ordering::SeqCst);
        if lose_response {
            return Err(GatewayError::Timeout);
        }
        Ok(intent)
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError> {
        self.retrieved.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().await;
        let mut intent = state
            .intents
            .get(intent_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(intent_id.to_owned()))?;
        intent.status = state
            .overrides
            .get(intent_id)
            .copied()
            .unwrap_or(IntentStatus::Succeeded);
        Ok(intent)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use larder_core::CurrencyCode;

    use super::*;

    fn request() -> CreateIntent {
        CreateIntent {
            amount_minor: 4500,
            currency: CurrencyCode::Usd,
            metadata: BTreeMap::new(),
            idempotency_key: None,
        }
    }

    #[tokio::test]
    async fn test_created_intents_succeed_on_retrieve() {
        let gateway = FakeGateway::new();
        let intent = gateway.create_intent(&request()).await.unwrap();
        assert_eq!(intent.status, IntentStatus::RequiresPaymentMethod);
        assert!(intent.client_secret.starts_with(&intent.id));

        let fetched = gateway.retrieve_intent(&intent.id).await.unwrap();
        assert_eq!(fetched.status, IntentStatus::Succeeded);
        assert_eq!(fetched.amount_minor, 4500);
    }

    #[tokio::test]
    async fn test_status_override_and_unknown_intent() {
        let gateway = FakeGateway::new();
        let intent = gateway.create_intent(&request()).await.unwrap();
        gateway.set_status(&intent.id, IntentStatus::Canceled).await;
        let fetched = gateway.retrieve_intent(&intent.id).await.unwrap();
        assert_eq!(fetched.status, IntentStatus::Canceled);

        assert!(matches!(
            gateway.retrieve_intent("pi_missing").await,
            Err(GatewayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_injected_failure_applies_once() {
        let gateway = FakeGateway::new();
        gateway.fail_next_create(FakeFailure::Timeout).await;
        assert!(matches!(
            gateway.create_intent(&request()).await,
            Err(GatewayError::Timeout)
        ));
        assert!(gateway.create_intent(&request()).await.is_ok());
        assert_eq!(gateway.created_count(), 1);
    }

    #[tokio::test]
    async fn test_same_key_returns_same_intent() {
        let gateway = FakeGateway::new();
        let keyed = CreateIntent {
            idempotency_key: Some("checkout-1-abc".to_owned()),
            ..request()
        };

        gateway.fail_next_create(FakeFailure::LostResponse).await;
        assert!(matches!(
            gateway.create_intent(&keyed).await,
            Err(GatewayError::Timeout)
        ));
        let first = gateway.create_intent(&keyed).await.unwrap();
        let second = gateway.create_intent(&keyed).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.client_secret, second.client_secret);
        assert_eq!(gateway.created_count(), 1);

        // Unkeyed requests always create.
        let a = gateway.create_intent(&request()).await.unwrap();
        let b = gateway.create_intent(&request()).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(gateway.created_count(), 3);
    }
}
