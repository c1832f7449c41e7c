//! Application state shared across handlers.

use std::sync::Arc;

use crate::config::StorefrontConfig;
use crate::db::Store;
use crate::payments::PaymentGateway;
use crate::payments::webhook::WebhookVerifier;
use crate::services::{
    CartIdentityResolver, CartStore, CheckoutOrchestrator, CheckoutSettings, ExpiryReaper,
    StockLedger,
};

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to the
/// engine services, all wired to the same store and stock ledger.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    store: Arc<dyn Store>,
    stock: StockLedger,
    carts: CartStore,
    identity: CartIdentityResolver,
    checkout: CheckoutOrchestrator,
    webhook: Option<WebhookVerifier>,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Arguments
    ///
    /// * `config` - Storefront configuration
    /// * `store` - Storage backend
    /// * `gateway` - Payment gateway
    #[must_use]
    pub fn new(
        config: StorefrontConfig,
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let stock = StockLedger::default();
        let guest_ttl = config.cart.guest_ttl;

        let carts = CartStore::new(Arc::clone(&store), stock.clone(), guest_ttl);
        let identity = CartIdentityResolver::new(Arc::clone(&store), stock.clone(), guest_ttl);
        let checkout = CheckoutOrchestrator::new(
            Arc::clone(&store),
            gateway,
            stock.clone(),
            CheckoutSettings {
                currency: config.payment.currency,
                gateway_timeout: config.payment.timeout,
                intent_ttl: config.cart.intent_ttl,
            },
        );
        let webhook = config.payment.webhook_secret.clone().map(WebhookVerifier::new);

        Self {
            inner: Arc::new(AppStateInner {
                config,
                store,
                stock,
                carts,
                identity,
                checkout,
                webhook,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    #[must_use]
    pub fn stock(&self) -> &StockLedger {
        &self.inner.stock
    }

    #[must_use]
    pub fn carts(&self) -> &CartStore {
        &self.inner.carts
    }

    #[must_use]
    pub fn identity(&self) -> &CartIdentityResolver {
        &self.inner.identity
    }

    #[must_use]
    pub fn checkout(&self) -> &CheckoutOrchestrator {
        &self.inner.checkout
    }

    /// Webhook verifier, if a webhook secret is configured.
    #[must_use]
    pub fn webhook(&self) -> Option<&WebhookVerifier> {
        self.inner.webhook.as_ref()
    }

    /// A reaper for this state's store, on the configured interval.
    #[must_use]
    pub fn reaper(&self) -> ExpiryReaper {
        ExpiryReaper::new(
            Arc::clone(&self.inner.store),
            self.inner.config.cart.reaper_interval,
        )
    }
}
