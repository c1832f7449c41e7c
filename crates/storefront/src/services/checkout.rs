//! Two-phase checkout.
//!
//! 1. [`CheckoutOrchestrator::create_intent`] re-validates the cart, asks the
//!    gateway for a payment intent and records a pending order bound to it.
//! 2. [`CheckoutOrchestrator::confirm_payment`] checks with the gateway that
//!    the intent succeeded, then in one transaction decrements stock, marks
//!    the order paid and clears the cart.
//!
//! No transaction is open while the gateway is being called.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use larder_core::money::to_minor_units;
use larder_core::{
    Address, AddressError, AddressInput, CartId, CurrencyCode, MoneyError, OrderId, OrderStatus,
    PaymentStatus, ProductId, VariationId,
};

use super::orders::{CartSnapshot, OrderError, OrderMaterializer};
use super::stock::{LowStockEvent, StockError, StockLedger};
use crate::db::{RepositoryError, Store, StoreTx};
use crate::models::{
    Cart, CheckoutState, IdentityContext, NewOrderItem, Order, OrderItem, Shopper, StockKey,
};
use crate::payments::{CreateIntent, GatewayError, IntentStatus, PaymentGateway, PaymentIntent};

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error(transparent)]
    Validation(#[from] AddressError),

    /// Missing, or not owned by the caller.
    #[error("cart not found")]
    CartNotFound,

    #[error("cart is empty")]
    EmptyCart,

    #[error("product {0} is no longer available")]
    ProductUnavailable(ProductId),

    #[error("only {available} of product {product_id} in stock, {requested} requested")]
    OutOfStock {
        product_id: ProductId,
        variation_id: Option<VariationId>,
        available: u32,
        requested: u32,
    },

    #[error("order not found")]
    OrderNotFound,

    #[error("payment intent does not belong to this order")]
    PaymentIntentMismatch,

    #[error("order is {0} and cannot be paid")]
    OrderNotPayable(OrderStatus),

    #[error("payment has not completed (status: {status})")]
    PaymentNotCompleted { status: IntentStatus },

    /// Paid, but stock ran out before the order could be fulfilled.
    #[error("product {product_id} sold out while order {order_id} was being paid")]
    StockExhausted {
        order_id: OrderId,
        product_id: ProductId,
        variation_id: Option<VariationId>,
    },

    #[error("payment gateway timed out")]
    GatewayTimeout,

    #[error("payment gateway error: {0}")]
    Gateway(GatewayError),

    #[error("invalid amount: {0}")]
    Amount(#[from] MoneyError),

    #[error("order error: {0}")]
    Order(#[from] OrderError),

    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),
}

impl CheckoutError {
    /// Stable machine-readable kind, used as the API `error` field.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::CartNotFound => "cart_not_found",
            Self::EmptyCart => "empty_cart",
            Self::ProductUnavailable(_) => "product_unavailable",
            Self::OutOfStock { .. } => "out_of_stock",
            Self::OrderNotFound => "order_not_found",
            Self::PaymentIntentMismatch => "payment_intent_mismatch",
            Self::OrderNotPayable(_) => "order_not_payable",
            Self::PaymentNotCompleted { .. } => "payment_not_completed",
            Self::StockExhausted { .. } => "stock_exhausted",
            Self::GatewayTimeout => "gateway_timeout",
            Self::Gateway(_) => "gateway_error",
            Self::Amount(_) | Self::Order(_) | Self::Repository(_) => "server_error",
        }
    }
}

impl From<GatewayError> for CheckoutError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Timeout => Self::GatewayTimeout,
            other => Self::Gateway(other),
        }
    }
}

impl From<StockError> for CheckoutError {
    fn from(e: StockError) -> Self {
        match e {
            StockError::UnknownSku(key) => Self::Repository(RepositoryError::DataCorruption(
                format!("no stock counter for {key}"),
            )),
            StockError::Repository(e) => Self::Repository(e),
        }
    }
}

/// Settings the orchestrator needs from configuration.
#[derive(Debug, Clone, Copy)]
pub struct CheckoutSettings {
    pub currency: CurrencyCode,
    pub gateway_timeout: Duration,
    /// Pending orders older than this report [`CheckoutState::Expired`].
    pub intent_ttl: chrono::Duration,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            currency: CurrencyCode::Usd,
            gateway_timeout: Duration::from_secs(10),
            intent_ttl: chrono::Duration::hours(24),
        }
    }
}

/// Result of [`CheckoutOrchestrator::create_intent`].
#[derive(Debug, Clone, Serialize)]
pub struct IntentCreated {
    pub payment_intent_id: String,
    pub client_secret: String,
    pub amount: Decimal,
    pub currency: CurrencyCode,
    pub order: Order,
}

/// Runs the checkout protocol.
#[derive(Clone)]
pub struct CheckoutOrchestrator {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    stock: StockLedger,
    orders: OrderMaterializer,
    settings: CheckoutSettings,
}

impl CheckoutOrchestrator {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        stock: StockLedger,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            store,
            gateway,
            stock,
            orders: OrderMaterializer::new(),
            settings,
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &CheckoutSettings {
        &self.settings
    }

    /// Start paying for a cart.
    ///
    /// The cart is left untouched; it is only cleared once payment is
    /// confirmed.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::Validation` for bad addresses,
    /// `CartNotFound`/`EmptyCart`/`ProductUnavailable`/`OutOfStock` when the
    /// cart cannot be bought, and `GatewayTimeout`/`Gateway` when the gateway
    /// fails. Nothing is written unless the gateway created an intent.
    #[instrument(skip(self, identity, shipping, billing), fields(cart_id = %cart_id))]
    pub async fn create_intent(
        &self,
        identity: &IdentityContext,
        cart_id: CartId,
        shipping: &AddressInput,
        billing: &AddressInput,
    ) -> Result<IntentCreated, CheckoutError> {
        let (shipping, billing) = validate_addresses(shipping, billing)?;

        let (snapshot, key) = {
            let mut tx = self.store.begin().await?;
            let cart = tx
                .lock_cart(cart_id)
                .await?
                .filter(|cart| owned_by(cart, identity))
                .ok_or(CheckoutError::CartNotFound)?;
            if cart.is_empty() {
                return Err(CheckoutError::EmptyCart);
            }
            let lines = self.snapshot_lines(tx.as_mut(), &cart).await?;
            tx.commit().await?;
            let key = idempotency_key(&cart, &lines, self.settings.currency, &shipping, &billing);
            (CartSnapshot::new(&cart, lines), key)
        };

        let amount = snapshot.total();
        let request = CreateIntent {
            amount_minor: to_minor_units(amount)?,
            currency: self.settings.currency,
            metadata: BTreeMap::from([("cart_id".to_owned(), cart_id.to_string())]),
            idempotency_key: Some(key),
        };
        let intent = self
            .with_timeout(self.gateway.create_intent(&request))
            .await?;

        // A retry of an earlier attempt gets that attempt's intent back.
        if let Some(order) = self.pending_order_for(&intent.id).await? {
            info!(
                order_id = %order.id,
                payment_intent_id = %intent.id,
                "Payment intent reused"
            );
            return Ok(IntentCreated {
                payment_intent_id: intent.id,
                client_secret: intent.client_secret,
                amount: order.total,
                currency: order.currency,
                order,
            });
        }

        let draft = OrderMaterializer::draft(
            snapshot,
            shipping,
            billing,
            intent.id.clone(),
            self.settings.currency,
        );
        let mut tx = self.store.begin().await?;
        let order = self.orders.persist_pending(tx.as_mut(), &draft).await?;
        tx.commit().await?;

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            payment_intent_id = %intent.id,
            %amount,
            "Payment intent created"
        );

        Ok(IntentCreated {
            payment_intent_id: intent.id,
            client_secret: intent.client_secret,
            amount,
            currency: self.settings.currency,
            order,
        })
    }

    /// Finish paying for an order once the gateway reports success.
    ///
    /// Safe to call any number of times, concurrently included: the first
    /// successful call decrements stock and every call returns the paid
    /// order.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::PaymentNotCompleted` if the intent has not
    /// succeeded, and `StockExhausted` if stock ran out after payment. The
    /// latter leaves the order pending and flagged for manual review.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn confirm_payment(
        &self,
        order_id: OrderId,
        payment_intent_id: &str,
    ) -> Result<Order, CheckoutError> {
        let order = {
            let mut tx = self.store.begin().await?;
            tx.find_order(order_id, false)
                .await?
                .ok_or(CheckoutError::OrderNotFound)?
        };

        if order.is_paid() {
            return Ok(order);
        }
        if order.payment_intent_id != payment_intent_id {
            return Err(CheckoutError::PaymentIntentMismatch);
        }
        if order.status != OrderStatus::Pending {
            return Err(CheckoutError::OrderNotPayable(order.status));
        }

        let intent = self
            .with_timeout(self.gateway.retrieve_intent(payment_intent_id))
            .await?;
        self.check_intent(&order, &intent).await?;

        let mut tx = self.store.begin().await?;
        let order = tx
            .find_order(order_id, true)
            .await?
            .ok_or(CheckoutError::OrderNotFound)?;

        // Another confirmation may have finished while the gateway answered.
        if order.is_paid() {
            return Ok(order);
        }
        if order.status != OrderStatus::Pending {
            return Err(CheckoutError::OrderNotPayable(order.status));
        }

        let mut low_stock: Vec<LowStockEvent> = Vec::new();
        for item in decrement_order(&order.items) {
            let decrement = self
                .stock
                .try_decrement(tx.as_mut(), item.product_id, item.variation_id, item.quantity)
                .await?;
            let Some(decrement) = decrement else {
                drop(tx);
                let err = CheckoutError::StockExhausted {
                    order_id,
                    product_id: item.product_id,
                    variation_id: item.variation_id,
                };
                self.escalate(&order, &err).await;
                return Err(err);
            };
            low_stock.extend(decrement.low_stock);
        }

        let paid = self.orders.finalize_paid(tx.as_mut(), &order).await?;
        tx.commit().await?;
        self.stock.publish(low_stock);

        info!(
            order_number = %paid.order_number,
            total = %paid.total,
            "Payment confirmed"
        );
        Ok(paid)
    }

    /// Confirm the order bound to a payment intent, e.g. from a webhook.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::OrderNotFound` if no order uses the intent,
    /// otherwise as [`Self::confirm_payment`].
    pub async fn confirm_by_intent(&self, payment_intent_id: &str) -> Result<Order, CheckoutError> {
        let order_id = {
            let mut tx = self.store.begin().await?;
            tx.find_order_by_intent(payment_intent_id)
                .await?
                .ok_or(CheckoutError::OrderNotFound)?
        };
        self.confirm_payment(order_id, payment_intent_id).await
    }

    /// An order, if the caller placed it.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::OrderNotFound` for unknown orders and for
    /// orders placed by someone else.
    pub async fn order_for(
        &self,
        order_id: OrderId,
        identity: &IdentityContext,
    ) -> Result<Order, CheckoutError> {
        let mut tx = self.store.begin().await?;
        tx.find_order(order_id, false)
            .await?
            .filter(|order| order.is_visible_to(identity))
            .ok_or(CheckoutError::OrderNotFound)
    }

    #[must_use]
    pub fn state_of(&self, order: &Order) -> CheckoutState {
        order.checkout_state(Utc::now(), self.settings.intent_ttl)
    }

    /// Re-check every line against the catalog and copy it for the order.
    async fn snapshot_lines(
        &self,
        tx: &mut dyn StoreTx,
        cart: &Cart,
    ) -> Result<Vec<NewOrderItem>, CheckoutError> {
        let mut lines = Vec::with_capacity(cart.items.len());
        for item in &cart.items {
            let product = tx
                .product(item.product_id)
                .await?
                .filter(|p| p.is_purchasable())
                .ok_or(CheckoutError::ProductUnavailable(item.product_id))?;

            let (name, sku) = match item.variation_id {
                Some(id) => {
                    let variation = tx
                        .variation(id)
                        .await?
                        .filter(|v| v.product_id == product.id && v.is_active)
                        .ok_or(CheckoutError::ProductUnavailable(item.product_id))?;
                    let options: Vec<&str> =
                        variation.attributes.values().map(String::as_str).collect();
                    let name = if options.is_empty() {
                        product.name.clone()
                    } else {
                        format!("{} ({})", product.name, options.join(" / "))
                    };
                    (name, variation.sku.or_else(|| product.sku.clone()))
                }
                None => (product.name.clone(), product.sku.clone()),
            };

            let available = match self
                .stock
                .available(tx, item.product_id, item.variation_id)
                .await
            {
                Ok(available) => available,
                Err(StockError::UnknownSku(_)) => {
                    return Err(CheckoutError::ProductUnavailable(item.product_id));
                }
                Err(e) => return Err(e.into()),
            };
            if available < item.quantity {
                return Err(CheckoutError::OutOfStock {
                    product_id: item.product_id,
                    variation_id: item.variation_id,
                    available,
                    requested: item.quantity,
                });
            }

            lines.push(CartSnapshot::line(item, name, sku));
        }
        Ok(lines)
    }

    /// The unpaid order already bound to `intent_id`, if any.
    async fn pending_order_for(&self, intent_id: &str) -> Result<Option<Order>, CheckoutError> {
        let mut tx = self.store.begin().await?;
        let Some(order_id) = tx.find_order_by_intent(intent_id).await? else {
            return Ok(None);
        };
        Ok(tx
            .find_order(order_id, false)
            .await?
            .filter(|order| order.status == OrderStatus::Pending && !order.is_paid()))
    }

    /// Reject intents that have not succeeded, recording hard failures.
    async fn check_intent(&self, order: &Order, intent: &PaymentIntent) -> Result<(), CheckoutError> {
        if intent.status == IntentStatus::Succeeded {
            if intent.amount_minor != to_minor_units(order.total)? {
                warn!(
                    intent_amount = intent.amount_minor,
                    order_total = %order.total,
                    "Intent amount does not match order total"
                );
                return Err(CheckoutError::PaymentIntentMismatch);
            }
            return Ok(());
        }

        if intent.status.is_failure() && order.payment_status != PaymentStatus::Failed {
            let mut tx = self.store.begin().await?;
            tx.update_order_status(order.id, order.status, PaymentStatus::Failed, None)
                .await?;
            tx.commit().await?;
            info!(status = %intent.status, "Payment failed at gateway");
        }
        Err(CheckoutError::PaymentNotCompleted {
            status: intent.status,
        })
    }

    /// Money was taken but the order cannot be fulfilled. Flag it for a
    /// person to sort out; refunds are not automatic.
    async fn escalate(&self, order: &Order, err: &CheckoutError) {
        error!(
            order_number = %order.order_number,
            payment_intent_id = %order.payment_intent_id,
            error = %err,
            "Paid order could not be fulfilled"
        );
        sentry::capture_error(err);

        let note = format!("{err}; payment {} needs manual review", order.payment_intent_id);
        let flagged = async {
            let mut tx = self.store.begin().await?;
            tx.flag_order(order.id, &note).await?;
            tx.commit().await
        };
        if let Err(e) = flagged.await {
            error!(error = %e, "Failed to flag order for review");
        }
    }

    async fn with_timeout<T>(
        &self,
        call: impl Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, CheckoutError> {
        match tokio::time::timeout(self.settings.gateway_timeout, call).await {
            Ok(result) => result.map_err(CheckoutError::from),
            Err(_) => Err(CheckoutError::GatewayTimeout),
        }
    }
}

fn owned_by(cart: &Cart, identity: &IdentityContext) -> bool {
    match &cart.owner {
        Shopper::User(id) => identity.user_id == Some(*id),
        Shopper::Guest(token) => {
            identity.user_id.is_none() && identity.session_token.as_ref() == Some(token)
        }
    }
}

/// Gateway idempotency key for a checkout attempt. Stays the same while the
/// cart lines, their prices and both addresses are unchanged.
fn idempotency_key(
    cart: &Cart,
    lines: &[NewOrderItem],
    currency: CurrencyCode,
    shipping: &Address,
    billing: &Address,
) -> String {
    let mut hasher = Sha256::new();
    for (item, line) in cart.items.iter().zip(lines) {
        hasher.update(format!(
            "{}:{}:{}:{}|",
            item.id, item.product_id, line.quantity, line.unit_price
        ));
    }
    hasher.update(currency.as_str());
    for address in [shipping, billing] {
        hasher.update(serde_json::to_vec(address).unwrap_or_default());
    }
    format!("checkout-{}-{}", cart.id, hex::encode(hasher.finalize()))
}

/// Order lines sorted by stock row, so concurrent confirms lock rows in
/// the same order.
fn decrement_order(items: &[OrderItem]) -> Vec<&OrderItem> {
    let mut lines: Vec<&OrderItem> = items.iter().collect();
    lines.sort_by_key(|item| StockKey::resolve(item.product_id, item.variation_id));
    lines
}

/// Validate both addresses, reporting every bad field of either.
fn validate_addresses(
    shipping: &AddressInput,
    billing: &AddressInput,
) -> Result<(Address, Address), AddressError> {
    match (shipping.validate(), billing.validate()) {
        (Ok(shipping), Ok(billing)) => Ok((shipping, billing)),
        (shipping, billing) => {
            let mut errors = AddressError::default();
            if let Err(e) = shipping {
                errors.fields.extend(e.prefixed("shipping_address").fields);
            }
            if let Err(e) = billing {
                errors.fields.extend(e.prefixed("billing_address").fields);
            }
            Err(errors)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::SessionToken;
    use crate::payments::{FakeFailure, FakeGateway};
    use crate::services::fixtures;
    use crate::services::CartStore;

    struct Harness {
        store: MemoryStore,
        gateway: FakeGateway,
        carts: CartStore,
        checkout: CheckoutOrchestrator,
    }

    fn harness(store: MemoryStore) -> Harness {
        let gateway = FakeGateway::new();
        let shared: Arc<dyn Store> = Arc::new(store.clone());
        let stock = StockLedger::default();
        Harness {
            carts: CartStore::new(Arc::clone(&shared), stock.clone(), chrono::Duration::hours(24)),
            checkout: CheckoutOrchestrator::new(
                shared,
                Arc::new(gateway.clone()),
                stock,
                CheckoutSettings {
                    gateway_timeout: Duration::from_millis(200),
                    ..CheckoutSettings::default()
                },
            ),
            store,
            gateway,
        }
    }

    async fn seeded() -> Harness {
        let store = MemoryStore::new();
        fixtures::seed_catalog(&store).await;
        harness(store)
    }

    async fn guest_cart_with(h: &Harness, lines: &[(ProductId, u32)]) -> (IdentityContext, Cart) {
        let cart = fixtures::guest_cart(&h.store).await;
        let identity = IdentityContext::guest(cart.owner.session_token().unwrap().clone());
        for &(product, qty) in lines {
            h.carts.add_item(cart.id, product, None, qty).await.unwrap();
        }
        (identity, h.store.cart(cart.id).await.unwrap())
    }

    async fn intent(h: &Harness, identity: &IdentityContext, cart: &Cart) -> IntentCreated {
        let address = fixtures::address_input();
        h.checkout
            .create_intent(identity, cart.id, &address, &address)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_intent_then_confirm() {
        let h = seeded().await;
        let (identity, cart) =
            guest_cart_with(&h, &[(fixtures::JAR, 3), (fixtures::SPOON, 2)]).await;

        let created = intent(&h, &identity, &cart).await;
        assert_eq!(created.amount, Decimal::new(3900, 2));
        assert_eq!(created.order.status, OrderStatus::Pending);
        assert_eq!(created.order.payment_status, PaymentStatus::Pending);
        assert_eq!(created.order.items.len(), 2);
        assert_eq!(h.checkout.state_of(&created.order), CheckoutState::IntentCreated);
        // Cart is kept until payment succeeds.
        assert_eq!(h.store.cart(cart.id).await.unwrap().item_count(), 5);

        let paid = h
            .checkout
            .confirm_payment(created.order.id, &created.payment_intent_id)
            .await
            .unwrap();
        assert_eq!(paid.status, OrderStatus::Processing);
        assert_eq!(paid.payment_status, PaymentStatus::Paid);
        assert!(paid.paid_at.is_some());
        assert_eq!(h.checkout.state_of(&paid), CheckoutState::ConfirmedSuccess);
        assert_eq!(
            h.store.stock_quantity(StockKey::Product(fixtures::JAR)).await,
            Some(47)
        );
        assert!(h.store.cart(cart.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_confirm_is_idempotent() {
        let h = seeded().await;
        let (identity, cart) = guest_cart_with(&h, &[(fixtures::JAR, 2)]).await;
        let created = intent(&h, &identity, &cart).await;

        let first = h
            .checkout
            .confirm_payment(created.order.id, &created.payment_intent_id)
            .await
            .unwrap();
        let second = h
            .checkout
            .confirm_payment(created.order.id, &created.payment_intent_id)
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.paid_at, second.paid_at);
        assert_eq!(
            h.store.stock_quantity(StockKey::Product(fixtures::JAR)).await,
            Some(48)
        );
    }

    #[tokio::test]
    async fn test_retried_intent_reuses_order() {
        let h = seeded().await;
        let (identity, cart) = guest_cart_with(&h, &[(fixtures::JAR, 2)]).await;
        let address = fixtures::address_input();

        // The gateway created the intent but the answer never arrived.
        h.gateway.fail_next_create(FakeFailure::LostResponse).await;
        let err = h
            .checkout
            .create_intent(&identity, cart.id, &address, &address)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::GatewayTimeout));
        assert!(h.store.orders().await.is_empty());

        let first = intent(&h, &identity, &cart).await;
        let second = intent(&h, &identity, &cart).await;
        assert_eq!(first.payment_intent_id, second.payment_intent_id);
        assert_eq!(first.order.id, second.order.id);
        assert_eq!(second.amount, Decimal::new(2000, 2));
        assert_eq!(h.gateway.created_count(), 1);
        assert_eq!(h.store.orders().await.len(), 1);

        // A changed cart is a new attempt.
        h.carts.add_item(cart.id, fixtures::SPOON, None, 1).await.unwrap();
        let third = intent(&h, &identity, &cart).await;
        assert_ne!(third.payment_intent_id, first.payment_intent_id);
        assert_eq!(third.amount, Decimal::new(2450, 2));
        assert_eq!(h.gateway.created_count(), 2);
        assert_eq!(h.store.orders().await.len(), 2);
    }

    #[tokio::test]
    async fn test_paid_cart_refilled_gets_new_intent() {
        let h = seeded().await;
        let (identity, cart) = guest_cart_with(&h, &[(fixtures::JAR, 1)]).await;
        let first = intent(&h, &identity, &cart).await;
        h.checkout
            .confirm_payment(first.order.id, &first.payment_intent_id)
            .await
            .unwrap();

        h.carts.add_item(cart.id, fixtures::JAR, None, 1).await.unwrap();
        let second = intent(&h, &identity, &cart).await;
        assert_ne!(second.payment_intent_id, first.payment_intent_id);
        assert_ne!(second.order.id, first.order.id);
        assert_eq!(second.order.payment_status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_decrements_follow_stock_row_order() {
        let h = seeded().await;
        let (a_identity, a_cart) =
            guest_cart_with(&h, &[(fixtures::JAR, 1), (fixtures::SPOON, 1)]).await;
        let (b_identity, b_cart) =
            guest_cart_with(&h, &[(fixtures::SPOON, 1), (fixtures::JAR, 1)]).await;
        let a = intent(&h, &a_identity, &a_cart).await;
        let b = intent(&h, &b_identity, &b_cart).await;
        assert_eq!(b.order.items[0].product_id, fixtures::SPOON);

        let keys = |order: &Order| -> Vec<StockKey> {
            decrement_order(&order.items)
                .into_iter()
                .map(|item| StockKey::resolve(item.product_id, item.variation_id))
                .collect()
        };
        assert_eq!(keys(&a.order), keys(&b.order));
        assert_eq!(
            keys(&a.order),
            vec![StockKey::Product(fixtures::JAR), StockKey::Product(fixtures::SPOON)]
        );
    }

    #[tokio::test]
    async fn test_crossed_orders_confirm_concurrently() {
        let h = seeded().await;
        let (a_identity, a_cart) =
            guest_cart_with(&h, &[(fixtures::JAR, 2), (fixtures::SPOON, 1)]).await;
        let (b_identity, b_cart) =
            guest_cart_with(&h, &[(fixtures::SPOON, 3), (fixtures::JAR, 1)]).await;
        let a = intent(&h, &a_identity, &a_cart).await;
        let b = intent(&h, &b_identity, &b_cart).await;

        let confirms: Vec<_> = [a, b]
            .into_iter()
            .map(|created| {
                let checkout = h.checkout.clone();
                tokio::spawn(async move {
                    checkout
                        .confirm_payment(created.order.id, &created.payment_intent_id)
                        .await
                })
            })
            .collect();
        for confirm in confirms {
            assert!(confirm.await.unwrap().unwrap().is_paid());
        }

        assert_eq!(
            h.store.stock_quantity(StockKey::Product(fixtures::JAR)).await,
            Some(47)
        );
        assert_eq!(
            h.store.stock_quantity(StockKey::Product(fixtures::SPOON)).await,
            Some(16)
        );
    }

    #[tokio::test]
    async fn test_rejects_empty_and_foreign_carts() {
        let h = seeded().await;
        let (identity, cart) = guest_cart_with(&h, &[]).await;
        let address = fixtures::address_input();

        let err = h
            .checkout
            .create_intent(&identity, cart.id, &address, &address)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::EmptyCart));

        let stranger = IdentityContext::guest(SessionToken::generate());
        let err = h
            .checkout
            .create_intent(&stranger, cart.id, &address, &address)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::CartNotFound));
        assert_eq!(h.gateway.created_count(), 0);
    }

    #[tokio::test]
    async fn test_address_errors_are_prefixed() {
        let h = seeded().await;
        let (identity, cart) = guest_cart_with(&h, &[(fixtures::JAR, 1)]).await;
        let mut bad = fixtures::address_input();
        bad.country = "USA".to_owned();

        let err = h
            .checkout
            .create_intent(&identity, cart.id, &fixtures::address_input(), &bad)
            .await
            .unwrap_err();
        let CheckoutError::Validation(errors) = err else {
            panic!("expected validation error, got {err:?}");
        };
        assert!(errors.fields.contains_key("billing_address.country"));
        assert!(!errors.fields.keys().any(|k| k.starts_with("shipping_address")));
    }

    #[tokio::test]
    async fn test_stock_rechecked_at_intent() {
        let h = seeded().await;
        let (identity, cart) = guest_cart_with(&h, &[(fixtures::JAR, 4)]).await;
        h.store.set_stock(StockKey::Product(fixtures::JAR), 3).await;

        let address = fixtures::address_input();
        let err = h
            .checkout
            .create_intent(&identity, cart.id, &address, &address)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CheckoutError::OutOfStock {
                available: 3,
                requested: 4,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_gateway_timeout_writes_nothing() {
        let h = seeded().await;
        let (identity, cart) = guest_cart_with(&h, &[(fixtures::JAR, 1)]).await;
        h.gateway
            .fail_next_create(FakeFailure::Delay(Duration::from_secs(5)))
            .await;

        let address = fixtures::address_input();
        let err = h
            .checkout
            .create_intent(&identity, cart.id, &address, &address)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::GatewayTimeout));
        assert!(h.store.orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_declined_create_is_gateway_error() {
        let h = seeded().await;
        let (identity, cart) = guest_cart_with(&h, &[(fixtures::JAR, 1)]).await;
        h.gateway
            .fail_next_create(FakeFailure::Declined("card_declined".to_owned()))
            .await;

        let address = fixtures::address_input();
        let err = h
            .checkout
            .create_intent(&identity, cart.id, &address, &address)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "gateway_error");
    }

    #[tokio::test]
    async fn test_confirm_checks_intent_and_status() {
        let h = seeded().await;
        let (identity, cart) = guest_cart_with(&h, &[(fixtures::JAR, 1)]).await;
        let created = intent(&h, &identity, &cart).await;

        let err = h
            .checkout
            .confirm_payment(created.order.id, "pi_other")
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::PaymentIntentMismatch));

        h.gateway
            .set_status(&created.payment_intent_id, IntentStatus::RequiresAction)
            .await;
        let err = h
            .checkout
            .confirm_payment(created.order.id, &created.payment_intent_id)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CheckoutError::PaymentNotCompleted {
                status: IntentStatus::RequiresAction
            }
        ));

        h.gateway
            .set_status(&created.payment_intent_id, IntentStatus::Canceled)
            .await;
        let err = h
            .checkout
            .confirm_payment(created.order.id, &created.payment_intent_id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "payment_not_completed");
        let order = h.store.order(created.order.id).await.unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Failed);
        assert_eq!(h.checkout.state_of(&order), CheckoutState::ConfirmedFailed);

        let err = h
            .checkout
            .confirm_payment(OrderId::new(9999), &created.payment_intent_id)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::OrderNotFound));
    }

    #[tokio::test]
    async fn test_stock_exhausted_flags_order() {
        let h = seeded().await;
        let (identity, cart) = guest_cart_with(&h, &[(fixtures::JAR, 2)]).await;
        let created = intent(&h, &identity, &cart).await;
        h.store.set_stock(StockKey::Product(fixtures::JAR), 1).await;

        let err = h
            .checkout
            .confirm_payment(created.order.id, &created.payment_intent_id)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::StockExhausted { .. }));

        let order = h.store.order(created.order.id).await.unwrap();
        assert!(order.needs_review);
        assert!(order.review_note.is_some());
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(
            h.store.stock_quantity(StockKey::Product(fixtures::JAR)).await,
            Some(1)
        );
        assert_eq!(h.store.cart(cart.id).await.unwrap().item_count(), 2);
    }

    #[tokio::test]
    async fn test_confirm_by_intent_and_visibility() {
        let h = seeded().await;
        let (identity, cart) = guest_cart_with(&h, &[(fixtures::SPOON, 1)]).await;
        let created = intent(&h, &identity, &cart).await;

        let paid = h
            .checkout
            .confirm_by_intent(&created.payment_intent_id)
            .await
            .unwrap();
        assert!(paid.is_paid());

        let seen = h.checkout.order_for(paid.id, &identity).await.unwrap();
        assert_eq!(seen.id, paid.id);

        let stranger = IdentityContext::guest(SessionToken::generate());
        let err = h.checkout.order_for(paid.id, &stranger).await.unwrap_err();
        assert!(matches!(err, CheckoutError::OrderNotFound));

        let err = h.checkout.confirm_by_intent("pi_unknown").await.unwrap_err();
        assert!(matches!(err, CheckoutError::OrderNotFound));
    }
}
