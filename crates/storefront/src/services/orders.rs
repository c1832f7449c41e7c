//! Turning a cart snapshot into an order.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::seq::IndexedRandom;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use larder_core::money::{line_total, round_money};
use larder_core::{Address, CartId, CurrencyCode, OrderStatus, PaymentStatus};

use crate::db::{RepositoryError, StoreTx};
use crate::models::{Cart, CartItem, NewOrder, NewOrderItem, Order, Shopper};

/// How many order numbers to try before giving up.
pub const MAX_NUMBER_ATTEMPTS: u32 = 5;

const NUMBER_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const NUMBER_SUFFIX_LEN: usize = 6;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("no free order number after {attempts} attempts")]
    NumberExhausted { attempts: u32 },

    #[error("order cannot move from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),
}

/// `ORD-YYYYMMDD-XXXXXX`, with an unambiguous random suffix.
#[must_use]
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..NUMBER_SUFFIX_LEN)
        .filter_map(|_| NUMBER_ALPHABET.choose(&mut rng))
        .map(|&b| char::from(b))
        .collect();
    format!("ORD-{}-{suffix}", now.format("%Y%m%d"))
}

/// Frozen cart contents taken before talking to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartSnapshot {
    pub cart_id: CartId,
    pub owner: Shopper,
    pub lines: Vec<NewOrderItem>,
}

impl CartSnapshot {
    #[must_use]
    pub fn new(cart: &Cart, lines: Vec<NewOrderItem>) -> Self {
        Self {
            cart_id: cart.id,
            owner: cart.owner.clone(),
            lines,
        }
    }

    /// Snapshot line for a cart item, copying catalog name and sku.
    #[must_use]
    pub fn line(item: &CartItem, product_name: String, sku: Option<String>) -> NewOrderItem {
        NewOrderItem {
            product_id: item.product_id,
            variation_id: item.variation_id,
            product_name,
            sku,
            quantity: item.quantity,
            unit_price: item.price,
            line_total: line_total(item.price, item.quantity),
        }
    }

    #[must_use]
    pub fn total(&self) -> Decimal {
        round_money(self.lines.iter().map(|line| line.line_total).sum())
    }
}

type NumberGenerator = Arc<dyn Fn(DateTime<Utc>) -> String + Send + Sync>;

/// Writes orders: pending on intent creation, paid on confirmation.
#[derive(Clone)]
pub struct OrderMaterializer {
    generator: NumberGenerator,
    max_attempts: u32,
}

impl fmt::Debug for OrderMaterializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderMaterializer")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl Default for OrderMaterializer {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderMaterializer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            generator: Arc::new(generate_order_number),
            max_attempts: MAX_NUMBER_ATTEMPTS,
        }
    }

    /// Use a custom order number source.
    #[must_use]
    pub fn with_generator(
        mut self,
        generator: impl Fn(DateTime<Utc>) -> String + Send + Sync + 'static,
    ) -> Self {
        self.generator = Arc::new(generator);
        self
    }

    /// Build the order to insert. The total is computed once, here.
    #[must_use]
    pub fn draft(
        snapshot: CartSnapshot,
        shipping: Address,
        billing: Address,
        payment_intent_id: String,
        currency: CurrencyCode,
    ) -> NewOrder {
        let total = snapshot.total();
        NewOrder {
            user_id: snapshot.owner.user_id(),
            session_token: snapshot.owner.session_token().cloned(),
            cart_id: snapshot.cart_id,
            payment_intent_id,
            currency,
            total,
            items: snapshot.lines,
            shipping,
            billing,
        }
    }

    /// Insert a pending order under a fresh order number.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::NumberExhausted` if every generated number was
    /// already taken.
    #[instrument(skip_all, fields(cart_id = %draft.cart_id))]
    pub async fn persist_pending(
        &self,
        tx: &mut dyn StoreTx,
        draft: &NewOrder,
    ) -> Result<Order, OrderError> {
        for attempt in 1..=self.max_attempts {
            let number = (self.generator)(Utc::now());
            if let Some(order) = tx.insert_order(draft, &number).await? {
                debug!(order_id = %order.id, order_number = %order.order_number, "Pending order created");
                return Ok(order);
            }
            warn!(attempt, order_number = %number, "Order number collision");
        }
        Err(OrderError::NumberExhausted {
            attempts: self.max_attempts,
        })
    }

    /// Mark an order paid and empty its source cart.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::InvalidTransition` unless the order is pending.
    #[instrument(skip_all, fields(order_id = %order.id))]
    pub async fn finalize_paid(
        &self,
        tx: &mut dyn StoreTx,
        order: &Order,
    ) -> Result<Order, OrderError> {
        if !order.status.can_transition_to(OrderStatus::Processing) {
            return Err(OrderError::InvalidTransition {
                from: order.status,
                to: OrderStatus::Processing,
            });
        }

        let paid = tx
            .update_order_status(
                order.id,
                OrderStatus::Processing,
                PaymentStatus::Paid,
                Some(Utc::now()),
            )
            .await?;

        if let Some(cart_id) = order.cart_id {
            let cleared = tx.clear_cart(cart_id).await?;
            debug!(cart_id = %cart_id, cleared, "Source cart cleared");
        }
        Ok(paid)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::TimeZone;

    use super::*;
    use crate::db::{MemoryStore, Store};
    use crate::models::SessionToken;
    use crate::services::fixtures;

    #[test]
    fn test_order_number_format() {
        let now = Utc.with_ymd_and_hms(2026, 3, 9, 12, 0, 0).unwrap();
        let number = generate_order_number(now);
        assert_eq!(number.len(), "ORD-20260309-XXXXXX".len());
        assert!(number.starts_with("ORD-20260309-"));
        let suffix = number.rsplit('-').next().unwrap();
        assert!(suffix.bytes().all(|b| NUMBER_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_draft_total_from_lines() {
        let token = SessionToken::generate();
        let snapshot = CartSnapshot {
            cart_id: CartId::new(3),
            owner: Shopper::Guest(token.clone()),
            lines: vec![fixtures::order_line(fixtures::JAR, 2, "10.00")],
        };
        let draft = OrderMaterializer::draft(
            snapshot,
            fixtures::address(),
            fixtures::address(),
            "pi_1".to_owned(),
            CurrencyCode::Usd,
        );
        assert_eq!(draft.total, Decimal::new(2000, 2));
        assert_eq!(draft.user_id, None);
        assert_eq!(draft.session_token, Some(token));
    }

    #[tokio::test]
    async fn test_persist_retries_on_collision() {
        let store = MemoryStore::new();
        let cart = fixtures::guest_cart(&store).await;
        let draft = fixtures::draft(&cart, "pi_1");

        let materializer = OrderMaterializer::new().with_generator(|_| "ORD-20260101-AAAAAA".to_owned());
        let mut tx = store.begin().await.unwrap();
        materializer.persist_pending(tx.as_mut(), &draft).await.unwrap();
        tx.commit().await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let materializer = OrderMaterializer::new().with_generator(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                "ORD-20260101-AAAAAA".to_owned()
            } else {
                "ORD-20260101-BBBBBB".to_owned()
            }
        });
        let mut tx = store.begin().await.unwrap();
        let order = materializer.persist_pending(tx.as_mut(), &draft).await.unwrap();
        assert_eq!(order.order_number, "ORD-20260101-BBBBBB");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_persist_gives_up() {
        let store = MemoryStore::new();
        let cart = fixtures::guest_cart(&store).await;
        let draft = fixtures::draft(&cart, "pi_1");
        let materializer = OrderMaterializer::new().with_generator(|_| "ORD-20260101-AAAAAA".to_owned());

        let mut tx = store.begin().await.unwrap();
        materializer.persist_pending(tx.as_mut(), &draft).await.unwrap();
        let err = materializer
            .persist_pending(tx.as_mut(), &draft)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrderError::NumberExhausted {
                attempts: MAX_NUMBER_ATTEMPTS
            }
        ));
    }

    #[tokio::test]
    async fn test_finalize_rejects_cancelled() {
        let store = MemoryStore::new();
        let cart = fixtures::guest_cart(&store).await;
        let draft = fixtures::draft(&cart, "pi_1");
        let materializer = OrderMaterializer::new();

        let mut tx = store.begin().await.unwrap();
        let order = materializer.persist_pending(tx.as_mut(), &draft).await.unwrap();
        let cancelled = tx
            .update_order_status(order.id, OrderStatus::Cancelled, PaymentStatus::Pending, None)
            .await
            .unwrap();
        let err = materializer
            .finalize_paid(tx.as_mut(), &cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::InvalidTransition { .. }));
    }
}
