//! Stock counters and low-stock signalling.
//!
//! Availability checks in the cart are optimistic: nothing is reserved until
//! an order is paid. The only write is [`StockLedger::try_decrement`], a
//! single conditional update that never lets a counter go negative.

use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{instrument, warn};

use larder_core::{ProductId, VariationId};

use crate::db::{RepositoryError, Store, StoreTx};
use crate::models::{StockKey, StockLevel};

/// Default capacity of the low-stock channel.
pub const STOCK_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum StockError {
    /// The product or variation has no stock counter.
    #[error("unknown sku: {0}")]
    UnknownSku(StockKey),

    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),
}

/// A stock counter crossed its alert threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LowStockEvent {
    pub product_id: ProductId,
    pub variation_id: Option<VariationId>,
    pub remaining: i32,
    pub threshold: i32,
}

/// Result of a successful decrement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockDecrement {
    pub level: StockLevel,
    /// Set when this decrement took the counter to or below its threshold.
    pub low_stock: Option<LowStockEvent>,
}

impl StockDecrement {
    fn new(
        product_id: ProductId,
        variation_id: Option<VariationId>,
        quantity: u32,
        level: StockLevel,
    ) -> Self {
        let after = i64::from(level.stock_quantity);
        let before = after + i64::from(quantity);
        let threshold = i64::from(level.alert_threshold);
        let low_stock = (before > threshold && after <= threshold).then(|| LowStockEvent {
            product_id,
            variation_id,
            remaining: level.stock_quantity,
            threshold: level.alert_threshold,
        });
        Self { level, low_stock }
    }
}

/// Reads and decrements stock counters, and fans out low-stock events.
#[derive(Clone)]
pub struct StockLedger {
    events: broadcast::Sender<LowStockEvent>,
}

impl Default for StockLedger {
    fn default() -> Self {
        Self::new(STOCK_EVENT_CAPACITY)
    }
}

impl std::fmt::Debug for StockLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StockLedger")
            .field("subscribers", &self.events.receiver_count())
            .finish()
    }
}

impl StockLedger {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self { events }
    }

    /// Quantity available for the variation if given, else the product.
    ///
    /// # Errors
    ///
    /// Returns `StockError::UnknownSku` if the counter does not exist.
    pub async fn available(
        &self,
        tx: &mut dyn StoreTx,
        product_id: ProductId,
        variation_id: Option<VariationId>,
    ) -> Result<u32, StockError> {
        let key = StockKey::resolve(product_id, variation_id);
        tx.stock_level(key)
            .await?
            .map(|level| level.available())
            .ok_or(StockError::UnknownSku(key))
    }

    /// Subtract `quantity` if at least that much is left.
    ///
    /// Returns `None` when stock is insufficient; the counter is unchanged.
    /// Low-stock events are returned to the caller, who publishes them once
    /// the surrounding transaction has committed.
    ///
    /// # Errors
    ///
    /// Returns `StockError::Repository` if the update fails.
    #[instrument(skip(self, tx), fields(product_id = %product_id))]
    pub async fn try_decrement(
        &self,
        tx: &mut dyn StoreTx,
        product_id: ProductId,
        variation_id: Option<VariationId>,
        quantity: u32,
    ) -> Result<Option<StockDecrement>, StockError> {
        let key = StockKey::resolve(product_id, variation_id);
        let level = tx.decrement_stock(key, quantity).await?;
        Ok(level.map(|level| StockDecrement::new(product_id, variation_id, quantity, level)))
    }

    /// [`Self::try_decrement`] in its own transaction, publishing any
    /// low-stock event after commit.
    ///
    /// # Errors
    ///
    /// Returns `StockError::Repository` if the transaction fails.
    pub async fn try_decrement_now(
        &self,
        store: &dyn Store,
        product_id: ProductId,
        variation_id: Option<VariationId>,
        quantity: u32,
    ) -> Result<Option<StockLevel>, StockError> {
        let mut tx = store.begin().await?;
        let result = self
            .try_decrement(tx.as_mut(), product_id, variation_id, quantity)
            .await?;
        tx.commit().await?;

        Ok(result.map(|decrement| {
            self.publish(decrement.low_stock);
            decrement.level
        }))
    }

    /// Send events to subscribers. Having no subscribers is not an error.
    pub fn publish(&self, events: impl IntoIterator<Item = LowStockEvent>) {
        for event in events {
            let _ = self.events.send(event);
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LowStockEvent> {
        self.events.subscribe()
    }
}

/// Log every low-stock event until the ledger is dropped.
pub fn spawn_low_stock_logger(ledger: &StockLedger) -> JoinHandle<()> {
    let mut events = ledger.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => warn!(
                    product_id = %event.product_id,
                    variation_id = ?event.variation_id,
                    remaining = event.remaining,
                    threshold = event.threshold,
                    "Stock at or below alert threshold"
                ),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Low-stock logger fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
