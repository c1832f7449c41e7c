//! Background deletion of abandoned guest carts.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument};

use crate::db::{RepositoryError, Store};

/// Periodically deletes guest carts past their expiry.
///
/// Orders keep their copied lines; their `cart_id` is cleared.
#[derive(Clone)]
pub struct ExpiryReaper {
    store: Arc<dyn Store>,
    interval: Duration,
}

impl ExpiryReaper {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Delete guest carts that expired before `now`. Returns how many.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the delete fails; nothing is deleted.
    #[instrument(skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut tx = self.store.begin().await?;
        let removed = tx.delete_expired_guest_carts(now).await?;
        tx.commit().await?;
        Ok(removed)
    }

    /// Sweep on every tick until `shutdown` turns true.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = self.interval.as_secs(), "Cart reaper started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => match self.sweep(Utc::now()).await {
                        Ok(0) => {}
                        Ok(removed) => info!(removed, "Expired guest carts deleted"),
                        Err(e) => error!(error = %e, "Cart reaper sweep failed"),
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Cart reaper stopped");
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::db::MemoryStore;
    use crate::services::fixtures;

    #[tokio::test]
    async fn test_sweep_only_removes_expired_guest_carts() {
        let store = MemoryStore::new();
        let expired = fixtures::guest_cart(&store).await;
        let fresh = fixtures::guest_cart(&store).await;
        store
            .set_cart_expiry(expired.id, Some(Utc::now() - ChronoDuration::minutes(1)))
            .await;

        let reaper = ExpiryReaper::new(Arc::new(store.clone()), Duration::from_secs(60));
        assert_eq!(reaper.sweep(Utc::now()).await.unwrap(), 1);
        assert!(store.cart(expired.id).await.is_none());
        assert!(store.cart(fresh.id).await.is_some());

        assert_eq!(reaper.sweep(Utc::now()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_spawned_reaper_stops_on_shutdown() {
        let store = MemoryStore::new();
        let cart = fixtures::guest_cart(&store).await;
        store
            .set_cart_expiry(cart.id, Some(Utc::now() - ChronoDuration::minutes(1)))
            .await;

        let (tx, rx) = watch::channel(false);
        let handle = ExpiryReaper::new(Arc::new(store.clone()), Duration::from_millis(10)).spawn(rx);

        // The first tick fires immediately.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.cart(cart.id).await.is_none());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
