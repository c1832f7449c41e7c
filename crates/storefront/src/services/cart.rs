//! Cart item mutation.
//!
//! Every operation runs in one transaction that locks the cart row first, so
//! concurrent mutations of the same cart are applied one after the other.
//! Stock is checked but never reserved here.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, instrument};

use larder_core::{CartId, CartItemId, ProductId, VariationId};

use super::stock::{StockError, StockLedger};
use crate::db::{RepositoryError, Store, StoreTx};
use crate::models::{Cart, CartItem, MAX_ITEM_QUANTITY, NewCartItem};

/// Errors from cart operations.
#[derive(Debug, Error)]
pub enum CartError {
    #[error("{field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    /// Neither a user nor a guest session was supplied.
    #[error("no user or guest session to resolve a cart for")]
    MissingIdentity,

    #[error("cart not found")]
    CartNotFound,

    /// Unknown item, or an item that belongs to another cart.
    #[error("cart item not found")]
    ItemNotFound,

    #[error("product {0} is not available")]
    ProductUnavailable(ProductId),

    #[error("product {0} requires a variation")]
    VariationRequired(ProductId),

    #[error("only {available} in stock, {requested} requested")]
    OutOfStock {
        product_id: ProductId,
        variation_id: Option<VariationId>,
        available: u32,
        requested: u32,
    },

    #[error("only {available} in stock, {requested} requested")]
    InsufficientStock { available: u32, requested: u32 },

    #[error("stock error: {0}")]
    Stock(#[from] StockError),

    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),
}

impl CartError {
    /// Stable machine-readable kind, used as the API `error` field.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::MissingIdentity => "missing_identity",
            Self::CartNotFound => "cart_not_found",
            Self::ItemNotFound => "item_not_found",
            Self::ProductUnavailable(_) => "product_unavailable",
            Self::VariationRequired(_) => "variation_required",
            Self::OutOfStock { .. } => "out_of_stock",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::Stock(_) | Self::Repository(_) => "server_error",
        }
    }

    fn quantity(message: impl Into<String>) -> Self {
        Self::Validation {
            field: "quantity",
            message: message.into(),
        }
    }
}

fn check_quantity(quantity: u32) -> Result<(), CartError> {
    if (1..=MAX_ITEM_QUANTITY).contains(&quantity) {
        Ok(())
    } else {
        Err(CartError::quantity(format!(
            "must be between 1 and {MAX_ITEM_QUANTITY}"
        )))
    }
}

/// Cart and cart item lifecycle.
#[derive(Clone)]
pub struct CartStore {
    store: Arc<dyn Store>,
    stock: StockLedger,
    guest_ttl: Duration,
}

impl CartStore {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, stock: StockLedger, guest_ttl: Duration) -> Self {
        Self {
            store,
            stock,
            guest_ttl,
        }
    }

    /// Add `quantity` of a product (or one of its variations) to a cart.
    ///
    /// An existing line for the same product and variation has its quantity
    /// increased and keeps its price; otherwise a new line is created at the
    /// current catalog price.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Validation` for a bad quantity,
    /// `ProductUnavailable`/`VariationRequired` for catalog problems and
    /// `OutOfStock` when the cart would hold more than is available.
    #[instrument(skip(self), fields(cart_id = %cart_id, product_id = %product_id))]
    pub async fn add_item(
        &self,
        cart_id: CartId,
        product_id: ProductId,
        variation_id: Option<VariationId>,
        quantity: u32,
    ) -> Result<(CartItem, Cart), CartError> {
        check_quantity(quantity)?;

        let mut tx = self.store.begin().await?;
        let cart = tx
            .lock_cart(cart_id)
            .await?
            .ok_or(CartError::CartNotFound)?;

        let product = tx
            .product(product_id)
            .await?
            .filter(|p| p.is_purchasable())
            .ok_or(CartError::ProductUnavailable(product_id))?;

        let price = match variation_id {
            None if product.is_variable() => {
                return Err(CartError::VariationRequired(product_id));
            }
            None => product.price,
            Some(id) => {
                tx.variation(id)
                    .await?
                    .filter(|v| v.product_id == product_id && v.is_active)
                    .ok_or(CartError::ProductUnavailable(product_id))?
                    .price
            }
        };

        let existing = cart.line_for(product_id, variation_id).cloned();
        let requested = existing.as_ref().map_or(0, |item| item.quantity) + quantity;

        let available = self.available(tx.as_mut(), product_id, variation_id).await?;
        if available < requested {
            return Err(CartError::OutOfStock {
                product_id,
                variation_id,
                available,
                requested,
            });
        }
        if requested > MAX_ITEM_QUANTITY {
            return Err(CartError::quantity(format!(
                "cart line cannot exceed {MAX_ITEM_QUANTITY}"
            )));
        }

        let item = match existing {
            Some(item) => tx.update_cart_item_quantity(item.id, requested).await?,
            None => {
                tx.insert_cart_item(&NewCartItem {
                    cart_id,
                    product_id,
                    variation_id,
                    quantity,
                    price,
                })
                .await?
            }
        };

        let cart = self.finish(tx, &cart).await?;
        debug!(item_id = %item.id, quantity = item.quantity, "Cart item added");
        Ok((item, cart))
    }

    /// Set an item's quantity. Zero removes the item and returns `None`.
    ///
    /// # Errors
    ///
    /// Returns `CartError::ItemNotFound` if the item is not in this cart and
    /// `InsufficientStock` if the new quantity exceeds available stock.
    #[instrument(skip(self), fields(cart_id = %cart_id, item_id = %item_id))]
    pub async fn update_item_quantity(
        &self,
        cart_id: CartId,
        item_id: CartItemId,
        quantity: u32,
    ) -> Result<(Option<CartItem>, Cart), CartError> {
        if quantity > 0 {
            check_quantity(quantity)?;
        }

        let mut tx = self.store.begin().await?;
        let cart = tx
            .lock_cart(cart_id)
            .await?
            .ok_or(CartError::CartNotFound)?;
        let item = cart.item(item_id).cloned().ok_or(CartError::ItemNotFound)?;

        if quantity == 0 {
            tx.delete_cart_item(cart_id, item_id).await?;
            let cart = self.finish(tx, &cart).await?;
            return Ok((None, cart));
        }

        let available = self
            .available(tx.as_mut(), item.product_id, item.variation_id)
            .await?;
        if available < quantity {
            return Err(CartError::InsufficientStock {
                available,
                requested: quantity,
            });
        }

        let item = tx.update_cart_item_quantity(item_id, quantity).await?;
        let cart = self.finish(tx, &cart).await?;
        Ok((Some(item), cart))
    }

    /// Remove an item. Removing an item that is not there is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `CartError::CartNotFound` if the cart does not exist.
    #[instrument(skip(self), fields(cart_id = %cart_id, item_id = %item_id))]
    pub async fn remove_item(&self, cart_id: CartId, item_id: CartItemId) -> Result<Cart, CartError> {
        let mut tx = self.store.begin().await?;
        let cart = tx
            .lock_cart(cart_id)
            .await?
            .ok_or(CartError::CartNotFound)?;
        let removed = tx.delete_cart_item(cart_id, item_id).await?;
        debug!(removed, "Cart item removal");
        self.finish(tx, &cart).await
    }

    /// Remove every item.
    ///
    /// # Errors
    ///
    /// Returns `CartError::CartNotFound` if the cart does not exist.
    #[instrument(skip(self), fields(cart_id = %cart_id))]
    pub async fn clear(&self, cart_id: CartId) -> Result<Cart, CartError> {
        let mut tx = self.store.begin().await?;
        let cart = tx
            .lock_cart(cart_id)
            .await?
            .ok_or(CartError::CartNotFound)?;
        tx.clear_cart(cart_id).await?;
        self.finish(tx, &cart).await
    }

    #[must_use]
    pub fn total(cart: &Cart) -> Decimal {
        cart.total()
    }

    #[must_use]
    pub fn item_count(cart: &Cart) -> u32 {
        cart.item_count()
    }

    async fn available(
        &self,
        tx: &mut dyn StoreTx,
        product_id: ProductId,
        variation_id: Option<VariationId>,
    ) -> Result<u32, CartError> {
        match self.stock.available(tx, product_id, variation_id).await {
            Ok(available) => Ok(available),
            Err(StockError::UnknownSku(_)) => Err(CartError::ProductUnavailable(product_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Bump guest expiry, reload the cart and commit.
    async fn finish(&self, mut tx: Box<dyn StoreTx>, cart: &Cart) -> Result<Cart, CartError> {
        if cart.owner.is_guest() {
            tx.set_cart_expiry(cart.id, Some(Utc::now() + self.guest_ttl))
                .await?;
        }
        let cart = tx
            .lock_cart(cart.id)
            .await?
            .ok_or(CartError::CartNotFound)?;
        tx.commit().await?;
        Ok(cart)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{Shopper, StockKey};
    use crate::services::fixtures;

    async fn setup() -> (MemoryStore, CartStore, Cart) {
        let store = MemoryStore::new();
        fixtures::seed_catalog(&store).await;
        let carts = CartStore::new(
            Arc::new(store.clone()),
            StockLedger::default(),
            Duration::hours(24),
        );
        let cart = fixtures::guest_cart(&store).await;
        (store, carts, cart)
    }

    #[tokio::test]
    async fn test_add_update_scenario() {
        let (store, carts, cart) = setup().await;
        store
            .set_stock(StockKey::Product(fixtures::JAR), 5)
            .await;

        let (item, cart) = carts.add_item(cart.id, fixtures::JAR, None, 3).await.unwrap();
        assert_eq!(item.quantity, 3);
        assert_eq!(cart.total(), Decimal::new(3000, 2));
        assert_eq!(cart.item_count(), 3);

        let (updated, _) = carts
            .update_item_quantity(cart.id, item.id, 5)
            .await
            .unwrap();
        assert_eq!(updated.unwrap().quantity, 5);

        let err = carts
            .update_item_quantity(cart.id, item.id, 6)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CartError::InsufficientStock {
                available: 5,
                requested: 6
            }
        ));
        let cart = store.cart(cart.id).await.unwrap();
        assert_eq!(cart.item(item.id).unwrap().quantity, 5);
    }

    #[tokio::test]
    async fn test_repeated_adds_merge_into_one_line() {
        let (_, carts, cart) = setup().await;
        carts.add_item(cart.id, fixtures::JAR, None, 1).await.unwrap();
        let (item, cart) = carts.add_item(cart.id, fixtures::JAR, None, 2).await.unwrap();
        assert_eq!(cart.items.len(), 1);
        assert_eq!(item.quantity, 3);
    }

    #[tokio::test]
    async fn test_existing_line_keeps_price_snapshot() {
        let (store, carts, cart) = setup().await;
        carts.add_item(cart.id, fixtures::JAR, None, 1).await.unwrap();

        let mut product = fixtures::jar();
        product.price = Decimal::new(1500, 2);
        store.insert_product(product).await;

        let (item, _) = carts.add_item(cart.id, fixtures::JAR, None, 1).await.unwrap();
        assert_eq!(item.price, Decimal::new(1000, 2));
    }

    #[tokio::test]
    async fn test_add_validation_order() {
        let (_, carts, cart) = setup().await;

        let err = carts.add_item(cart.id, fixtures::JAR, None, 0).await.unwrap_err();
        assert_eq!(err.kind(), "validation_error");

        let err = carts
            .add_item(cart.id, fixtures::DRAFT, None, 1)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "product_unavailable");

        let err = carts
            .add_item(cart.id, fixtures::APRON, None, 1)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "variation_required");

        let err = carts
            .add_item(cart.id, fixtures::APRON, Some(fixtures::INACTIVE_APRON), 1)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "product_unavailable");

        let err = carts
            .add_item(cart.id, fixtures::JAR, None, 99)
            .await
            .unwrap_err();
        assert!(matches!(err, CartError::OutOfStock { available: 50, .. }));
    }

    #[tokio::test]
    async fn test_line_cannot_exceed_max_quantity() {
        let (store, carts, cart) = setup().await;
        store
            .set_stock(StockKey::Product(fixtures::JAR), 500)
            .await;
        carts.add_item(cart.id, fixtures::JAR, None, 60).await.unwrap();
        let err = carts
            .add_item(cart.id, fixtures::JAR, None, 40)
            .await
            .unwrap_err();
        assert!(matches!(err, CartError::Validation { field: "quantity", .. }));
    }

    #[tokio::test]
    async fn test_variation_uses_its_own_price_and_stock() {
        let (store, carts, cart) = setup().await;
        store
            .set_stock(StockKey::Variation(fixtures::LARGE_APRON), 1)
            .await;
        let (item, _) = carts
            .add_item(cart.id, fixtures::APRON, Some(fixtures::LARGE_APRON), 1)
            .await
            .unwrap();
        assert_eq!(item.price, Decimal::new(2750, 2));

        let err = carts
            .add_item(cart.id, fixtures::APRON, Some(fixtures::LARGE_APRON), 1)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "out_of_stock");
    }

    #[tokio::test]
    async fn test_update_to_zero_removes() {
        let (_, carts, cart) = setup().await;
        let (item, _) = carts.add_item(cart.id, fixtures::JAR, None, 2).await.unwrap();
        let (item, cart) = carts
            .update_item_quantity(cart.id, item.id, 0)
            .await
            .unwrap();
        assert!(item.is_none());
        assert!(cart.is_empty());
    }

    #[tokio::test]
    async fn test_foreign_item_is_not_found() {
        let (store, carts, cart) = setup().await;
        let other = fixtures::guest_cart(&store).await;
        let (item, _) = carts.add_item(other.id, fixtures::JAR, None, 1).await.unwrap();

        let err = carts
            .update_item_quantity(cart.id, item.id, 2)
            .await
            .unwrap_err();
        assert!(matches!(err, CartError::ItemNotFound));

        // Removal through the wrong cart leaves the item alone.
        carts.remove_item(cart.id, item.id).await.unwrap();
        assert_eq!(store.cart(other.id).await.unwrap().items.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let (_, carts, cart) = setup().await;
        let (item, _) = carts.add_item(cart.id, fixtures::JAR, None, 1).await.unwrap();
        let cart = carts.remove_item(cart.id, item.id).await.unwrap();
        assert!(cart.is_empty());
        let cart = carts.remove_item(cart.id, item.id).await.unwrap();
        assert!(cart.is_empty());
    }

    #[tokio::test]
    async fn test_clear_and_expiry_bump() {
        let (store, carts, cart) = setup().await;
        store.set_cart_expiry(cart.id, Some(Utc::now())).await;

        carts.add_item(cart.id, fixtures::JAR, None, 1).await.unwrap();
        carts.add_item(cart.id, fixtures::SPOON, None, 2).await.unwrap();
        let cart = carts.clear(cart.id).await.unwrap();

        assert!(cart.is_empty());
        assert_eq!(CartStore::item_count(&cart), 0);
        assert!(cart.expires_at.unwrap() > Utc::now() + Duration::hours(23));
    }

    #[tokio::test]
    async fn test_user_cart_has_no_expiry() {
        let (store, carts, _) = setup().await;
        let mut tx = store.begin().await.unwrap();
        let cart = tx
            .get_or_create_cart(&Shopper::User(fixtures::USER), None)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let (_, cart) = carts.add_item(cart.id, fixtures::JAR, None, 1).await.unwrap();
        assert!(cart.expires_at.is_none());
    }
}
