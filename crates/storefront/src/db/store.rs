//! Storage traits used by the engine services.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use larder_core::{
    CartId, CartItemId, OrderId, OrderStatus, PaymentStatus, ProductId, UserId, VariationId,
};

use super::RepositoryError;
use crate::models::{
    Cart, CartItem, CatalogProduct, CatalogVariation, NewCartItem, NewOrder, Order, Shopper,
    StockKey, StockLevel,
};

/// A storage backend able to open transactions.
#[async_trait]
pub trait Store: Send + Sync {
    /// Start a transaction. Dropping it without [`StoreTx::commit`] rolls back.
    async fn begin(&self) -> Result<Box<dyn StoreTx>, RepositoryError>;

    /// Check the backend is reachable.
    async fn ping(&self) -> Result<(), RepositoryError>;
}

/// Operations available inside one storage transaction.
///
/// Cart lookups lock the cart row until the transaction ends, so two
/// transactions touching the same cart run one after the other. Carts are
/// always returned with their items loaded, orders with their items and
/// addresses.
#[async_trait]
pub trait StoreTx: Send {
    // Carts

    /// Find and lock the cart owned by `owner`.
    async fn find_cart(&mut self, owner: &Shopper) -> Result<Option<Cart>, RepositoryError>;

    /// Find and lock the cart owned by `owner`, creating it if needed.
    ///
    /// `expires_at` only applies when the cart is created.
    async fn get_or_create_cart(
        &mut self,
        owner: &Shopper,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Cart, RepositoryError>;

    /// Find and lock a cart by id.
    async fn lock_cart(&mut self, id: CartId) -> Result<Option<Cart>, RepositoryError>;

    async fn set_cart_expiry(
        &mut self,
        id: CartId,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError>;

    /// Delete a cart and its items. Returns whether a cart was deleted.
    async fn delete_cart(&mut self, id: CartId) -> Result<bool, RepositoryError>;

    async fn insert_cart_item(&mut self, item: &NewCartItem) -> Result<CartItem, RepositoryError>;

    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the item does not exist.
    async fn update_cart_item_quantity(
        &mut self,
        id: CartItemId,
        quantity: u32,
    ) -> Result<CartItem, RepositoryError>;

    /// Delete an item from `cart_id`. Returns whether an item was deleted.
    async fn delete_cart_item(
        &mut self,
        cart_id: CartId,
        id: CartItemId,
    ) -> Result<bool, RepositoryError>;

    /// Delete every item in a cart. Returns the number of items deleted.
    async fn clear_cart(&mut self, id: CartId) -> Result<u64, RepositoryError>;

    /// Delete guest carts whose expiry is before `now`.
    async fn delete_expired_guest_carts(&mut self, now: DateTime<Utc>)
    -> Result<u64, RepositoryError>;

    // Catalog

    async fn product(&mut self, id: ProductId) -> Result<Option<CatalogProduct>, RepositoryError>;

    async fn variation(
        &mut self,
        id: VariationId,
    ) -> Result<Option<CatalogVariation>, RepositoryError>;

    async fn stock_level(&mut self, key: StockKey) -> Result<Option<StockLevel>, RepositoryError>;

    /// Subtract `quantity` from a stock counter if at least that much is left.
    ///
    /// Returns the level after the decrement, or `None` if stock was
    /// insufficient (or the counter does not exist) and nothing changed.
    async fn decrement_stock(
        &mut self,
        key: StockKey,
        quantity: u32,
    ) -> Result<Option<StockLevel>, RepositoryError>;

    // Orders

    /// Insert a pending order under `order_number`.
    ///
    /// Returns `None` without writing anything if the number is taken.
    async fn insert_order(
        &mut self,
        order: &NewOrder,
        order_number: &str,
    ) -> Result<Option<Order>, RepositoryError>;

    /// Find an order, locking its row when `for_update` is set.
    async fn find_order(
        &mut self,
        id: OrderId,
        for_update: bool,
    ) -> Result<Option<Order>, RepositoryError>;

    /// Find the order bound to a gateway payment intent.
    async fn find_order_by_intent(
        &mut self,
        payment_intent_id: &str,
    ) -> Result<Option<OrderId>, RepositoryError>;

    /// Point the orders placed from cart `from` at cart `to`, and give
    /// guest orders among them to `user_id`. Returns how many moved.
    async fn reassign_orders(
        &mut self,
        from: CartId,
        to: CartId,
        user_id: UserId,
    ) -> Result<u64, RepositoryError>;

    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the order does not exist.
    async fn update_order_status(
        &mut self,
        id: OrderId,
        status: OrderStatus,
        payment_status: PaymentStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<Order, RepositoryError>;

    /// Mark an order for manual review.
    async fn flag_order(&mut self, id: OrderId, note: &str) -> Result<(), RepositoryError>;

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError>;
}
