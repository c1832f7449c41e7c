//! In-memory storage backend.
//!
//! A transaction takes the store's async mutex for its whole lifetime and
//! works on a private copy of the state. Commit swaps the copy in; dropping
//! the transaction discards it. Transactions are therefore fully serialized,
//! which gives the same guarantees as the row locks in [`super::PgStore`].
//!
//! A task must not hold two transactions at once or it will wait on itself.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use larder_core::{
    AddressKind, CartId, CartItemId, OrderId, OrderItemId, OrderStatus, PaymentStatus, ProductId,
    UserId, VariationId,
};

use super::RepositoryError;
use super::store::{Store, StoreTx};
use crate::models::{
    Cart, CartItem, CatalogProduct, CatalogVariation, NewCartItem, NewOrder, Order, OrderAddress,
    OrderItem, Shopper, StockKey, StockLevel,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    next_id: i64,
    products: BTreeMap<ProductId, CatalogProduct>,
    variations: BTreeMap<VariationId, CatalogVariation>,
    carts: BTreeMap<CartId, Cart>,
    orders: BTreeMap<OrderId, Order>,
}

impl MemoryState {
    const fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn cart_by_owner(&self, owner: &Shopper) -> Option<&Cart> {
        self.carts.values().find(|cart| &cart.owner == owner)
    }

    fn stock_level(&self, key: StockKey) -> Option<StockLevel> {
        let (stock_quantity, alert_threshold) = match key {
            StockKey::Product(id) => self
                .products
                .get(&id)
                .map(|p| (p.stock_quantity, p.alert_threshold))?,
            StockKey::Variation(id) => self
                .variations
                .get(&id)
                .map(|v| (v.stock_quantity, v.alert_threshold))?,
        };
        Some(StockLevel {
            key,
            stock_quantity,
            alert_threshold,
        })
    }

    fn stock_mut(&mut self, key: StockKey) -> Option<&mut i32> {
        match key {
            StockKey::Product(id) => self.products.get_mut(&id).map(|p| &mut p.stock_quantity),
            StockKey::Variation(id) => self
                .variations
                .get_mut(&id)
                .map(|v| &mut v.stock_quantity),
        }
    }

    fn remove_cart(&mut self, id: CartId) -> bool {
        if self.carts.remove(&id).is_none() {
            return false;
        }
        for order in self.orders.values_mut() {
            if order.cart_id == Some(id) {
                order.cart_id = None;
            }
        }
        true
    }
}

/// Storage backend that keeps everything in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a catalog product.
    pub async fn insert_product(&self, product: CatalogProduct) {
        self.state.lock().await.products.insert(product.id, product);
    }

    /// Add or replace a catalog variation.
    pub async fn insert_variation(&self, variation: CatalogVariation) {
        self.state
            .lock()
            .await
            .variations
            .insert(variation.id, variation);
    }

    /// Current stock counter value.
    pub async fn stock_quantity(&self, key: StockKey) -> Option<i32> {
        self.state
            .lock()
            .await
            .stock_level(key)
            .map(|level| level.stock_quantity)
    }

    /// Force a stock counter to a value.
    pub async fn set_stock(&self, key: StockKey, quantity: i32) {
        if let Some(stock) = self.state.lock().await.stock_mut(key) {
            *stock = quantity;
        }
    }

    pub async fn cart(&self, id: CartId) -> Option<Cart> {
        self.state.lock().await.carts.get(&id).cloned()
    }

    pub async fn cart_count(&self) -> usize {
        self.state.lock().await.carts.len()
    }

    pub async fn order(&self, id: OrderId) -> Option<Order> {
        self.state.lock().await.orders.get(&id).cloned()
    }

    pub async fn orders(&self) -> Vec<Order> {
        self.state.lock().await.orders.values().cloned().collect()
    }

    /// Move a cart's expiry, e.g. to simulate an abandoned guest cart.
    pub async fn set_cart_expiry(&self, id: CartId, expires_at: Option<DateTime<Utc>>) {
        if let Some(cart) = self.state.lock().await.carts.get_mut(&id) {
            cart.expires_at = expires_at;
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, RepositoryError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTx { guard, work }))
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    work: MemoryState,
}

impl MemoryTx {
    fn cart_mut(&mut self, id: CartId) -> Result<&mut Cart, RepositoryError> {
        self.work.carts.get_mut(&id).ok_or(RepositoryError::NotFound)
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn find_cart(&mut self, owner: &Shopper) -> Result<Option<Cart>, RepositoryError> {
        Ok(self.work.cart_by_owner(owner).cloned())
    }

    async fn get_or_create_cart(
        &mut self,
        owner: &Shopper,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Cart, RepositoryError> {
        if let Some(cart) = self.work.cart_by_owner(owner) {
            return Ok(cart.clone());
        }
        let now = Utc::now();
        let cart = Cart {
            id: CartId::new(self.work.next_id()),
            owner: owner.clone(),
            expires_at,
            created_at: now,
            updated_at: now,
            items: Vec::new(),
        };
        self.work.carts.insert(cart.id, cart.clone());
        Ok(cart)
    }

    async fn lock_cart(&mut self, id: CartId) -> Result<Option<Cart>, RepositoryError> {
        Ok(self.work.carts.get(&id).cloned())
    }

    async fn set_cart_expiry(
        &mut self,
        id: CartId,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError> {
        let cart = self.cart_mut(id)?;
        cart.expires_at = expires_at;
        cart.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_cart(&mut self, id: CartId) -> Result<bool, RepositoryError> {
        Ok(self.work.remove_cart(id))
    }

    async fn insert_cart_item(&mut self, item: &NewCartItem) -> Result<CartItem, RepositoryError> {
        let id = CartItemId::new(self.work.next_id());
        let cart = self.cart_mut(item.cart_id)?;
        if cart.line_for(item.product_id, item.variation_id).is_some() {
            return Err(RepositoryError::Conflict(
                "cart already has a line for this product".to_owned(),
            ));
        }
        let now = Utc::now();
        let row = CartItem {
            id,
            cart_id: item.cart_id,
            product_id: item.product_id,
            variation_id: item.variation_id,
            quantity: item.quantity,
            price: item.price,
            created_at: now,
            updated_at: now,
        };
        cart.items.push(row.clone());
        cart.updated_at = now;
        Ok(row)
    }

    async fn update_cart_item_quantity(
        &mut self,
        id: CartItemId,
        quantity: u32,
    ) -> Result<CartItem, RepositoryError> {
        let now = Utc::now();
        let item = self
            .work
            .carts
            .values_mut()
            .flat_map(|cart| cart.items.iter_mut())
            .find(|item| item.id == id)
            .ok_or(RepositoryError::NotFound)?;
        item.quantity = quantity;
        item.updated_at = now;
        Ok(item.clone())
    }

    async fn delete_cart_item(
        &mut self,
        cart_id: CartId,
        id: CartItemId,
    ) -> Result<bool, RepositoryError> {
        let Some(cart) = self.work.carts.get_mut(&cart_id) else {
            return Ok(false);
        };
        let before = cart.items.len();
        cart.items.retain(|item| item.id != id);
        Ok(cart.items.len() != before)
    }

    async fn clear_cart(&mut self, id: CartId) -> Result<u64, RepositoryError> {
        let Some(cart) = self.work.carts.get_mut(&id) else {
            return Ok(0);
        };
        let removed = cart.items.len() as u64;
        cart.items.clear();
        cart.updated_at = Utc::now();
        Ok(removed)
    }

    async fn delete_expired_guest_carts(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let expired: Vec<CartId> = self
            .work
            .carts
            .values()
            .filter(|cart| cart.is_expired(now))
            .map(|cart| cart.id)
            .collect();
        let mut removed = 0;
        for id in expired {
            if self.work.remove_cart(id) {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn product(&mut self, id: ProductId) -> Result<Option<CatalogProduct>, RepositoryError> {
        Ok(self.work.products.get(&id).cloned())
    }

    async fn variation(
        &mut self,
        id: VariationId,
    ) -> Result<Option<CatalogVariation>, RepositoryError> {
        Ok(self.work.variations.get(&id).cloned())
    }

    async fn stock_level(&mut self, key: StockKey) -> Result<Option<StockLevel>, RepositoryError> {
        Ok(self.work.stock_level(key))
    }

    async fn decrement_stock(
        &mut self,
        key: StockKey,
        quantity: u32,
    ) -> Result<Option<StockLevel>, RepositoryError> {
        let Ok(quantity) = i32::try_from(quantity) else {
            return Ok(None);
        };
        let Some(stock) = self.work.stock_mut(key) else {
            return Ok(None);
        };
        if *stock < quantity {
            return Ok(None);
        }
        *stock -= quantity;
        Ok(self.work.stock_level(key))
    }

    async fn insert_order(
        &mut self,
        order: &NewOrder,
        order_number: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        if self
            .work
            .orders
            .values()
            .any(|o| o.order_number == order_number)
        {
            return Ok(None);
        }

        let id = OrderId::new(self.work.next_id());
        let items = order
            .items
            .iter()
            .map(|item| OrderItem {
                id: OrderItemId::new(self.work.next_id()),
                order_id: id,
                product_id: item.product_id,
                variation_id: item.variation_id,
                product_name: item.product_name.clone(),
                sku: item.sku.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                line_total: item.line_total,
            })
            .collect();
        let now = Utc::now();
        let row = Order {
            id,
            order_number: order_number.to_owned(),
            user_id: order.user_id,
            session_token: order.session_token.clone(),
            cart_id: Some(order.cart_id),
            payment_intent_id: order.payment_intent_id.clone(),
            currency: order.currency,
            total: order.total,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            needs_review: false,
            review_note: None,
            created_at: now,
            updated_at: now,
            paid_at: None,
            items,
            addresses: vec![
                OrderAddress {
                    kind: AddressKind::Shipping,
                    address: order.shipping.clone(),
                },
                OrderAddress {
                    kind: AddressKind::Billing,
                    address: order.billing.clone(),
                },
            ],
        };
        self.work.orders.insert(id, row.clone());
        Ok(Some(row))
    }

    async fn find_order(
        &mut self,
        id: OrderId,
        _for_update: bool,
    ) -> Result<Option<Order>, RepositoryError> {
        Ok(self.work.orders.get(&id).cloned())
    }

    async fn find_order_by_intent(
        &mut self,
        payment_intent_id: &str,
    ) -> Result<Option<OrderId>, RepositoryError> {
        Ok(self
            .work
            .orders
            .values()
            .filter(|o| o.payment_intent_id == payment_intent_id)
            .map(|o| o.id)
            .max())
    }

    async fn update_order_status(
        &mut self,
        id: OrderId,
        status: OrderStatus,
        payment_status: PaymentStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<Order, RepositoryError> {
        let order = self
            .work
            .orders
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound)?;
        order.status = status;
        order.payment_status = payment_status;
        order.paid_at = paid_at.or(order.paid_at);
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn reassign_orders(
        &mut self,
        from: CartId,
        to: CartId,
        user_id: UserId,
    ) -> Result<u64, RepositoryError> {
        let now = Utc::now();
        let mut moved = 0;
        for order in self.work.orders.values_mut() {
            if order.cart_id == Some(from) {
                order.cart_id = Some(to);
                if order.user_id.is_none() {
                    order.user_id = Some(user_id);
                }
                order.updated_at = now;
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn flag_order(&mut self, id: OrderId, note: &str) -> Result<(), RepositoryError> {
        let order = self
            .work
            .orders
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound)?;
        order.needs_review = true;
        order.review_note = Some(note.to_owned());
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        let Self { mut guard, work } = *self;
        *guard = work;
        Ok(())
    }
}
