//! Maps a caller's identity to their cart.
//!
//! A signed-in user always has exactly one cart. A guest is identified by a
//! session token and gets a cart that expires unless it keeps being used.
//! When a guest signs in, the guest cart is folded into the user's cart.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, instrument, warn};

use larder_core::UserId;

use super::cart::CartError;
use super::stock::{StockError, StockLedger};
use crate::db::{Store, StoreTx};
use crate::models::{Cart, CartItem, IdentityContext, MAX_ITEM_QUANTITY, NewCartItem, SessionToken, Shopper};

/// Resolves an [`IdentityContext`] to exactly one cart.
#[derive(Clone)]
pub struct CartIdentityResolver {
    store: Arc<dyn Store>,
    stock: StockLedger,
    guest_ttl: Duration,
}

impl CartIdentityResolver {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, stock: StockLedger, guest_ttl: Duration) -> Self {
        Self {
            store,
            stock,
            guest_ttl,
        }
    }

    /// Fetch or create the caller's cart.
    ///
    /// A user id wins over a session token. When both are present, any
    /// guest cart for the token is merged into the user's cart first.
    ///
    /// # Errors
    ///
    /// Returns `CartError::MissingIdentity` if the context is empty.
    #[instrument(skip_all, fields(user_id = ?identity.user_id, guest = identity.session_token.is_some()))]
    pub async fn resolve(&self, identity: &IdentityContext) -> Result<Cart, CartError> {
        let mut tx = self.store.begin().await?;

        let cart = match (identity.user_id, &identity.session_token) {
            (Some(user_id), Some(token)) => self.merge_in(tx.as_mut(), user_id, token).await?,
            (Some(user_id), None) => {
                let cart = tx.get_or_create_cart(&Shopper::User(user_id), None).await?;
                if cart.expires_at.is_some() {
                    tx.set_cart_expiry(cart.id, None).await?;
                }
                reload(tx.as_mut(), &cart).await?
            }
            (None, Some(token)) => {
                let expires_at = Some(Utc::now() + self.guest_ttl);
                let owner = Shopper::Guest(token.clone());
                let cart = tx.get_or_create_cart(&owner, expires_at).await?;
                tx.set_cart_expiry(cart.id, expires_at).await?;
                reload(tx.as_mut(), &cart).await?
            }
            (None, None) => return Err(CartError::MissingIdentity),
        };

        tx.commit().await?;
        Ok(cart)
    }

    /// The caller's cart if one exists. Never creates or merges.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Repository` if the lookup fails.
    pub async fn resolve_existing(
        &self,
        identity: &IdentityContext,
    ) -> Result<Option<Cart>, CartError> {
        let owner = match (identity.user_id, &identity.session_token) {
            (Some(user_id), _) => Shopper::User(user_id),
            (None, Some(token)) => Shopper::Guest(token.clone()),
            (None, None) => return Ok(None),
        };

        // Read only; the transaction rolls back on drop.
        let mut tx = self.store.begin().await?;
        let cart = tx.find_cart(&owner).await?;
        Ok(cart.filter(|c| !c.is_expired(Utc::now())))
    }

    /// Merge the guest cart for `token` into `user_id`'s cart.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Repository` if storage fails; nothing is merged.
    pub async fn merge_guest_cart(
        &self,
        user_id: UserId,
        token: &SessionToken,
    ) -> Result<Cart, CartError> {
        let mut tx = self.store.begin().await?;
        let cart = self.merge_in(tx.as_mut(), user_id, token).await?;
        tx.commit().await?;
        Ok(cart)
    }

    /// Lines are matched on (product, variation). Matching lines add up and
    /// keep the user's price; new lines keep the guest's price. Quantities
    /// are capped at what is in stock and at the line maximum.
    async fn merge_in(
        &self,
        tx: &mut dyn StoreTx,
        user_id: UserId,
        token: &SessionToken,
    ) -> Result<Cart, CartError> {
        // User cart first, then guest: always the same lock order.
        let mut user_cart = tx.get_or_create_cart(&Shopper::User(user_id), None).await?;
        if user_cart.expires_at.is_some() {
            tx.set_cart_expiry(user_cart.id, None).await?;
        }

        let Some(guest_cart) = tx.find_cart(&Shopper::Guest(token.clone())).await? else {
            return reload(tx, &user_cart).await;
        };

        let mut merged = 0_usize;
        for line in &guest_cart.items {
            let Some(cap) = self.merge_cap(tx, line).await? else {
                warn!(
                    product_id = %line.product_id,
                    variation_id = ?line.variation_id,
                    "Dropping unavailable guest cart line during merge"
                );
                continue;
            };

            if let Some(existing) = user_cart.line_for(line.product_id, line.variation_id) {
                let quantity = (existing.quantity + line.quantity)
                    .min(cap)
                    .max(existing.quantity);
                if quantity != existing.quantity {
                    tx.update_cart_item_quantity(existing.id, quantity).await?;
                }
            } else {
                let quantity = line.quantity.min(cap);
                let item = tx
                    .insert_cart_item(&NewCartItem {
                        cart_id: user_cart.id,
                        product_id: line.product_id,
                        variation_id: line.variation_id,
                        quantity,
                        price: line.price,
                    })
                    .await?;
                user_cart.items.push(item);
            }
            merged += 1;
        }

        // Orders still awaiting payment must clear the cart their lines now live in.
        let reassigned = tx
            .reassign_orders(guest_cart.id, user_cart.id, user_id)
            .await?;
        tx.delete_cart(guest_cart.id).await?;
        info!(
            user_cart_id = %user_cart.id,
            guest_cart_id = %guest_cart.id,
            merged,
            reassigned,
            dropped = guest_cart.items.len() - merged,
            "Merged guest cart into user cart"
        );

        reload(tx, &user_cart).await
    }

    /// Most a merged line may hold, or `None` if the line must be dropped.
    async fn merge_cap(
        &self,
        tx: &mut dyn StoreTx,
        line: &CartItem,
    ) -> Result<Option<u32>, CartError> {
        let purchasable = tx
            .product(line.product_id)
            .await?
            .is_some_and(|p| p.is_purchasable());
        if !purchasable {
            return Ok(None);
        }
        if let Some(id) = line.variation_id {
            let active = tx
                .variation(id)
                .await?
                .is_some_and(|v| v.product_id == line.product_id && v.is_active);
            if !active {
                return Ok(None);
            }
        }

        let available = match self
            .stock
            .available(tx, line.product_id, line.variation_id)
            .await
        {
            Ok(available) => available,
            Err(StockError::UnknownSku(_)) => 0,
            Err(e) => return Err(e.into()),
        };
        let cap = available.min(MAX_ITEM_QUANTITY);
        Ok((cap > 0).then_some(cap))
    }
}

async fn reload(tx: &mut dyn StoreTx, cart: &Cart) -> Result<Cart, CartError> {
    tx.lock_cart(cart.id).await?.ok_or(CartError::CartNotFound)
}
