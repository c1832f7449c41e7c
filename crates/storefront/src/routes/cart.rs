//! Cart route handlers.
//!
//! Every mutating handler resolves the caller's cart first (creating it, or
//! merging the guest cart after login), then acts on that cart only. Item ids
//! from another cart are reported as not found.

use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use larder_core::{CartId, CartItemId, ProductId, VariationId};

use super::json::{ApiJson, ApiResponse};
use crate::error::{Result, add_breadcrumb};
use crate::middleware::{CartIdentity, ExistingIdentity};
use crate::models::{Cart, CartItem};
use crate::services::CartStore;
use crate::state::AppState;

/// Cart as returned by the API, with derived totals.
#[derive(Debug, Serialize)]
pub struct CartView {
    pub id: CartId,
    pub items: Vec<CartItem>,
    pub total: Decimal,
    pub item_count: u32,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<Cart> for CartView {
    fn from(cart: Cart) -> Self {
        Self {
            id: cart.id,
            total: CartStore::total(&cart),
            item_count: CartStore::item_count(&cart),
            expires_at: cart.expires_at,
            items: cart.items,
        }
    }
}

/// Add to cart request body.
#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub product_id: ProductId,
    pub variation_id: Option<VariationId>,
    pub quantity: u32,
}

/// Update quantity request body.
#[derive(Debug, Deserialize)]
pub struct UpdateItemRequest {
    pub quantity: u32,
}

#[derive(Debug, Serialize)]
pub struct ItemAdded {
    pub item: CartItem,
    pub cart: CartView,
}

#[derive(Debug, Serialize)]
pub struct ItemCount {
    pub count: u32,
}

/// Show the caller's cart.
#[instrument(skip(state, identity))]
pub async fn show(
    State(state): State<AppState>,
    identity: CartIdentity,
) -> Result<ApiResponse<CartView>> {
    let cart = identity.resolve(state.identity()).await?;
    Ok(ApiResponse::ok(cart.into()))
}

/// Add a product (or variation) to the cart.
#[instrument(skip(state, identity), fields(product_id = %body.product_id))]
pub async fn add_item(
    State(state): State<AppState>,
    identity: CartIdentity,
    ApiJson(body): ApiJson<AddItemRequest>,
) -> Result<ApiResponse<ItemAdded>> {
    let cart = identity.resolve(state.identity()).await?;
    let (item, cart) = state
        .carts()
        .add_item(cart.id, body.product_id, body.variation_id, body.quantity)
        .await?;

    let product_id = body.product_id.to_string();
    add_breadcrumb(
        "cart",
        "Item added",
        Some(&[("product_id", product_id.as_str())]),
    );

    Ok(ApiResponse::created(ItemAdded {
        item,
        cart: cart.into(),
    })
    .with_message("Item added to cart"))
}

/// Change an item's quantity; zero removes it and returns `data: null`.
#[instrument(skip(state, identity, body), fields(item_id = %item_id))]
pub async fn update_item(
    State(state): State<AppState>,
    identity: CartIdentity,
    Path(item_id): Path<CartItemId>,
    ApiJson(body): ApiJson<UpdateItemRequest>,
) -> Result<ApiResponse<Option<CartItem>>> {
    let cart = identity.resolve(state.identity()).await?;
    let (item, _cart) = state
        .carts()
        .update_item_quantity(cart.id, item_id, body.quantity)
        .await?;

    let message = if item.is_some() {
        "Cart updated"
    } else {
        "Item removed from cart"
    };
    Ok(ApiResponse::ok(item).with_message(message))
}

/// Remove an item. Removing an item that is already gone succeeds.
#[instrument(skip(state, identity), fields(item_id = %item_id))]
pub async fn remove_item(
    State(state): State<AppState>,
    identity: CartIdentity,
    Path(item_id): Path<CartItemId>,
) -> Result<ApiResponse<CartView>> {
    let cart = identity.resolve(state.identity()).await?;
    let cart = state.carts().remove_item(cart.id, item_id).await?;
    Ok(ApiResponse::ok(cart.into()).with_message("Item removed from cart"))
}

/// Empty the cart.
#[instrument(skip(state, identity))]
pub async fn clear(
    State(state): State<AppState>,
    identity: CartIdentity,
) -> Result<ApiResponse<CartView>> {
    let cart = identity.resolve(state.identity()).await?;
    let cart = state.carts().clear(cart.id).await?;
    Ok(ApiResponse::ok(cart.into()).with_message("Cart cleared"))
}

/// Item count for the cart badge. Does not create a cart.
#[instrument(skip(state, identity))]
pub async fn count(
    State(state): State<AppState>,
    ExistingIdentity(identity): ExistingIdentity,
) -> Result<ApiResponse<ItemCount>> {
    let count = state
        .identity()
        .resolve_existing(&identity)
        .await?
        .map_or(0, |cart| CartStore::item_count(&cart));
    Ok(ApiResponse::ok(ItemCount { count }))
}
