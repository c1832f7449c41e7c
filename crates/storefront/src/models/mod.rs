//! Domain models for the cart and checkout engine.
//!
//! Models are plain aggregates: storage loads them fully (a cart always
//! comes with its items, an order with its items and addresses), and the
//! derived values (`Cart::total`, `Cart::item_count`) are computed from what
//! was loaded.

pub mod cart;
pub mod catalog;
pub mod order;
pub mod session;

pub use cart::{Cart, CartItem, MAX_ITEM_QUANTITY, NewCartItem, SessionToken, Shopper};
pub use catalog::{CatalogProduct, CatalogVariation, StockKey, StockLevel};
pub use order::{CheckoutState, NewOrder, NewOrderItem, Order, OrderAddress, OrderItem};
pub use session::{CurrentUser, IdentityContext, session_keys};
