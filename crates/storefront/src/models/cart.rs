//! Cart aggregate.

use core::fmt;

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;
use rust_decimal::Decimal;
use serde::Serialize;

use larder_core::money::{line_total, round_money};
use larder_core::{CartId, CartItemId, ProductId, UserId, VariationId};

/// Largest quantity a single cart line may hold.
pub const MAX_ITEM_QUANTITY: u32 = 99;

const TOKEN_LENGTH: usize = 40;
const MIN_TOKEN_LENGTH: usize = 16;
const MAX_TOKEN_LENGTH: usize = 128;

/// Opaque guest identity stored client-side in the session cookie.
#[derive(Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Generate a fresh random token.
    #[must_use]
    pub fn generate() -> Self {
        let token = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LENGTH)
            .map(char::from)
            .collect();
        Self(token)
    }

    /// Accept a token coming back from the client.
    ///
    /// Returns `None` for values that could not have been issued by
    /// [`SessionToken::generate`].
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let ok = (MIN_TOKEN_LENGTH..=MAX_TOKEN_LENGTH).contains(&value.len())
            && value.chars().all(|c| c.is_ascii_alphanumeric());
        ok.then(|| Self(value.to_owned()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Tokens are credentials; keep them out of logs.
impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = self.0.get(..4).unwrap_or("");
        write!(f, "SessionToken({prefix}…)")
    }
}

/// Who a cart (or an order) belongs to. Exactly one identity, never both.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Shopper {
    User(UserId),
    Guest(SessionToken),
}

impl Shopper {
    #[must_use]
    pub const fn user_id(&self) -> Option<UserId> {
        match self {
            Self::User(id) => Some(*id),
            Self::Guest(_) => None,
        }
    }

    #[must_use]
    pub const fn session_token(&self) -> Option<&SessionToken> {
        match self {
            Self::User(_) => None,
            Self::Guest(token) => Some(token),
        }
    }

    #[must_use]
    pub const fn is_guest(&self) -> bool {
        matches!(self, Self::Guest(_))
    }
}

/// One product/variation line with its price snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartItem {
    pub id: CartItemId,
    pub cart_id: CartId,
    pub product_id: ProductId,
    pub variation_id: Option<VariationId>,
    pub quantity: u32,
    /// Unit price captured when the line was first added.
    pub price: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CartItem {
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        line_total(self.price, self.quantity)
    }

    #[must_use]
    pub fn matches(&self, product_id: ProductId, variation_id: Option<VariationId>) -> bool {
        self.product_id == product_id && self.variation_id == variation_id
    }
}

/// Values for inserting a new cart line.
#[derive(Debug, Clone)]
pub struct NewCartItem {
    pub cart_id: CartId,
    pub product_id: ProductId,
    pub variation_id: Option<VariationId>,
    pub quantity: u32,
    pub price: Decimal,
}

/// A shopping cart with its items loaded.
#[derive(Debug, Clone)]
pub struct Cart {
    pub id: CartId,
    pub owner: Shopper,
    /// `None` for user carts; guest carts expire.
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Ordered by insertion.
    pub items: Vec<CartItem>,
}

impl Cart {
    /// Sum of `price × quantity` over the loaded items.
    #[must_use]
    pub fn total(&self) -> Decimal {
        round_money(self.items.iter().map(CartItem::line_total).sum())
    }

    /// Sum of quantities over the loaded items.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn item(&self, id: CartItemId) -> Option<&CartItem> {
        self.items.iter().find(|item| item.id == id)
    }

    #[must_use]
    pub fn line_for(
        &self,
        product_id: ProductId,
        variation_id: Option<VariationId>,
    ) -> Option<&CartItem> {
        self.items
            .iter()
            .find(|item| item.matches(product_id, variation_id))
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.owner.is_guest() && self.expires_at.is_some_and(|at| at < now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: i64, product: i64, variation: Option<i64>, quantity: u32, price: &str) -> CartItem {
        CartItem {
            id: CartItemId::new(id),
            cart_id: CartId::new(1),
            product_id: ProductId::new(product),
            variation_id: variation.map(VariationId::new),
            quantity,
            price: price.parse().unwrap_or_default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn cart(items: Vec<CartItem>) -> Cart {
        Cart {
            id: CartId::new(1),
            owner: Shopper::Guest(SessionToken::generate()),
            expires_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            items,
        }
    }

    #[test]
    fn test_total_and_count_are_derived() {
        let cart = cart(vec![
            item(1, 10, None, 3, "10.00"),
            item(2, 11, Some(5), 2, "7.50"),
        ]);
        assert_eq!(cart.total().to_string(), "45.00");
        assert_eq!(cart.item_count(), 5);
    }

    #[test]
    fn test_empty_cart_totals() {
        let cart = cart(Vec::new());
        assert!(cart.is_empty());
        assert_eq!(cart.total().to_string(), "0.00");
        assert_eq!(cart.item_count(), 0);
    }

    #[test]
    fn test_line_lookup_distinguishes_variations() {
        let cart = cart(vec![item(1, 10, None, 1, "1.00"), item(2, 10, Some(3), 1, "2.00")]);
        assert_eq!(
            cart.line_for(ProductId::new(10), None).map(|i| i.id),
            Some(CartItemId::new(1))
        );
        assert_eq!(
            cart.line_for(ProductId::new(10), Some(VariationId::new(3)))
                .map(|i| i.id),
            Some(CartItemId::new(2))
        );
        assert!(cart.line_for(ProductId::new(10), Some(VariationId::new(4))).is_none());
    }

    #[test]
    fn test_session_token_parse() {
        let token = SessionToken::generate();
        assert_eq!(token.as_str().len(), 40);
        assert_eq!(SessionToken::parse(token.as_str()), Some(token));
        assert!(SessionToken::parse("short").is_none());
        assert!(SessionToken::parse("has spaces in it but long enough").is_none());
    }

    #[test]
    fn test_session_token_debug_is_redacted() {
        let token = SessionToken::generate();
        let debug = format!("{token:?}");
        assert!(!debug.contains(token.as_str()));
    }

    #[test]
    fn test_guest_cart_expiry() {
        let mut cart = cart(Vec::new());
        let now = Utc::now();
        cart.expires_at = Some(now - chrono::Duration::minutes(1));
        assert!(cart.is_expired(now));

        cart.owner = Shopper::User(UserId::new(1));
        assert!(!cart.is_expired(now));
    }
}
