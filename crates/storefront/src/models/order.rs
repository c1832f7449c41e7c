//! Orders materialized from a cart at checkout.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use larder_core::{
    Address, AddressKind, CartId, CurrencyCode, OrderId, OrderItemId, OrderStatus, PaymentStatus,
    ProductId, UserId, VariationId,
};

use super::cart::SessionToken;
use super::session::IdentityContext;

/// A line copied from the cart when the order was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub variation_id: Option<VariationId>,
    pub product_name: String,
    pub sku: Option<String>,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

/// Address snapshot attached to an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderAddress {
    pub kind: AddressKind,
    #[serde(flatten)]
    pub address: Address,
}

/// An order with its items and addresses.
#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub id: OrderId,
    pub order_number: String,
    pub user_id: Option<UserId>,
    /// Guest session that placed the order.
    #[serde(skip)]
    pub session_token: Option<SessionToken>,
    /// Source cart. Cleared once the cart is reaped.
    pub cart_id: Option<CartId>,
    pub payment_intent_id: String,
    pub currency: CurrencyCode,
    pub total: Decimal,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    /// Staff-only; kept out of API responses.
    #[serde(skip)]
    pub needs_review: bool,
    #[serde(skip)]
    pub review_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub items: Vec<OrderItem>,
    pub addresses: Vec<OrderAddress>,
}

impl Order {
    #[must_use]
    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Paid
    }

    #[must_use]
    pub fn address(&self, kind: AddressKind) -> Option<&Address> {
        self.addresses
            .iter()
            .find(|a| a.kind == kind)
            .map(|a| &a.address)
    }

    /// Whether the given identity placed this order.
    #[must_use]
    pub fn is_visible_to(&self, identity: &IdentityContext) -> bool {
        match (self.user_id, identity.user_id) {
            (Some(owner), Some(caller)) => owner == caller,
            (Some(_), None) => false,
            (None, _) => self
                .session_token
                .as_ref()
                .is_some_and(|token| identity.session_token.as_ref() == Some(token)),
        }
    }

    /// Where this order stands in the checkout protocol.
    #[must_use]
    pub fn checkout_state(&self, now: DateTime<Utc>, intent_ttl: Duration) -> CheckoutState {
        match (self.status, self.payment_status) {
            (_, PaymentStatus::Paid | PaymentStatus::Refunded) => CheckoutState::ConfirmedSuccess,
            (_, PaymentStatus::Failed) | (OrderStatus::Cancelled, _) => {
                CheckoutState::ConfirmedFailed
            }
            _ if self.created_at + intent_ttl < now => CheckoutState::Expired,
            _ => CheckoutState::IntentCreated,
        }
    }
}

/// Checkout protocol state, derived from the order rather than stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutState {
    /// No intent has been created for the cart yet.
    Initiated,
    /// Pending order bound to a gateway intent.
    IntentCreated,
    ConfirmedSuccess,
    ConfirmedFailed,
    /// Pending order whose intent was never confirmed in time.
    Expired,
}

impl CheckoutState {
    #[must_use]
    pub fn of(order: Option<&Order>, now: DateTime<Utc>, intent_ttl: Duration) -> Self {
        order.map_or(Self::Initiated, |o| o.checkout_state(now, intent_ttl))
    }
}

/// Line values for a new order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrderItem {
    pub product_id: ProductId,
    pub variation_id: Option<VariationId>,
    pub product_name: String,
    pub sku: Option<String>,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

/// Everything needed to insert a pending order, minus its number.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: Option<UserId>,
    pub session_token: Option<SessionToken>,
    pub cart_id: CartId,
    pub payment_intent_id: String,
    pub currency: CurrencyCode,
    pub total: Decimal,
    pub items: Vec<NewOrderItem>,
    pub shipping: Address,
    pub billing: Address,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn order() -> Order {
        Order {
            id: OrderId::new(1),
            order_number: "ORD-20260101-ABC123".into(),
            user_id: None,
            session_token: Some(SessionToken::generate()),
            cart_id: Some(CartId::new(1)),
            payment_intent_id: "pi_1".into(),
            currency: CurrencyCode::Usd,
            total: Decimal::new(4500, 2),
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            needs_review: false,
            review_note: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            paid_at: None,
            items: Vec::new(),
            addresses: Vec::new(),
        }
    }

    #[test]
    fn test_checkout_state_derivation() {
        let ttl = Duration::hours(24);
        let now = Utc::now();
        let mut o = order();
        assert_eq!(o.checkout_state(now, ttl), CheckoutState::IntentCreated);

        o.created_at = now - Duration::hours(25);
        assert_eq!(o.checkout_state(now, ttl), CheckoutState::Expired);

        o.payment_status = PaymentStatus::Paid;
        assert_eq!(o.checkout_state(now, ttl), CheckoutState::ConfirmedSuccess);

        o.payment_status = PaymentStatus::Failed;
        assert_eq!(o.checkout_state(now, ttl), CheckoutState::ConfirmedFailed);

        assert_eq!(CheckoutState::of(None, now, ttl), CheckoutState::Initiated);
    }

    #[test]
    fn test_review_fields_stay_out_of_json() {
        let mut o = order();
        o.needs_review = true;
        o.review_note = Some("stock ran out; payment pi_1 needs manual review".into());

        let json = serde_json::to_value(&o).unwrap();
        assert!(json.get("needs_review").is_none());
        assert!(json.get("review_note").is_none());
        assert!(json.get("session_token").is_none());
        assert_eq!(json["payment_intent_id"], "pi_1");
    }

    #[test]
    fn test_guest_visibility_requires_matching_token() {
        let o = order();
        let owner = IdentityContext {
            user_id: None,
            session_token: o.session_token.clone(),
        };
        let stranger = IdentityContext {
            user_id: None,
            session_token: Some(SessionToken::generate()),
        };
        assert!(o.is_visible_to(&owner));
        assert!(!o.is_visible_to(&stranger));
    }

    #[test]
    fn test_user_order_hidden_from_guests() {
        let mut o = order();
        o.user_id = Some(UserId::new(9));
        let guest = IdentityContext {
            user_id: None,
            session_token: o.session_token.clone(),
        };
        assert!(!o.is_visible_to(&guest));
        assert!(o.is_visible_to(&IdentityContext {
            user_id: Some(UserId::new(9)),
            session_token: None,
        }));
    }
}
