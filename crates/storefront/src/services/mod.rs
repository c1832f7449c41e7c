//! Cart and checkout engine.
//!
//! # Services
//!
//! - `stock` - Stock availability, atomic decrements and low-stock events
//! - `cart` - Cart item mutation
//! - `identity` - Resolving a caller to their cart, merge on login
//! - `orders` - Order numbers and order persistence
//! - `checkout` - Two-phase checkout against the payment gateway
//! - `reaper` - Background cleanup of abandoned guest carts
//!
//! Services hold an `Arc<dyn Store>` and open their own transactions; none
//! keeps a transaction open across a gateway call.

pub mod cart;
pub mod checkout;
pub mod identity;
pub mod orders;
pub mod reaper;
pub mod stock;

pub use cart::{CartError, CartStore};
pub use checkout::{CheckoutError, CheckoutOrchestrator, CheckoutSettings, IntentCreated};
pub use identity::CartIdentityResolver;
pub use orders::{CartSnapshot, OrderError, OrderMaterializer, generate_order_number};
pub use reaper::ExpiryReaper;
pub use stock::{LowStockEvent, StockDecrement, StockError, StockLedger, spawn_low_stock_logger};

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod fixtures {
    use std::collections::BTreeMap;

    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use larder_core::money::line_total;
    use larder_core::{
        Address, AddressInput, CurrencyCode, ProductId, ProductStatus, ProductType, UserId,
        VariationId,
    };

    use crate::db::{MemoryStore, Store};
    use crate::models::{
        Cart, CatalogProduct, CatalogVariation, NewOrder, NewOrderItem, SessionToken, Shopper,
    };

    pub const USER: UserId = UserId::new(501);

    /// Simple, 10.00, 50 in stock.
    pub const JAR: ProductId = ProductId::new(1);
    /// Simple, 4.50, 20 in stock.
    pub const SPOON: ProductId = ProductId::new(2);
    /// Variable, 25.00.
    pub const APRON: ProductId = ProductId::new(3);
    /// Draft, never purchasable.
    pub const DRAFT: ProductId = ProductId::new(4);

    /// Apron size L, 27.50, 10 in stock.
    pub const LARGE_APRON: VariationId = VariationId::new(31);
    pub const INACTIVE_APRON: VariationId = VariationId::new(32);

    fn product(id: ProductId, name: &str, price: i64, stock: i32) -> CatalogProduct {
        CatalogProduct {
            id,
            name: name.to_owned(),
            sku: Some(name.to_ascii_uppercase()),
            product_type: ProductType::Simple,
            status: ProductStatus::Published,
            price: Decimal::new(price, 2),
            stock_quantity: stock,
            alert_threshold: 5,
        }
    }

    pub fn jar() -> CatalogProduct {
        product(JAR, "Jar", 1000, 50)
    }

    pub async fn seed_catalog(store: &MemoryStore) {
        store.insert_product(jar()).await;
        store.insert_product(product(SPOON, "Spoon", 450, 20)).await;
        store
            .insert_product(CatalogProduct {
                product_type: ProductType::Variable,
                ..product(APRON, "Apron", 2500, 0)
            })
            .await;
        store
            .insert_product(CatalogProduct {
                status: ProductStatus::Draft,
                ..product(DRAFT, "Draft", 100, 10)
            })
            .await;

        for (id, size, active) in [(LARGE_APRON, "L", true), (INACTIVE_APRON, "XS", false)] {
            store
                .insert_variation(CatalogVariation {
                    id,
                    product_id: APRON,
                    sku: Some(format!("APRON-{size}")),
                    price: Decimal::new(2750, 2),
                    stock_quantity: 10,
                    alert_threshold: 2,
                    attributes: BTreeMap::from([("size".to_owned(), size.to_owned())]),
                    is_active: active,
                })
                .await;
        }
    }

    /// A fresh guest cart with a new token.
    pub async fn guest_cart(store: &MemoryStore) -> Cart {
        let mut tx = store.begin().await.unwrap();
        let cart = tx
            .get_or_create_cart(
                &Shopper::Guest(SessionToken::generate()),
                Some(Utc::now() + Duration::hours(24)),
            )
            .await
            .unwrap();
        tx.commit().await.unwrap();
        cart
    }

    pub fn address_input() -> AddressInput {
        AddressInput {
            first_name: "Ada".to_owned(),
            last_name: "Lovelace".to_owned(),
            email: "ada@example.com".to_owned(),
            phone: None,
            line1: "12 Analytical Row".to_owned(),
            line2: None,
            city: "London".to_owned(),
            state: "LDN".to_owned(),
            postal_code: "N1 9GU".to_owned(),
            country: "gb".to_owned(),
        }
    }

    pub fn address() -> Address {
        address_input().validate().unwrap()
    }

    pub fn order_line(product_id: ProductId, quantity: u32, price: &str) -> NewOrderItem {
        let unit_price: Decimal = price.parse().unwrap();
        NewOrderItem {
            product_id,
            variation_id: None,
            product_name: format!("Product {product_id}"),
            sku: None,
            quantity,
            unit_price,
            line_total: line_total(unit_price, quantity),
        }
    }

    pub fn draft(cart: &Cart, payment_intent_id: &str) -> NewOrder {
        let items = vec![order_line(JAR, 1, "10.00")];
        NewOrder {
            user_id: cart.owner.user_id(),
            session_token: cart.owner.session_token().cloned(),
            cart_id: cart.id,
            payment_intent_id: payment_intent_id.to_owned(),
            currency: CurrencyCode::Usd,
            total: Decimal::new(1000, 2),
            items,
            shipping: address(),
            billing: address(),
        }
    }
}
