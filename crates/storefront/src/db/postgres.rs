//! `PostgreSQL` storage backend.
//!
//! Queries are built at runtime with `sqlx::query_as` and mapped through
//! `FromRow` row structs, so the crate builds without a live database.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};

use larder_core::{
    Address, AddressKind, CartId, CartItemId, CurrencyCode, Email, OrderId, OrderItemId,
    OrderStatus, PaymentStatus, ProductId, ProductStatus, ProductType, UserId, VariationId,
};

use super::RepositoryError;
use super::store::{Store, StoreTx};
use crate::models::{
    Cart, CartItem, CatalogProduct, CatalogVariation, NewCartItem, NewOrder, Order, OrderAddress,
    OrderItem, SessionToken, Shopper, StockKey, StockLevel,
};

/// Storage backed by a `PostgreSQL` pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, RepositoryError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

// =============================================================================
// Rows
// =============================================================================

const CART_COLUMNS: &str = "id, user_id, session_token, expires_at, created_at, updated_at";

#[derive(FromRow)]
struct CartRow {
    id: CartId,
    user_id: Option<UserId>,
    session_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CartRow {
    fn into_cart(self, items: Vec<CartItem>) -> Result<Cart, RepositoryError> {
        let owner = match (self.user_id, self.session_token) {
            (Some(user_id), None) => Shopper::User(user_id),
            (None, Some(token)) => Shopper::Guest(SessionToken::parse(&token).ok_or_else(|| {
                RepositoryError::DataCorruption(format!("invalid session token on cart {}", self.id))
            })?),
            _ => {
                return Err(RepositoryError::DataCorruption(format!(
                    "cart {} must have exactly one owner",
                    self.id
                )));
            }
        };
        Ok(Cart {
            id: self.id,
            owner,
            expires_at: self.expires_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
            items,
        })
    }
}

const CART_ITEM_COLUMNS: &str =
    "id, cart_id, product_id, variation_id, quantity, price, created_at, updated_at";

#[derive(FromRow)]
struct CartItemRow {
    id: CartItemId,
    cart_id: CartId,
    product_id: ProductId,
    variation_id: Option<VariationId>,
    quantity: i32,
    price: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CartItemRow> for CartItem {
    type Error = RepositoryError;

    fn try_from(row: CartItemRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            cart_id: row.cart_id,
            product_id: row.product_id,
            variation_id: row.variation_id,
            quantity: quantity_from_db(row.quantity)?,
            price: row.price,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct ProductRow {
    id: ProductId,
    name: String,
    sku: Option<String>,
    product_type: ProductType,
    status: ProductStatus,
    price: Decimal,
    stock_quantity: i32,
    alert_threshold: i32,
}

#[derive(FromRow)]
struct VariationRow {
    id: VariationId,
    product_id: ProductId,
    sku: Option<String>,
    price: Decimal,
    stock_quantity: i32,
    alert_threshold: i32,
    attributes: Json<BTreeMap<String, String>>,
    is_active: bool,
}

#[derive(FromRow)]
struct StockRow {
    stock_quantity: i32,
    alert_threshold: i32,
}

const ORDER_COLUMNS: &str = "id, order_number, user_id, session_token, cart_id, \
    payment_intent_id, currency, total, status, payment_status, needs_review, review_note, \
    created_at, updated_at, paid_at";

#[derive(FromRow)]
struct OrderRow {
    id: OrderId,
    order_number: String,
    user_id: Option<UserId>,
    session_token: Option<String>,
    cart_id: Option<CartId>,
    payment_intent_id: String,
    currency: String,
    total: Decimal,
    status: OrderStatus,
    payment_status: PaymentStatus,
    needs_review: bool,
    review_note: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
}

#[derive(FromRow)]
struct OrderItemRow {
    id: OrderItemId,
    order_id: OrderId,
    product_id: ProductId,
    variation_id: Option<VariationId>,
    product_name: String,
    sku: Option<String>,
    quantity: i32,
    unit_price: Decimal,
    line_total: Decimal,
}

#[derive(FromRow)]
struct OrderAddressRow {
    kind: AddressKind,
    first_name: String,
    last_name: String,
    email: String,
    phone: Option<String>,
    line1: String,
    line2: Option<String>,
    city: String,
    state: String,
    postal_code: String,
    country: String,
}

impl TryFrom<OrderAddressRow> for OrderAddress {
    type Error = RepositoryError;

    fn try_from(row: OrderAddressRow) -> Result<Self, Self::Error> {
        let email = Email::parse(&row.email).map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid email in database: {e}"))
        })?;
        Ok(Self {
            kind: row.kind,
            address: Address {
                first_name: row.first_name,
                last_name: row.last_name,
                email,
                phone: row.phone,
                line1: row.line1,
                line2: row.line2,
                city: row.city,
                state: row.state,
                postal_code: row.postal_code,
                country: row.country,
            },
        })
    }
}

fn quantity_from_db(quantity: i32) -> Result<u32, RepositoryError> {
    u32::try_from(quantity)
        .map_err(|_| RepositoryError::DataCorruption(format!("negative quantity {quantity}")))
}

fn quantity_to_db(quantity: u32) -> Result<i32, RepositoryError> {
    i32::try_from(quantity)
        .map_err(|_| RepositoryError::Conflict(format!("quantity {quantity} out of range")))
}

fn map_unique_violation(e: sqlx::Error, message: &str) -> RepositoryError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_unique_violation()
    {
        return RepositoryError::Conflict(message.to_owned());
    }
    RepositoryError::Database(e)
}

// =============================================================================
// Loaders
// =============================================================================

impl PgTx {
    async fn load_cart(&mut self, row: Option<CartRow>) -> Result<Option<Cart>, RepositoryError> {
        let Some(row) = row else {
            return Ok(None);
        };
        let items = sqlx::query_as::<_, CartItemRow>(&format!(
            "SELECT {CART_ITEM_COLUMNS} FROM storefront.cart_items WHERE cart_id = $1 ORDER BY id"
        ))
        .bind(row.id)
        .fetch_all(&mut *self.tx)
        .await?
        .into_iter()
        .map(CartItem::try_from)
        .collect::<Result<Vec<_>, _>>()?;
        row.into_cart(items).map(Some)
    }

    async fn load_order(&mut self, row: Option<OrderRow>) -> Result<Option<Order>, RepositoryError> {
        let Some(row) = row else {
            return Ok(None);
        };

        let items = sqlx::query_as::<_, OrderItemRow>(
            r"
            SELECT id, order_id, product_id, variation_id, product_name, sku,
                   quantity, unit_price, line_total
            FROM storefront.order_items
            WHERE order_id = $1
            ORDER BY id
            ",
        )
        .bind(row.id)
        .fetch_all(&mut *self.tx)
        .await?
        .into_iter()
        .map(|r| {
            Ok(OrderItem {
                id: r.id,
                order_id: r.order_id,
                product_id: r.product_id,
                variation_id: r.variation_id,
                product_name: r.product_name,
                sku: r.sku,
                quantity: quantity_from_db(r.quantity)?,
                unit_price: r.unit_price,
                line_total: r.line_total,
            })
        })
        .collect::<Result<Vec<_>, RepositoryError>>()?;

        let addresses = sqlx::query_as::<_, OrderAddressRow>(
            r"
            SELECT kind, first_name, last_name, email, phone, line1, line2,
                   city, state, postal_code, country
            FROM storefront.order_addresses
            WHERE order_id = $1
            ORDER BY kind
            ",
        )
        .bind(row.id)
        .fetch_all(&mut *self.tx)
        .await?
        .into_iter()
        .map(OrderAddress::try_from)
        .collect::<Result<Vec<_>, _>>()?;

        let currency = row.currency.parse::<CurrencyCode>().map_err(|e| {
            RepositoryError::DataCorruption(format!("order {}: {e}", row.id))
        })?;
        let session_token = match row.session_token {
            Some(token) => Some(SessionToken::parse(&token).ok_or_else(|| {
                RepositoryError::DataCorruption(format!("invalid session token on order {}", row.id))
            })?),
            None => None,
        };

        Ok(Some(Order {
            id: row.id,
            order_number: row.order_number,
            user_id: row.user_id,
            session_token,
            cart_id: row.cart_id,
            payment_intent_id: row.payment_intent_id,
            currency,
            total: row.total,
            status: row.status,
            payment_status: row.payment_status,
            needs_review: row.needs_review,
            review_note: row.review_note,
            created_at: row.created_at,
            updated_at: row.updated_at,
            paid_at: row.paid_at,
            items,
            addresses,
        }))
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn find_cart(&mut self, owner: &Shopper) -> Result<Option<Cart>, RepositoryError> {
        let row = match owner {
            Shopper::User(user_id) => {
                sqlx::query_as::<_, CartRow>(&format!(
                    "SELECT {CART_COLUMNS} FROM storefront.carts WHERE user_id = $1 FOR UPDATE"
                ))
                .bind(*user_id)
                .fetch_optional(&mut *self.tx)
                .await?
            }
            Shopper::Guest(token) => {
                sqlx::query_as::<_, CartRow>(&format!(
                    "SELECT {CART_COLUMNS} FROM storefront.carts \
                     WHERE session_token = $1 FOR UPDATE"
                ))
                .bind(token.as_str())
                .fetch_optional(&mut *self.tx)
                .await?
            }
        };
        self.load_cart(row).await
    }

    async fn get_or_create_cart(
        &mut self,
        owner: &Shopper,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Cart, RepositoryError> {
        // Concurrent first requests race on the unique owner columns; the
        // loser's insert is a no-op and both read the winner's row.
        match owner {
            Shopper::User(user_id) => {
                sqlx::query(
                    r"
                    INSERT INTO storefront.carts (user_id, expires_at)
                    VALUES ($1, $2)
                    ON CONFLICT (user_id) DO NOTHING
                    ",
                )
                .bind(*user_id)
                .bind(expires_at)
                .execute(&mut *self.tx)
                .await?;
            }
            Shopper::Guest(token) => {
                sqlx::query(
                    r"
                    INSERT INTO storefront.carts (session_token, expires_at)
                    VALUES ($1, $2)
                    ON CONFLICT (session_token) DO NOTHING
                    ",
                )
                .bind(token.as_str())
                .bind(expires_at)
                .execute(&mut *self.tx)
                .await?;
            }
        }
        self.find_cart(owner).await?.ok_or(RepositoryError::NotFound)
    }

    async fn lock_cart(&mut self, id: CartId) -> Result<Option<Cart>, RepositoryError> {
        let row = sqlx::query_as::<_, CartRow>(&format!(
            "SELECT {CART_COLUMNS} FROM storefront.carts WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        self.load_cart(row).await
    }

    async fn set_cart_expiry(
        &mut self,
        id: CartId,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE storefront.carts SET expires_at = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(expires_at)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn delete_cart(&mut self, id: CartId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM storefront.carts WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_cart_item(&mut self, item: &NewCartItem) -> Result<CartItem, RepositoryError> {
        let row = sqlx::query_as::<_, CartItemRow>(&format!(
            r"
            INSERT INTO storefront.cart_items (cart_id, product_id, variation_id, quantity, price)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {CART_ITEM_COLUMNS}
            "
        ))
        .bind(item.cart_id)
        .bind(item.product_id)
        .bind(item.variation_id)
        .bind(quantity_to_db(item.quantity)?)
        .bind(item.price)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_unique_violation(e, "cart already has a line for this product"))?;

        sqlx::query("UPDATE storefront.carts SET updated_at = NOW() WHERE id = $1")
            .bind(item.cart_id)
            .execute(&mut *self.tx)
            .await?;

        CartItem::try_from(row)
    }

    async fn update_cart_item_quantity(
        &mut self,
        id: CartItemId,
        quantity: u32,
    ) -> Result<CartItem, RepositoryError> {
        let row = sqlx::query_as::<_, CartItemRow>(&format!(
            r"
            UPDATE storefront.cart_items
            SET quantity = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {CART_ITEM_COLUMNS}
            "
        ))
        .bind(id)
        .bind(quantity_to_db(quantity)?)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(RepositoryError::NotFound)?;
        CartItem::try_from(row)
    }

    async fn delete_cart_item(
        &mut self,
        cart_id: CartId,
        id: CartItemId,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM storefront.cart_items WHERE id = $1 AND cart_id = $2")
            .bind(id)
            .bind(cart_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_cart(&mut self, id: CartId) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM storefront.cart_items WHERE cart_id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        sqlx::query("UPDATE storefront.carts SET updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_expired_guest_carts(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r"
            DELETE FROM storefront.carts
            WHERE session_token IS NOT NULL
              AND expires_at < $1
            ",
        )
        .bind(now)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn product(&mut self, id: ProductId) -> Result<Option<CatalogProduct>, RepositoryError> {
        let row = sqlx::query_as::<_, ProductRow>(
            r"
            SELECT id, name, sku, product_type, status, price, stock_quantity, alert_threshold
            FROM storefront.products
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(|r| CatalogProduct {
            id: r.id,
            name: r.name,
            sku: r.sku,
            product_type: r.product_type,
            status: r.status,
            price: r.price,
            stock_quantity: r.stock_quantity,
            alert_threshold: r.alert_threshold,
        }))
    }

    async fn variation(
        &mut self,
        id: VariationId,
    ) -> Result<Option<CatalogVariation>, RepositoryError> {
        let row = sqlx::query_as::<_, VariationRow>(
            r"
            SELECT id, product_id, sku, price, stock_quantity, alert_threshold,
                   attributes, is_active
            FROM storefront.product_variations
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(|r| CatalogVariation {
            id: r.id,
            product_id: r.product_id,
            sku: r.sku,
            price: r.price,
            stock_quantity: r.stock_quantity,
            alert_threshold: r.alert_threshold,
            attributes: r.attributes.0,
            is_active: r.is_active,
        }))
    }

    async fn stock_level(&mut self, key: StockKey) -> Result<Option<StockLevel>, RepositoryError> {
        let query = match key {
            StockKey::Product(id) => sqlx::query_as::<_, StockRow>(
                "SELECT stock_quantity, alert_threshold FROM storefront.products WHERE id = $1",
            )
            .bind(id.as_i64()),
            StockKey::Variation(id) => sqlx::query_as::<_, StockRow>(
                "SELECT stock_quantity, alert_threshold \
                 FROM storefront.product_variations WHERE id = $1",
            )
            .bind(id.as_i64()),
        };
        let row = query.fetch_optional(&mut *self.tx).await?;
        Ok(row.map(|r| StockLevel {
            key,
            stock_quantity: r.stock_quantity,
            alert_threshold: r.alert_threshold,
        }))
    }

    async fn decrement_stock(
        &mut self,
        key: StockKey,
        quantity: u32,
    ) -> Result<Option<StockLevel>, RepositoryError> {
        let Ok(quantity) = i32::try_from(quantity) else {
            return Ok(None);
        };
        // Single conditional update: the row lock taken by UPDATE serializes
        // concurrent decrements of the same counter.
        let query = match key {
            StockKey::Product(id) => sqlx::query_as::<_, StockRow>(
                r"
                UPDATE storefront.products
                SET stock_quantity = stock_quantity - $2, updated_at = NOW()
                WHERE id = $1 AND stock_quantity >= $2
                RETURNING stock_quantity, alert_threshold
                ",
            )
            .bind(id.as_i64()),
            StockKey::Variation(id) => sqlx::query_as::<_, StockRow>(
                r"
                UPDATE storefront.product_variations
                SET stock_quantity = stock_quantity - $2, updated_at = NOW()
                WHERE id = $1 AND stock_quantity >= $2
                RETURNING stock_quantity, alert_threshold
                ",
            )
            .bind(id.as_i64()),
        };
        let row = query
            .bind(quantity)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(|r| StockLevel {
            key,
            stock_quantity: r.stock_quantity,
            alert_threshold: r.alert_threshold,
        }))
    }

    async fn insert_order(
        &mut self,
        order: &NewOrder,
        order_number: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        let id: Option<OrderId> = sqlx::query_scalar(
            r"
            INSERT INTO storefront.orders
                (order_number, user_id, session_token, cart_id, payment_intent_id,
                 currency, total, status, payment_status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', 'pending')
            ON CONFLICT (order_number) DO NOTHING
            RETURNING id
            ",
        )
        .bind(order_number)
        .bind(order.user_id)
        .bind(order.session_token.as_ref().map(SessionToken::as_str))
        .bind(order.cart_id)
        .bind(&order.payment_intent_id)
        .bind(order.currency.as_str())
        .bind(order.total)
        .fetch_optional(&mut *self.tx)
        .await?;

        let Some(id) = id else {
            return Ok(None);
        };

        for item in &order.items {
            sqlx::query(
                r"
                INSERT INTO storefront.order_items
                    (order_id, product_id, variation_id, product_name, sku,
                     quantity, unit_price, line_total)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ",
            )
            .bind(id)
            .bind(item.product_id)
            .bind(item.variation_id)
            .bind(&item.product_name)
            .bind(item.sku.as_deref())
            .bind(quantity_to_db(item.quantity)?)
            .bind(item.unit_price)
            .bind(item.line_total)
            .execute(&mut *self.tx)
            .await?;
        }

        for (kind, address) in [
            (AddressKind::Shipping, &order.shipping),
            (AddressKind::Billing, &order.billing),
        ] {
            sqlx::query(
                r"
                INSERT INTO storefront.order_addresses
                    (order_id, kind, first_name, last_name, email, phone,
                     line1, line2, city, state, postal_code, country)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                ",
            )
            .bind(id)
            .bind(kind)
            .bind(&address.first_name)
            .bind(&address.last_name)
            .bind(address.email.as_str())
            .bind(address.phone.as_deref())
            .bind(&address.line1)
            .bind(address.line2.as_deref())
            .bind(&address.city)
            .bind(&address.state)
            .bind(&address.postal_code)
            .bind(&address.country)
            .execute(&mut *self.tx)
            .await?;
        }

        self.find_order(id, false).await
    }

    async fn find_order(
        &mut self,
        id: OrderId,
        for_update: bool,
    ) -> Result<Option<Order>, RepositoryError> {
        let lock = if for_update { " FOR UPDATE" } else { "" };
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM storefront.orders WHERE id = $1{lock}"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        self.load_order(row).await
    }

    async fn find_order_by_intent(
        &mut self,
        payment_intent_id: &str,
    ) -> Result<Option<OrderId>, RepositoryError> {
        let id = sqlx::query_scalar::<_, OrderId>(
            r"
            SELECT id FROM storefront.orders
            WHERE payment_intent_id = $1
            ORDER BY id DESC
            LIMIT 1
            ",
        )
        .bind(payment_intent_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(id)
    }

    async fn update_order_status(
        &mut self,
        id: OrderId,
        status: OrderStatus,
        payment_status: PaymentStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<Order, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE storefront.orders
            SET status = $2,
                payment_status = $3,
                paid_at = COALESCE($4, paid_at),
                updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(status)
        .bind(payment_status)
        .bind(paid_at)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        self.find_order(id, false)
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    async fn reassign_orders(
        &mut self,
        from: CartId,
        to: CartId,
        user_id: UserId,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE storefront.orders
            SET cart_id = $2, user_id = COALESCE(user_id, $3), updated_at = NOW()
            WHERE cart_id = $1
            ",
        )
        .bind(from)
        .bind(to)
        .bind(user_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn flag_order(&mut self, id: OrderId, note: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE storefront.orders
            SET needs_review = TRUE, review_note = $2, updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(note)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        self.tx.commit().await?;
        Ok(())
    }
}
