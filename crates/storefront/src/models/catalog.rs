//! Read-only view of the catalog.
//!
//! Catalog CRUD lives elsewhere; the engine only reads prices, stock and
//! purchasability, and decrements stock counters when an order is paid.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Serialize;

use larder_core::{ProductId, ProductStatus, ProductType, VariationId};

/// A product as the engine sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogProduct {
    pub id: ProductId,
    pub name: String,
    pub sku: Option<String>,
    pub product_type: ProductType,
    pub status: ProductStatus,
    pub price: Decimal,
    pub stock_quantity: i32,
    pub alert_threshold: i32,
}

impl CatalogProduct {
    /// Only published products can be added to a cart or bought.
    #[must_use]
    pub fn is_purchasable(&self) -> bool {
        self.status == ProductStatus::Published
    }

    #[must_use]
    pub fn is_variable(&self) -> bool {
        self.product_type == ProductType::Variable
    }
}

/// One purchasable variation of a variable product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogVariation {
    pub id: VariationId,
    pub product_id: ProductId,
    pub sku: Option<String>,
    pub price: Decimal,
    pub stock_quantity: i32,
    pub alert_threshold: i32,
    /// Option name to value, e.g. `size => "L"`. Opaque to the engine.
    pub attributes: BTreeMap<String, String>,
    pub is_active: bool,
}

/// Which stock counter an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StockKey {
    Product(ProductId),
    Variation(VariationId),
}

impl StockKey {
    /// The variation counter when a variation is given, else the product's.
    #[must_use]
    pub const fn resolve(product_id: ProductId, variation_id: Option<VariationId>) -> Self {
        match variation_id {
            Some(id) => Self::Variation(id),
            None => Self::Product(product_id),
        }
    }
}

impl std::fmt::Display for StockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Product(id) => write!(f, "product {id}"),
            Self::Variation(id) => write!(f, "variation {id}"),
        }
    }
}

/// Current value of a stock counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockLevel {
    pub key: StockKey,
    pub stock_quantity: i32,
    pub alert_threshold: i32,
}

impl StockLevel {
    /// Quantity available for sale, never negative.
    #[must_use]
    pub fn available(&self) -> u32 {
        u32::try_from(self.stock_quantity).unwrap_or(0)
    }

    #[must_use]
    pub const fn is_low(&self) -> bool {
        self.stock_quantity <= self.alert_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stock_key_prefers_variation() {
        assert_eq!(
            StockKey::resolve(ProductId::new(1), Some(VariationId::new(7))),
            StockKey::Variation(VariationId::new(7))
        );
        assert_eq!(
            StockKey::resolve(ProductId::new(1), None),
            StockKey::Product(ProductId::new(1))
        );
    }

    #[test]
    fn test_stock_level_available_clamps() {
        let level = StockLevel {
            key: StockKey::Product(ProductId::new(1)),
            stock_quantity: -3,
            alert_threshold: 2,
        };
        assert_eq!(level.available(), 0);
        assert!(level.is_low());
    }
}
