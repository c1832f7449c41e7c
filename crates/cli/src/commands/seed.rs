//! Seed the catalog from a YAML file.
//!
//! Products and variations are upserted by SKU, so the same file can be
//! re-run to reset prices and stock.
//!
//! ```yaml
//! products:
//!   - name: Honey Jar
//!     sku: HONEY-JAR
//!     price: "10.00"
//!     stock: 50
//!     alert_threshold: 5
//!     status: published
//!   - name: Apron
//!     sku: APRON
//!     price: "25.00"
//!     status: published
//!     variations:
//!       - sku: APRON-L
//!         price: "27.50"
//!         stock: 10
//!         attributes: { size: L }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::PgPool;
use sqlx::types::Json;
use tracing::{error, info};

use larder_core::{ProductId, ProductStatus, ProductType};
use larder_storefront::db;

use super::database_url;

/// Catalog file contents.
#[derive(Debug, Deserialize)]
pub struct CatalogFile {
    pub products: Vec<ProductSeed>,
}

#[derive(Debug, Deserialize)]
pub struct ProductSeed {
    pub name: String,
    pub sku: String,
    pub price: Decimal,
    #[serde(default)]
    pub stock: i32,
    #[serde(default)]
    pub alert_threshold: i32,
    #[serde(default)]
    pub status: ProductStatus,
    #[serde(default)]
    pub variations: Vec<VariationSeed>,
}

#[derive(Debug, Deserialize)]
pub struct VariationSeed {
    pub sku: String,
    pub price: Decimal,
    #[serde(default)]
    pub stock: i32,
    #[serde(default)]
    pub alert_threshold: i32,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

const fn default_active() -> bool {
    true
}

impl ProductSeed {
    /// Products with variations are sold through them.
    fn product_type(&self) -> ProductType {
        if self.variations.is_empty() {
            ProductType::Simple
        } else {
            ProductType::Variable
        }
    }
}

/// Check a catalog file, returning one message per problem.
#[must_use]
pub fn validate_catalog(catalog: &CatalogFile) -> Vec<String> {
    let mut errors = Vec::new();
    let mut skus = HashSet::new();

    let mut check = |sku: &str, price: Decimal, stock: i32, threshold: i32| {
        if sku.trim().is_empty() {
            errors.push("empty SKU".to_string());
        } else if !skus.insert(sku.to_owned()) {
            errors.push(format!("{sku}: duplicate SKU"));
        }
        if price.is_sign_negative() {
            errors.push(format!("{sku}: negative price"));
        }
        if stock < 0 {
            errors.push(format!("{sku}: negative stock"));
        }
        if threshold < 0 {
            errors.push(format!("{sku}: negative alert threshold"));
        }
    };

    for product in &catalog.products {
        check(
            &product.sku,
            product.price,
            product.stock,
            product.alert_threshold,
        );
        for variation in &product.variations {
            check(
                &variation.sku,
                variation.price,
                variation.stock,
                variation.alert_threshold,
            );
        }
    }

    errors
}

/// Load a catalog file and upsert it.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, fails validation,
/// or a database operation fails.
pub async fn catalog(file_path: &str, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    let path = Path::new(file_path);
    if !path.exists() {
        return Err(format!("File not found: {file_path}").into());
    }

    info!(path = %file_path, "Loading catalog from file");

    // Read and validate YAML before connecting to database
    let content = tokio::fs::read_to_string(path).await?;
    let catalog: CatalogFile = serde_yaml::from_str(&content)?;

    let errors = validate_catalog(&catalog);
    if !errors.is_empty() {
        error!("Catalog validation failed:");
        for err in &errors {
            error!("  - {err}");
        }
        return Err(format!("{} validation errors found", errors.len()).into());
    }

    info!(products = catalog.products.len(), "Catalog validated");
    if dry_run {
        return Ok(());
    }

    let pool = db::create_pool(&database_url()?).await?;
    let (products, variations) = upsert_catalog(&pool, &catalog).await?;

    info!("Seeding complete!");
    info!("  Products upserted: {products}");
    info!("  Variations upserted: {variations}");
    Ok(())
}

/// Upsert every product and variation in one transaction.
async fn upsert_catalog(pool: &PgPool, catalog: &CatalogFile) -> Result<(usize, usize), sqlx::Error> {
    let mut tx = pool.begin().await?;
    let mut variations = 0;

    for product in &catalog.products {
        let product_id: ProductId = sqlx::query_scalar(
            r"
            INSERT INTO storefront.products
                (name, sku, product_type, status, price, stock_quantity, alert_threshold)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (sku) DO UPDATE SET
                name = EXCLUDED.name,
                product_type = EXCLUDED.product_type,
                status = EXCLUDED.status,
                price = EXCLUDED.price,
                stock_quantity = EXCLUDED.stock_quantity,
                alert_threshold = EXCLUDED.alert_threshold,
                updated_at = NOW()
            RETURNING id
            ",
        )
        .bind(&product.name)
        .bind(&product.sku)
        .bind(product.product_type())
        .bind(product.status)
        .bind(product.price)
        .bind(product.stock)
        .bind(product.alert_threshold)
        .fetch_one(&mut *tx)
        .await?;

        for variation in &product.variations {
            sqlx::query(
                r"
                INSERT INTO storefront.product_variations
                    (product_id, sku, price, stock_quantity, alert_threshold, attributes, is_active)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (sku) DO UPDATE SET
                    product_id = EXCLUDED.product_id,
                    price = EXCLUDED.price,
                    stock_quantity = EXCLUDED.stock_quantity,
                    alert_threshold = EXCLUDED.alert_threshold,
                    attributes = EXCLUDED.attributes,
                    is_active = EXCLUDED.is_active,
                    updated_at = NOW()
                ",
            )
            .bind(product_id)
            .bind(&variation.sku)
            .bind(variation.price)
            .bind(variation.stock)
            .bind(variation.alert_threshold)
            .bind(Json(&variation.attributes))
            .bind(variation.is_active)
            .execute(&mut *tx)
            .await?;
            variations += 1;
        }
    }

    tx.commit().await?;
    Ok((catalog.products.len(), variations))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
products:
  - name: Honey Jar
    sku: HONEY-JAR
    price: "10.00"
    stock: 50
    alert_threshold: 5
    status: published
  - name: Apron
    sku: APRON
    price: "25.00"
    status: published
    variations:
      - sku: APRON-L
        price: "27.50"
        stock: 10
        attributes: { size: L }
      - sku: APRON-XS
        price: "27.50"
        is_active: false
"#;

    #[test]
    fn test_parse_catalog() {
        let catalog: CatalogFile = serde_yaml::from_str(CATALOG).unwrap();
        assert_eq!(catalog.products.len(), 2);

        let jar = catalog.products.first().unwrap();
        assert_eq!(jar.product_type(), ProductType::Simple);
        assert_eq!(jar.price, Decimal::new(1000, 2));
        assert_eq!(jar.status, ProductStatus::Published);

        let apron = catalog.products.get(1).unwrap();
        assert_eq!(apron.product_type(), ProductType::Variable);
        assert_eq!(apron.stock, 0);
        let large = apron.variations.first().unwrap();
        assert_eq!(large.attributes.get("size").map(String::as_str), Some("L"));
        assert!(large.is_active);
        assert!(!apron.variations.get(1).unwrap().is_active);

        assert!(validate_catalog(&catalog).is_empty());
    }

    #[test]
    fn test_validation_reports_each_problem() {
        let catalog: CatalogFile = serde_yaml::from_str(
            r#"
products:
  - name: Jar
    sku: JAR
    price: "-1.00"
    stock: -2
    variations:
      - sku: JAR
        price: "1.00"
"#,
        )
        .unwrap();

        let errors = validate_catalog(&catalog);
        assert_eq!(
            errors,
            vec![
                "JAR: negative price".to_string(),
                "JAR: negative stock".to_string(),
                "JAR: duplicate SKU".to_string(),
            ]
        );
    }
}
