//! Product catalogue repository (read-mostly).

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};

use shelfscan_model::ProductRecord;

use crate::error::StoreError;

pub struct ProductRepository<'a> {
    pool: &'a Pool<Sqlite>,
}

impl<'a> ProductRepository<'a> {
    pub fn new(pool: &'a Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn create(&self, product: &ProductRecord) -> Result<i64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO products (
                ean, upc, ean8, additional_codes,
                name, brand, description, category, subcategory,
                size, unit, pack_size, external_id, sku,
                active, image_url, source, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&product.ean)
        .bind(&product.upc)
        .bind(&product.ean8)
        .bind(serde_json::to_string(&product.additional_codes)?)
        .bind(&product.name)
        .bind(&product.brand)
        .bind(&product.description)
        .bind(&product.category)
        .bind(&product.subcategory)
        .bind(&product.size)
        .bind(&product.unit)
        .bind(product.pack_size)
        .bind(&product.external_id)
        .bind(&product.sku)
        .bind(product.active)
        .bind(&product.image_url)
        .bind(&product.source)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Create or update by canonical EAN, returning the row id.
    pub async fn upsert(&self, product: &ProductRecord) -> Result<i64, StoreError> {
        if let Some(existing) = self.get_by_ean(&product.ean).await? {
            sqlx::query(
                r#"
                UPDATE products SET
                    upc = ?, ean8 = ?, additional_codes = ?,
                    name = ?, brand = ?, description = ?, category = ?, subcategory = ?,
                    size = ?, unit = ?, pack_size = ?, external_id = ?, sku = ?,
                    active = ?, image_url = ?, source = ?, updated_at = ?
                WHERE ean = ?
                "#,
            )
            .bind(&product.upc)
            .bind(&product.ean8)
            .bind(serde_json::to_string(&product.additional_codes)?)
            .bind(&product.name)
            .bind(&product.brand)
            .bind(&product.description)
            .bind(&product.category)
            .bind(&product.subcategory)
            .bind(&product.size)
            .bind(&product.unit)
            .bind(product.pack_size)
            .bind(&product.external_id)
            .bind(&product.sku)
            .bind(product.active)
            .bind(&product.image_url)
            .bind(&product.source)
            .bind(Utc::now())
            .bind(&product.ean)
            .execute(self.pool)
            .await?;
            Ok(existing.id)
        } else {
            self.create(product).await
        }
    }

    pub async fn get_by_ean(&self, ean: &str) -> Result<Option<ProductRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM products WHERE ean = ?")
            .bind(ean)
            .fetch_optional(self.pool)
            .await?;
        row.map(|r| product_from_row(&r)).transpose()
    }

    /// Resolve a product by any of its codes: ean, upc, ean8, or a member of
    /// additional_codes.
    pub async fn get_by_any_code(&self, code: &str) -> Result<Option<ProductRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM products
            WHERE ean = ?1 OR upc = ?1 OR ean8 = ?1
               OR EXISTS (
                    SELECT 1 FROM json_each(products.additional_codes)
                    WHERE json_each.value = ?1
               )
            LIMIT 1
            "#,
        )
        .bind(code)
        .fetch_optional(self.pool)
        .await?;
        row.map(|r| product_from_row(&r)).transpose()
    }

    pub async fn deactivate(&self, ean: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE products SET active = 0, updated_at = ? WHERE ean = ?")
            .bind(Utc::now())
            .bind(ean)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(self.pool)
            .await?;
        Ok(n)
    }
}

fn product_from_row(row: &SqliteRow) -> Result<ProductRecord, StoreError> {
    let additional_codes: Vec<String> =
        serde_json::from_str(row.try_get::<String, _>("additional_codes")?.as_str())?;
    Ok(ProductRecord {
        id: row.try_get("id")?,
        ean: row.try_get("ean")?,
        upc: row.try_get("upc")?,
        ean8: row.try_get("ean8")?,
        additional_codes,
        name: row.try_get("name")?,
        brand: row.try_get("brand")?,
        description: row.try_get("description")?,
        category: row.try_get("category")?,
        subcategory: row.try_get("subcategory")?,
        size: row.try_get("size")?,
        unit: row.try_get("unit")?,
        pack_size: row.try_get("pack_size")?,
        external_id: row.try_get("external_id")?,
        sku: row.try_get("sku")?,
        active: row.try_get("active")?,
        image_url: row.try_get("image_url")?,
        source: row.try_get("source")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
