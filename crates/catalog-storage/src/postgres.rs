use std::time::Duration;

use async_trait::async_trait;
use catalog_core::{Product, ProductUpsert};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::info;

use crate::{search_term, ProductStore, StorageError};

/// Idempotent DDL for the `products` table.
pub const SCHEMA_SQL: &str = include_str!("../migrations/0001_products.sql");

const SELECT_COLUMNS: &str = "id, title, handle, vendor, product_type, published_at, created_at, updated_at, created_on";

#[derive(Debug, Clone)]
pub struct PgStoreConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl PgStoreConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// `ProductStore` over a shared `sqlx` Postgres pool.
#[derive(Debug, Clone)]
pub struct PgProductStore {
    pool: PgPool,
}

impl PgProductStore {
    pub async fn connect(config: &PgStoreConfig) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.database_url)
            .await?;
        info!(
            max_connections = config.max_connections,
            "connected product store pool"
        );
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema. Safe to run repeatedly.
    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        info!("products schema applied");
        Ok(())
    }
}

fn product_from_row(row: &PgRow) -> Result<Product, sqlx::Error> {
    Ok(Product {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        handle: row.try_get("handle")?,
        vendor: row.try_get("vendor")?,
        product_type: row.try_get("product_type")?,
        published_at: row.try_get("published_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        created_on: row.try_get("created_on")?,
    })
}

fn to_sql_count(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// `%term%` with LIKE metacharacters escaped so they match literally.
fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

#[async_trait]
impl ProductStore for PgProductStore {
    async fn upsert(&self, product: ProductUpsert) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO products (id, title, handle, vendor, product_type, published_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE
               SET title        = COALESCE(EXCLUDED.title, products.title),
                   handle       = COALESCE(EXCLUDED.handle, products.handle),
                   vendor       = COALESCE(EXCLUDED.vendor, products.vendor),
                   product_type = COALESCE(EXCLUDED.product_type, products.product_type),
                   published_at = COALESCE(EXCLUDED.published_at, products.published_at),
                   created_at   = COALESCE(EXCLUDED.created_at, products.created_at),
                   updated_at   = COALESCE(EXCLUDED.updated_at, products.updated_at)
            "#,
        )
        .bind(product.id)
        .bind(product.title)
        .bind(product.handle)
        .bind(product.vendor)
        .bind(product.product_type)
        .bind(product.published_at)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Product>, StorageError> {
        let row = sqlx::query(&format!("SELECT {SELECT_COLUMNS} FROM products WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(product_from_row).transpose()?)
    }

    async fn count(&self) -> Result<u64, StorageError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(total).unwrap_or(0))
    }

    async fn fetch_slice(&self, offset: u64, limit: u64) -> Result<Vec<Product>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM products ORDER BY created_on DESC, id DESC LIMIT $1 OFFSET $2"
        ))
        .bind(to_sql_count(limit))
        .bind(to_sql_count(offset))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(product_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn search_by_title(
        &self,
        query: Option<&str>,
        limit: u64,
    ) -> Result<Vec<Product>, StorageError> {
        let Some(term) = search_term(query) else {
            return Ok(Vec::new());
        };
        let rows = sqlx::query(&format!(
            r#"SELECT {SELECT_COLUMNS} FROM products
                WHERE title ILIKE $1 ESCAPE '\'
                ORDER BY created_on DESC, id DESC
                LIMIT $2"#
        ))
        .bind(like_pattern(term))
        .bind(to_sql_count(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(product_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn delete(&self, id: i64) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn allocate_id(&self) -> Result<i64, StorageError> {
        loop {
            let id: i64 = sqlx::query_scalar("SELECT nextval('products_manual_id_seq')")
                .fetch_one(&self.pool)
                .await?;
            let taken: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM products WHERE id = $1)")
                    .bind(id)
                    .fetch_one(&self.pool)
                    .await?;
            if !taken {
                return Ok(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_core::PageRequest;

    #[test]
    fn like_pattern_escapes_metacharacters() {
        assert_eq!(like_pattern("shirt"), "%shirt%");
        assert_eq!(like_pattern("100%_cotton"), "%100\\%\\_cotton%");
        assert_eq!(like_pattern("a\\b"), "%a\\\\b%");
    }

    #[test]
    fn schema_is_idempotent_ddl() {
        assert!(SCHEMA_SQL.contains("CREATE TABLE IF NOT EXISTS products"));
        assert!(SCHEMA_SQL.contains("CREATE SEQUENCE IF NOT EXISTS products_manual_id_seq"));
    }

    // Runs only against a disposable database named by CATALOG_TEST_DATABASE_URL.
    async fn test_store() -> Option<PgProductStore> {
        let url = std::env::var("CATALOG_TEST_DATABASE_URL").ok()?;
        let store = PgProductStore::connect(&PgStoreConfig::new(url))
            .await
            .expect("connect");
        store.migrate().await.expect("migrate");
        sqlx::query("TRUNCATE products")
            .execute(store.pool())
            .await
            .expect("truncate");
        Some(store)
    }

    #[tokio::test]
    async fn postgres_upsert_search_page_delete() {
        let Some(store) = test_store().await else {
            return;
        };

        store
            .upsert(ProductUpsert::new(1).title("Linen Shirt").vendor("FAMME"))
            .await
            .expect("insert");
        store
            .upsert(ProductUpsert::new(1).title("Linen SHIRT"))
            .await
            .expect("update");
        store
            .upsert(ProductUpsert::new(2).title("50% off_tee"))
            .await
            .expect("insert");

        let stored = store.find_by_id(1).await.expect("find").expect("present");
        assert_eq!(stored.title.as_deref(), Some("Linen SHIRT"));
        assert_eq!(stored.vendor.as_deref(), Some("FAMME"));

        let hits = store.search_by_title(Some("shirt"), 50).await.expect("search");
        assert_eq!(hits.len(), 1);
        let literal = store.search_by_title(Some("0% o"), 50).await.expect("search");
        assert_eq!(literal.len(), 1);
        assert!(store.search_by_title(Some(" "), 50).await.expect("search").is_empty());

        let page = store
            .find_page(PageRequest::normalized(0, 1))
            .await
            .expect("page");
        assert_eq!(page.total_elements, 2);
        assert_eq!(page.total_pages(), 2);
        assert_eq!(page.content.len(), 1);

        assert_eq!(store.delete(2).await.expect("delete"), 1);
        assert_eq!(store.delete(2).await.expect("delete"), 0);
        assert!(store.find_by_id(2).await.expect("find").is_none());

        let allocated = store.allocate_id().await.expect("allocate");
        assert!(store.find_by_id(allocated).await.expect("find").is_none());
    }
}
