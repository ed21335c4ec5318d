//! Product persistence: the `ProductStore` capability, its Postgres and in-memory backends, and
//! the query service the web layer talks to.

use std::cmp::Ordering;

use async_trait::async_trait;
use catalog_core::{PageRequest, PagedResult, Product, ProductUpsert};
use thiserror::Error;

mod memory;
mod postgres;
mod query;

pub use memory::MemoryProductStore;
pub use postgres::{PgProductStore, PgStoreConfig, SCHEMA_SQL};
pub use query::{ProductQueryService, QueryDefaults, QueryError};

pub const CRATE_NAME: &str = "catalog-storage";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("constraint violated: {0}")]
    Constraint(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.constraint().is_some() => {
                StorageError::Constraint(db.message().to_string())
            }
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => StorageError::Unavailable(err.to_string()),
            _ => StorageError::Database(err),
        }
    }
}

/// Persistence capability shared by the reconciler and the query service.
///
/// Every write is atomic on its own; nothing here spans more than one record.
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Insert `product.id` if absent, otherwise overwrite only the supplied fields.
    async fn upsert(&self, product: ProductUpsert) -> Result<(), StorageError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<Product>, StorageError>;

    async fn count(&self) -> Result<u64, StorageError>;

    /// Rows in listing order (`created_on DESC, id DESC`), skipping `offset`.
    async fn fetch_slice(&self, offset: u64, limit: u64) -> Result<Vec<Product>, StorageError>;

    /// Count, then fetch. The two reads are not isolated from each other, so a concurrent write
    /// can make `total_elements` disagree with `content`.
    async fn find_page(&self, request: PageRequest) -> Result<PagedResult<Product>, StorageError> {
        let total_elements = self.count().await?;
        let content = self.fetch_slice(request.offset(), request.size).await?;
        Ok(PagedResult::new(content, total_elements, request))
    }

    async fn find_recent(&self, limit: u64) -> Result<Vec<Product>, StorageError> {
        self.fetch_slice(0, limit).await
    }

    /// Case-insensitive substring match on `title`. A blank or absent query matches nothing.
    async fn search_by_title(
        &self,
        query: Option<&str>,
        limit: u64,
    ) -> Result<Vec<Product>, StorageError>;

    /// Returns rows affected; a missing id is `Ok(0)`.
    async fn delete(&self, id: i64) -> Result<u64, StorageError>;

    /// Fresh id for a manually created product that no stored row uses.
    async fn allocate_id(&self) -> Result<i64, StorageError>;
}

/// Trimmed search term, or `None` when there is nothing to search for.
pub fn search_term(query: Option<&str>) -> Option<&str> {
    query.map(str::trim).filter(|q| !q.is_empty())
}

/// Total order used by every listing: newest `created_on` first, then highest id.
pub fn listing_order(a: &Product, b: &Product) -> Ordering {
    b.created_on
        .cmp(&a.created_on)
        .then_with(|| b.id.cmp(&a.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::HashSet;

    #[test]
    fn blank_search_terms_are_dropped() {
        assert_eq!(search_term(None), None);
        assert_eq!(search_term(Some("")), None);
        assert_eq!(search_term(Some("   \t")), None);
        assert_eq!(search_term(Some("  shirt ")), Some("shirt"));
    }

    #[test]
    fn pool_timeouts_map_to_unavailable() {
        let err = StorageError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, StorageError::Unavailable(_)));

        let err = StorageError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, StorageError::Database(_)));
    }

    #[test]
    fn equal_created_on_falls_back_to_id_desc() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("ts");
        let low = ProductUpsert::new(10).into_product(ts);
        let high = ProductUpsert::new(20).into_product(ts);

        assert_eq!(listing_order(&high, &low), Ordering::Less);
        assert_eq!(listing_order(&low, &high), Ordering::Greater);
        assert_eq!(listing_order(&low, &low), Ordering::Equal);

        let newer = ProductUpsert::new(1)
            .into_product(ts + chrono::Duration::seconds(1));
        assert_eq!(listing_order(&newer, &high), Ordering::Less);
    }

    #[test]
    fn pages_over_tied_created_on_cover_every_row_once() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("ts");
        let mut rows = [7_i64, 3, 11, 5, 2, 13, 8]
            .into_iter()
            .map(|id| ProductUpsert::new(id).into_product(ts))
            .collect::<Vec<_>>();
        rows.sort_by(listing_order);

        let ids = rows.iter().map(|p| p.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![13, 11, 8, 7, 5, 3, 2]);

        let size = 3;
        let total = rows.len() as u64;
        let mut seen = HashSet::new();
        for page in 0..total.div_ceil(size) {
            let request = PageRequest { page, size };
            let slice = rows
                .iter()
                .skip(request.offset() as usize)
                .take(size as usize);
            for product in slice {
                assert!(seen.insert(product.id), "id {} listed twice", product.id);
            }
        }
        assert_eq!(seen.len(), rows.len());
    }
}
