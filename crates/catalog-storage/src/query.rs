use std::sync::Arc;

use catalog_core::{
    normalize_search_limit_with, PageRequest, PagedResult, Product, ProductForm,
    DEFAULT_PAGE_SIZE, DEFAULT_SEARCH_LIMIT,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::{ProductStore, StorageError};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("product {0} not found")]
    NotFound(i64),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Copy)]
pub struct QueryDefaults {
    pub page_size: u64,
    pub search_limit: u64,
    pub recent_limit: u64,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            search_limit: DEFAULT_SEARCH_LIMIT,
            recent_limit: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Read and manual-write paths over an injected store. Holds no state of its own.
#[derive(Clone)]
pub struct ProductQueryService {
    store: Arc<dyn ProductStore>,
    defaults: QueryDefaults,
}

impl ProductQueryService {
    pub fn new(store: Arc<dyn ProductStore>) -> Self {
        Self::with_defaults(store, QueryDefaults::default())
    }

    pub fn with_defaults(store: Arc<dyn ProductStore>, defaults: QueryDefaults) -> Self {
        Self { store, defaults }
    }

    pub async fn list_page(&self, page: i64, size: i64) -> Result<PagedResult<Product>, QueryError> {
        let request = PageRequest::normalized_with(page, size, self.defaults.page_size);
        Ok(self.store.find_page(request).await?)
    }

    pub async fn get(&self, id: i64) -> Result<Product, QueryError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or(QueryError::NotFound(id))
    }

    pub async fn search(&self, title: Option<&str>, limit: i64) -> Result<Vec<Product>, QueryError> {
        let limit = normalize_search_limit_with(limit, self.defaults.search_limit);
        let results = self.store.search_by_title(title, limit).await?;
        debug!(query = title.unwrap_or_default(), hits = results.len(), "title search");
        Ok(results)
    }

    pub async fn recent(&self) -> Result<Vec<Product>, QueryError> {
        Ok(self.store.find_recent(self.defaults.recent_limit).await?)
    }

    /// Manual creation; the id comes from the store's allocator, never from the caller.
    pub async fn create(&self, form: ProductForm) -> Result<Product, QueryError> {
        let id = self.store.allocate_id().await?;
        self.store.upsert(form.into_upsert(id)).await?;
        info!(id, "product created");
        self.get(id).await
    }

    /// Last write wins against the reconciler; unsupplied fields keep their stored values.
    pub async fn update(&self, id: i64, form: ProductForm) -> Result<Product, QueryError> {
        self.store.upsert(form.into_upsert(id)).await?;
        info!(id, "product updated");
        self.get(id).await
    }

    pub async fn delete(&self, id: i64) -> Result<u64, QueryError> {
        let removed = self.store.delete(id).await?;
        info!(id, removed, "product deleted");
        Ok(removed)
    }
}
