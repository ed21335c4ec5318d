use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};

use async_trait::async_trait;
use catalog_core::{Product, ProductUpsert};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::{listing_order, search_term, ProductStore, StorageError};

/// In-process store with the same contract as the Postgres backend.
#[derive(Debug, Default)]
pub struct MemoryProductStore {
    state: RwLock<MemoryState>,
    manual_ids: AtomicI64,
}

#[derive(Debug, Default)]
struct MemoryState {
    rows: HashMap<i64, Product>,
    last_created_on: Option<DateTime<Utc>>,
}

impl MemoryState {
    // created_on is strictly increasing so insertion order is always observable.
    fn next_created_on(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_created_on {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_created_on = Some(stamp);
        stamp
    }
}

impl MemoryProductStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn sorted_rows(&self) -> Vec<Product> {
        let state = self.state.read().await;
        let mut rows = state.rows.values().cloned().collect::<Vec<_>>();
        rows.sort_by(listing_order);
        rows
    }
}

#[async_trait]
impl ProductStore for MemoryProductStore {
    async fn upsert(&self, product: ProductUpsert) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.rows.get_mut(&product.id) {
            product.merge_into(existing);
            return Ok(());
        }
        let created_on = state.next_created_on();
        state.rows.insert(product.id, product.into_product(created_on));
        Ok(())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Product>, StorageError> {
        Ok(self.state.read().await.rows.get(&id).cloned())
    }

    async fn count(&self) -> Result<u64, StorageError> {
        Ok(self.state.read().await.rows.len() as u64)
    }

    async fn fetch_slice(&self, offset: u64, limit: u64) -> Result<Vec<Product>, StorageError> {
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        Ok(self
            .sorted_rows()
            .await
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn search_by_title(
        &self,
        query: Option<&str>,
        limit: u64,
    ) -> Result<Vec<Product>, StorageError> {
        let Some(term) = search_term(query) else {
            return Ok(Vec::new());
        };
        let needle = term.to_lowercase();
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        Ok(self
            .sorted_rows()
            .await
            .into_iter()
            .filter(|p| {
                p.title
                    .as_deref()
                    .is_some_and(|title| title.to_lowercase().contains(&needle))
            })
            .take(limit)
            .collect())
    }

    async fn delete(&self, id: i64) -> Result<u64, StorageError> {
        let removed = self.state.write().await.rows.remove(&id);
        Ok(u64::from(removed.is_some()))
    }

    async fn allocate_id(&self) -> Result<i64, StorageError> {
        let state = self.state.read().await;
        loop {
            let id = self.manual_ids.fetch_add(1, AtomicOrdering::SeqCst) + 1;
            if !state.rows.contains_key(&id) {
                return Ok(id);
            }
        }
    }
}
