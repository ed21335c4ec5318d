//! Scheduled feed reconciliation: configuration, the reconciler state machine and its timer.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use catalog_feed::{FeedClientConfig, HttpFeedSource, DEFAULT_MAX_BODY_BYTES};
use catalog_storage::{
    MemoryProductStore, PgProductStore, PgStoreConfig, ProductStore, QueryDefaults,
};
use tracing::{info, warn};

mod reconciler;
mod scheduler;

pub use reconciler::{Reconciler, SyncError, SyncOutcome, SyncReport, SyncState};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerHandle};

pub const CRATE_NAME: &str = "catalog-sync";

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub feed_base_url: String,
    pub feed_path: String,
    pub feed_max_body_bytes: usize,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub scheduler_enabled: bool,
    pub sync_interval_secs: u64,
    pub sync_initial_delay_secs: u64,
    pub sync_max_products: usize,
    pub default_page_size: u64,
    pub default_search_limit: u64,
    pub web_port: u16,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl CatalogConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset or unparsable values take the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            database_url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
            db_max_connections: parsed(&lookup, "CATALOG_DB_MAX_CONNECTIONS", 10),
            feed_base_url: lookup("CATALOG_FEED_URL")
                .unwrap_or_else(|| "https://famme.no".to_string()),
            feed_path: lookup("CATALOG_FEED_PATH")
                .unwrap_or_else(|| "/products.json".to_string()),
            feed_max_body_bytes: parsed(
                &lookup,
                "CATALOG_FEED_MAX_BODY_BYTES",
                DEFAULT_MAX_BODY_BYTES,
            ),
            http_timeout_secs: parsed(&lookup, "CATALOG_HTTP_TIMEOUT_SECS", 20),
            user_agent: lookup("CATALOG_USER_AGENT")
                .unwrap_or_else(|| "catalog-sync/0.1".to_string()),
            scheduler_enabled: lookup("CATALOG_SCHEDULER_ENABLED")
                .map(|v| !matches!(v.trim(), "0" | "false" | "FALSE" | "False" | "no"))
                .unwrap_or(true),
            sync_interval_secs: parsed(&lookup, "CATALOG_SYNC_INTERVAL_SECS", 3600),
            sync_initial_delay_secs: parsed(&lookup, "CATALOG_SYNC_INITIAL_DELAY_SECS", 0),
            sync_max_products: parsed(&lookup, "CATALOG_SYNC_MAX_PRODUCTS", 50),
            default_page_size: parsed(&lookup, "CATALOG_DEFAULT_PAGE_SIZE", 10),
            default_search_limit: parsed(&lookup, "CATALOG_DEFAULT_SEARCH_LIMIT", 50),
            web_port: parsed(&lookup, "CATALOG_WEB_PORT", 8080),
        }
    }

    pub fn feed_client_config(&self) -> FeedClientConfig {
        FeedClientConfig {
            base_url: self.feed_base_url.clone(),
            path: self.feed_path.clone(),
            timeout: Duration::from_secs(self.http_timeout_secs),
            max_body_bytes: self.feed_max_body_bytes,
            user_agent: Some(self.user_agent.clone()),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::new(
            Duration::from_secs(self.sync_interval_secs),
            Duration::from_secs(self.sync_initial_delay_secs),
        )
    }

    pub fn query_defaults(&self) -> QueryDefaults {
        QueryDefaults {
            page_size: self.default_page_size,
            search_limit: self.default_search_limit,
            ..QueryDefaults::default()
        }
    }

    pub fn store_config(&self) -> Option<PgStoreConfig> {
        self.database_url.as_ref().map(|url| PgStoreConfig {
            max_connections: self.db_max_connections,
            ..PgStoreConfig::new(url.clone())
        })
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Postgres when `DATABASE_URL` is set (schema applied on connect), otherwise an in-memory store.
pub async fn connect_store(config: &CatalogConfig) -> Result<Arc<dyn ProductStore>> {
    match config.store_config() {
        Some(store_config) => {
            let store = PgProductStore::connect(&store_config)
                .await
                .context("connecting to product database")?;
            store.migrate().await.context("applying products schema")?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set; products are kept in memory only");
            Ok(Arc::new(MemoryProductStore::new()))
        }
    }
}

pub fn build_reconciler(
    config: &CatalogConfig,
    store: Arc<dyn ProductStore>,
) -> Result<Reconciler> {
    let feed = HttpFeedSource::new(config.feed_client_config()).context("building feed client")?;
    info!(feed = feed.url(), max_products = config.sync_max_products, "reconciler ready");
    Ok(Reconciler::new(Arc::new(feed), store, config.sync_max_products))
}
