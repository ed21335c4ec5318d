use std::sync::Arc;

use catalog_feed::{parse_feed, FeedSource, FetchError, ParseError};
use catalog_storage::ProductStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Where the reconciler currently is. `Failed` holds until the next cycle starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Fetching,
    Parsing,
    Upserting,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub feed_url: String,
    pub content_hash: String,
    pub feed_entries: usize,
    pub upserted: usize,
    pub skipped_without_id: usize,
    pub failed_upserts: usize,
    /// At least one record with a usable id was left out by the per-cycle cap.
    pub truncated: bool,
}

/// Cycle-level failures. Per-record storage errors are counted in the report instead.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

#[derive(Debug)]
pub enum SyncOutcome {
    Completed(SyncReport),
    Failed { run_id: Uuid, error: SyncError },
    /// Another cycle was already running.
    Skipped,
}

/// Fetches the feed, parses it and upserts each record, one cycle at a time.
pub struct Reconciler {
    feed: Arc<dyn FeedSource>,
    store: Arc<dyn ProductStore>,
    max_products: usize,
    running: Mutex<()>,
    state: watch::Sender<SyncState>,
    last_report: watch::Sender<Option<SyncReport>>,
}

/// Publishes `Failed("cancelled")` when a cycle is dropped before it settles.
struct InFlight<'a> {
    state: &'a watch::Sender<SyncState>,
    settled: bool,
}

impl<'a> InFlight<'a> {
    fn new(state: &'a watch::Sender<SyncState>) -> Self {
        Self {
            state,
            settled: false,
        }
    }

    fn finish(&mut self) {
        self.settled = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!("product sync dropped before completion");
            self.state
                .send_replace(SyncState::Failed("cancelled".to_string()));
        }
    }
}

impl Reconciler {
    pub fn new(
        feed: Arc<dyn FeedSource>,
        store: Arc<dyn ProductStore>,
        max_products: usize,
    ) -> Self {
        let (state, _) = watch::channel(SyncState::Idle);
        let (last_report, _) = watch::channel(None);
        Self {
            feed,
            store,
            max_products,
            running: Mutex::new(()),
            state,
            last_report,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn last_report(&self) -> Option<SyncReport> {
        self.last_report.borrow().clone()
    }

    /// Run one cycle unless one is already in flight, in which case this returns `Skipped`
    /// without touching the feed or the store. Never panics or propagates cycle errors.
    pub async fn run_cycle(&self) -> SyncOutcome {
        let Ok(_running) = self.running.try_lock() else {
            info!("product sync already running; skipping this trigger");
            return SyncOutcome::Skipped;
        };

        let run_id = Uuid::new_v4();
        let span = info_span!("product_sync", %run_id, feed = %self.feed.describe());
        async {
            info!("starting product sync");
            let mut in_flight = InFlight::new(&self.state);
            let outcome = match self.reconcile(run_id).await {
                Ok(report) => {
                    info!(
                        feed_entries = report.feed_entries,
                        upserted = report.upserted,
                        skipped_without_id = report.skipped_without_id,
                        failed_upserts = report.failed_upserts,
                        truncated = report.truncated,
                        max_products = self.max_products,
                        "product sync completed"
                    );
                    self.state.send_replace(SyncState::Idle);
                    self.last_report.send_replace(Some(report.clone()));
                    SyncOutcome::Completed(report)
                }
                Err(err) => {
                    error!(error = %err, "product sync failed");
                    self.state.send_replace(SyncState::Failed(err.to_string()));
                    SyncOutcome::Failed { run_id, error: err }
                }
            };
            in_flight.finish();
            outcome
        }
        .instrument(span)
        .await
    }

    async fn reconcile(&self, run_id: Uuid) -> Result<SyncReport, SyncError> {
        let started_at = Utc::now();

        self.state.send_replace(SyncState::Fetching);
        let fetched = self.feed.fetch().await?;

        self.state.send_replace(SyncState::Parsing);
        let products = parse_feed(&fetched.body)?;

        self.state.send_replace(SyncState::Upserting);
        let mut report = SyncReport {
            run_id,
            started_at,
            finished_at: started_at,
            feed_url: fetched.final_url.clone(),
            content_hash: fetched.content_hash(),
            feed_entries: products.len(),
            upserted: 0,
            skipped_without_id: 0,
            failed_upserts: 0,
            truncated: false,
        };

        for record in products.records() {
            let Some(upsert) = record.to_upsert() else {
                report.skipped_without_id += 1;
                continue;
            };
            if report.upserted + report.failed_upserts >= self.max_products {
                report.truncated = true;
                continue;
            }
            let id = upsert.id;
            match self.store.upsert(upsert).await {
                Ok(()) => report.upserted += 1,
                Err(err) => {
                    report.failed_upserts += 1;
                    warn!(id, error = %err, "product upsert failed; continuing");
                }
            }
        }

        report.finished_at = Utc::now();
        Ok(report)
    }
}
