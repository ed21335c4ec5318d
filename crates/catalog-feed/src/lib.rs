//! External product feed: HTTP fetch with a bounded body, and defensive parsing of the
//! loosely-typed `products.json` document.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;

mod fetch;
mod parse;

pub use fetch::{FeedClientConfig, HttpFeedSource, DEFAULT_MAX_BODY_BYTES};
pub use parse::{parse_feed, FeedProducts, FeedRecord, ParseError};

pub const CRATE_NAME: &str = "catalog-feed";

/// Raw feed body as received.
#[derive(Debug, Clone)]
pub struct FetchedFeed {
    pub final_url: String,
    pub body: Vec<u8>,
}

impl FetchedFeed {
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.body);
        hex::encode(hasher.finalize())
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("feed request to {url} timed out")]
    Timeout { url: String },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("feed body from {url} exceeds {limit} bytes")]
    BodyTooLarge { limit: usize, url: String },
    #[error("feed request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Where the reconciler pulls its feed from.
#[async_trait]
pub trait FeedSource: Send + Sync {
    fn describe(&self) -> String;

    async fn fetch(&self) -> Result<FetchedFeed, FetchError>;
}
