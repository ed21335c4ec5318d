use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{FeedSource, FetchError, FetchedFeed};

/// Ceiling on buffered feed bodies; the upstream catalog is large but bounded.
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct FeedClientConfig {
    pub base_url: String,
    pub path: String,
    pub timeout: Duration,
    pub max_body_bytes: usize,
    pub user_agent: Option<String>,
}

impl FeedClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            path: "/products.json".to_string(),
            timeout: Duration::from_secs(20),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            user_agent: None,
        }
    }

    pub fn url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.path.trim_start_matches('/')
        )
    }
}

/// Single-shot GET against the feed endpoint. No retries: the next scheduled cycle is the retry.
#[derive(Debug, Clone)]
pub struct HttpFeedSource {
    client: reqwest::Client,
    url: String,
    max_body_bytes: usize,
}

impl HttpFeedSource {
    pub fn new(config: FeedClientConfig) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        Ok(Self {
            client: builder.build()?,
            url: config.url(),
            max_body_bytes: config.max_body_bytes,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn request_error(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout {
                url: self.url.clone(),
            }
        } else {
            FetchError::Request(err)
        }
    }

    fn too_large(&self) -> FetchError {
        FetchError::BodyTooLarge {
            limit: self.max_body_bytes,
            url: self.url.clone(),
        }
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn fetch(&self) -> Result<FetchedFeed, FetchError> {
        let mut resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|err| self.request_error(err))?;

        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            warn!(status = status.as_u16(), url = %final_url, "feed returned non-success status");
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }

        if let Some(declared) = resp.content_length() {
            if declared > self.max_body_bytes as u64 {
                return Err(self.too_large());
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = resp.chunk().await.map_err(|err| self.request_error(err))? {
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(self.too_large());
            }
            body.extend_from_slice(&chunk);
        }

        debug!(url = %final_url, bytes = body.len(), "feed fetched");
        Ok(FetchedFeed {
            final_url,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Router};
    use tokio::net::TcpListener;

    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("serve");
        });
        format!("http://{addr}")
    }

    fn source(base_url: &str, max_body_bytes: usize, timeout: Duration) -> HttpFeedSource {
        HttpFeedSource::new(FeedClientConfig {
            max_body_bytes,
            timeout,
            ..FeedClientConfig::new(base_url)
        })
        .expect("client")
    }

    #[test]
    fn url_joins_base_and_path() {
        assert_eq!(
            FeedClientConfig::new("https://famme.no/").url(),
            "https://famme.no/products.json"
        );
        let custom = FeedClientConfig {
            path: "feeds/all.json".into(),
            ..FeedClientConfig::new("http://localhost:9000")
        };
        assert_eq!(custom.url(), "http://localhost:9000/feeds/all.json");
    }

    #[tokio::test]
    async fn fetches_body_within_limit() {
        let base = serve(Router::new().route(
            "/products.json",
            get(|| async { r#"{"products":[]}"# }),
        ))
        .await;

        let feed = source(&base, 1024, Duration::from_secs(5))
            .fetch()
            .await
            .expect("fetch");
        assert_eq!(feed.body, br#"{"products":[]}"#);
        assert!(feed.final_url.ends_with("/products.json"));
    }

    #[tokio::test]
    async fn rejects_body_over_ceiling() {
        let base = serve(Router::new().route(
            "/products.json",
            get(|| async { "x".repeat(4096) }),
        ))
        .await;

        let err = source(&base, 1024, Duration::from_secs(5))
            .fetch()
            .await
            .expect_err("too large");
        assert!(matches!(err, FetchError::BodyTooLarge { limit: 1024, .. }));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let base = serve(Router::new().route(
            "/products.json",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }),
        ))
        .await;

        let err = source(&base, 1024, Duration::from_secs(5))
            .fetch()
            .await
            .expect_err("status");
        assert!(matches!(err, FetchError::HttpStatus { status: 503, .. }));
    }

    #[tokio::test]
    async fn slow_feed_times_out() {
        let base = serve(Router::new().route(
            "/products.json",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "{}"
            }),
        ))
        .await;

        let err = source(&base, 1024, Duration::from_millis(200))
            .fetch()
            .await
            .expect_err("timeout");
        assert!(matches!(err, FetchError::Timeout { .. }));
    }
}
