//! Synchronous facade over [`ListingScraper`].
//!
//! Owns a current-thread tokio runtime and drives the async engine to
//! completion on each call. Must not be used from inside another runtime.

use tokio::runtime::{Builder, Runtime};

use crate::listing::{CommentThread, Item, ListingTarget, Post};
use crate::modules::metrics::MetricsSnapshot;
use crate::scraper::{ListingScraper, ListingScraperBuilder, ScraperError, ScraperResult, TargetOutcome};

pub struct BlockingListingScraper {
    runtime: Runtime,
    inner: ListingScraper,
}

impl BlockingListingScraper {
    pub fn new() -> ScraperResult<Self> {
        Self::from_builder(ListingScraper::builder())
    }

    pub fn from_builder(builder: ListingScraperBuilder) -> ScraperResult<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| ScraperError::Client(format!("runtime: {err}")))?;
        Ok(Self {
            runtime,
            inner: builder.build()?,
        })
    }

    pub fn inner(&self) -> &ListingScraper {
        &self.inner
    }

    pub fn fetch_listing(&self, target: ListingTarget, limit: usize) -> ScraperResult<Vec<Item>> {
        self.runtime.block_on(self.inner.fetch_listing(target, limit))
    }

    pub fn fetch_subreddit(&self, name: &str, sort: &str, limit: usize) -> ScraperResult<Vec<Post>> {
        self.runtime.block_on(self.inner.fetch_subreddit(name, sort, limit))
    }

    pub fn fetch_comments(&self, subreddit: &str, post_id: &str, sort: &str) -> ScraperResult<CommentThread> {
        self.runtime
            .block_on(self.inner.fetch_comments(subreddit, post_id, sort))
    }

    pub fn fetch_many(&self, targets: Vec<ListingTarget>, limit: usize) -> ScraperResult<Vec<TargetOutcome>> {
        self.runtime.block_on(self.inner.fetch_many(targets, limit))
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics()
    }

    pub fn close(self) {
        self.runtime.block_on(self.inner.close());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::proxy::ProxyEndpoint;
    use crate::modules::transport::{Transport, TransportError, TransportResponse};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use url::Url;

    struct OnePage;

    #[async_trait]
    impl Transport for OnePage {
        async fn get(
            &self,
            url: &Url,
            _query: &[(String, String)],
            _proxy: Option<&ProxyEndpoint>,
        ) -> Result<TransportResponse, TransportError> {
            let body = json!({"kind": "Listing", "data": {"after": null, "children": [
                {"kind": "t3", "data": {"id": "aaaa1", "title": "first"}},
                {"kind": "t3", "data": {"id": "aaaa2", "title": "second"}}
            ]}});
            Ok(TransportResponse::new(200, url.clone(), body.to_string()))
        }
    }

    #[test]
    fn drives_the_async_engine_synchronously() {
        let scraper = BlockingListingScraper::from_builder(
            ListingScraper::builder()
                .with_transport(Arc::new(OnePage))
                .with_request_delay(Duration::ZERO),
        )
        .unwrap();

        let posts = scraper.fetch_subreddit("rust", "hot", 10).unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[1].title.as_deref(), Some("second"));
        assert_eq!(scraper.metrics().successes, 1);
        scraper.close();
    }
}
