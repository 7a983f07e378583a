//! Cursor-driven page walker.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, Stream};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::{Item, ListingTarget};
use crate::scraper::ScraperError;

/// One decoded listing page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Item>,
    pub after: Option<String>,
    /// Children in the raw page, including kinds the target filters out.
    pub raw_len: usize,
}

/// Fetches a single page of a listing.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(
        &self,
        target: &ListingTarget,
        limit: usize,
        after: Option<&str>,
    ) -> Result<Page, ScraperError>;
}

/// Lazily walks a listing until the cursor runs out, a page comes back
/// empty, or `limit` items have been yielded.
///
/// Each request asks for exactly `min(batch_size, remaining)` items. The
/// walker is single-use: once finished it stays finished.
pub struct Paginator<'a> {
    source: &'a dyn PageSource,
    target: ListingTarget,
    limit: usize,
    batch_size: usize,
    request_delay: Duration,
    cancel: CancellationToken,
    after: Option<String>,
    yielded: usize,
    pages: usize,
    buffer: VecDeque<Item>,
    finished: bool,
}

impl<'a> Paginator<'a> {
    pub fn new(source: &'a dyn PageSource, target: ListingTarget, limit: usize) -> Self {
        Self {
            source,
            target,
            limit,
            batch_size: 100,
            request_delay: Duration::ZERO,
            cancel: CancellationToken::new(),
            after: None,
            yielded: 0,
            pages: 0,
            buffer: VecDeque::new(),
            finished: limit == 0,
        }
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Pause between consecutive page requests.
    pub fn request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn target(&self) -> &ListingTarget {
        &self.target
    }

    pub fn yielded(&self) -> usize {
        self.yielded
    }

    pub fn is_finished(&self) -> bool {
        self.finished && self.buffer.is_empty()
    }

    /// Fetches the next page. `Ok(None)` means the walk is complete; an error
    /// also finishes it.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Item>>, ScraperError> {
        if self.finished {
            return Ok(None);
        }

        match self.fetch_next().await {
            Ok(page) => Ok(page),
            Err(err) => {
                self.finished = true;
                Err(err)
            }
        }
    }

    async fn fetch_next(&mut self) -> Result<Option<Vec<Item>>, ScraperError> {
        if self.cancel.is_cancelled() {
            return Err(ScraperError::Cancelled);
        }
        if self.pages > 0 && !self.request_delay.is_zero() {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(ScraperError::Cancelled),
                _ = sleep(self.request_delay) => {}
            }
        }

        let remaining = self.limit - self.yielded;
        let request = remaining.min(self.batch_size);
        let page = tokio::select! {
            _ = self.cancel.cancelled() => return Err(ScraperError::Cancelled),
            page = self.source.fetch_page(&self.target, request, self.after.as_deref()) => page?,
        };
        self.pages += 1;

        let Page {
            mut items,
            after,
            raw_len,
        } = page;
        items.truncate(remaining);
        self.yielded += items.len();
        self.after = after;

        if raw_len == 0 || self.after.is_none() || self.yielded >= self.limit {
            self.finished = true;
        }
        log::debug!(
            "{}: page {} returned {} items ({}/{})",
            self.target,
            self.pages,
            items.len(),
            self.yielded,
            self.limit
        );
        if self.finished {
            log::info!("{}: finished with {} items", self.target, self.yielded);
        }

        Ok(Some(items))
    }

    /// Next single item, fetching a page when the buffer runs dry.
    pub async fn next_item(&mut self) -> Option<Result<Item, ScraperError>> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Some(Ok(item));
            }
            match self.next_page().await {
                Ok(Some(items)) => self.buffer.extend(items),
                Ok(None) => return None,
                Err(err) => return Some(Err(err)),
            }
        }
    }

    /// Items as a stream. The first error is yielded last.
    pub fn into_stream(self) -> impl Stream<Item = Result<Item, ScraperError>> + 'a {
        stream::unfold(self, |mut paginator| async move {
            paginator.next_item().await.map(|item| (item, paginator))
        })
    }

    /// Drains the walk, keeping whatever arrived before a failure.
    pub async fn collect_partial(mut self) -> (Vec<Item>, Option<ScraperError>) {
        let mut items = Vec::new();
        while let Some(next) = self.next_item().await {
            match next {
                Ok(item) => items.push(item),
                Err(err) => return (items, Some(err)),
            }
        }
        (items, None)
    }

    pub async fn collect_all(self) -> Result<Vec<Item>, ScraperError> {
        match self.collect_partial().await {
            (items, None) => Ok(items),
            (_, Some(err)) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::Post;
    use futures::StreamExt;
    use std::sync::Mutex;

    /// Serves `total` posts in cursor order and records each requested limit.
    struct StubSource {
        total: usize,
        requests: Mutex<Vec<(usize, Option<String>)>>,
        fail_on_page: Option<usize>,
    }

    impl StubSource {
        fn new(total: usize) -> Self {
            Self {
                total,
                requests: Mutex::new(Vec::new()),
                fail_on_page: None,
            }
        }

        fn limits(&self) -> Vec<usize> {
            self.requests.lock().unwrap().iter().map(|(l, _)| *l).collect()
        }
    }

    #[async_trait]
    impl PageSource for StubSource {
        async fn fetch_page(
            &self,
            _target: &ListingTarget,
            limit: usize,
            after: Option<&str>,
        ) -> Result<Page, ScraperError> {
            let mut requests = self.requests.lock().unwrap();
            requests.push((limit, after.map(str::to_owned)));
            if self.fail_on_page == Some(requests.len()) {
                return Err(ScraperError::PermanentHttp { status: 500 });
            }
            let start = after.map_or(0, |cursor| cursor.parse().unwrap());
            let end = (start + limit).min(self.total);
            let items = (start..end)
                .map(|n| {
                    Item::Post(Post {
                        id: Some(format!("p{n}")),
                        ..Post::default()
                    })
                })
                .collect::<Vec<_>>();
            Ok(Page {
                raw_len: items.len(),
                items,
                after: (end < self.total).then(|| end.to_string()),
            })
        }
    }

    fn target() -> ListingTarget {
        ListingTarget::subreddit("rust", "new").unwrap()
    }

    #[tokio::test]
    async fn requests_exact_remaining_per_page() {
        let source = StubSource::new(1_000);
        let items = Paginator::new(&source, target(), 220)
            .batch_size(100)
            .collect_all()
            .await
            .unwrap();
        assert_eq!(items.len(), 220);
        assert_eq!(source.limits(), vec![100, 100, 20]);
        assert_eq!(
            source.requests.lock().unwrap()[2].1.as_deref(),
            Some("200")
        );
    }

    #[tokio::test]
    async fn stops_when_cursor_runs_out() {
        let source = StubSource::new(150);
        let items = Paginator::new(&source, target(), 1_000)
            .collect_all()
            .await
            .unwrap();
        assert_eq!(items.len(), 150);
        assert_eq!(source.limits(), vec![100, 100]);
    }

    #[tokio::test]
    async fn stops_on_empty_page() {
        let source = StubSource::new(0);
        let mut paginator = Paginator::new(&source, target(), 50);
        assert_eq!(paginator.next_page().await.unwrap(), Some(Vec::new()));
        assert_eq!(paginator.next_page().await.unwrap(), None);
        assert!(paginator.is_finished());
    }

    #[tokio::test]
    async fn error_ends_stream_after_partial_items() {
        let mut source = StubSource::new(1_000);
        source.fail_on_page = Some(2);
        let (items, err) = Paginator::new(&source, target(), 300)
            .collect_partial()
            .await;
        assert_eq!(items.len(), 100);
        assert!(matches!(err, Some(ScraperError::PermanentHttp { status: 500 })));
        assert_eq!(source.limits().len(), 2);
    }

    #[tokio::test]
    async fn stream_yields_items_lazily() {
        let source = StubSource::new(1_000);
        let stream = Paginator::new(&source, target(), 500).batch_size(10).into_stream();
        let first: Vec<_> = stream.take(3).collect().await;
        assert_eq!(first.len(), 3);
        assert_eq!(source.limits(), vec![10]);
    }

    #[tokio::test]
    async fn cancellation_stops_the_walk() {
        let source = StubSource::new(1_000);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = Paginator::new(&source, target(), 10)
            .with_cancellation(cancel)
            .collect_all()
            .await
            .unwrap_err();
        assert!(matches!(err, ScraperError::Cancelled));
        assert!(source.limits().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn waits_between_pages() {
        let source = StubSource::new(30);
        let start = tokio::time::Instant::now();
        Paginator::new(&source, target(), 30)
            .batch_size(10)
            .request_delay(Duration::from_secs(1))
            .collect_all()
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }
}
