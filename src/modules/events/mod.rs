//! Fetch lifecycle events.
//!
//! The engine publishes what happens to each request (rate limits, retries,
//! proxy failures, challenges) so logging and metrics stay out of the retry
//! loop itself.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::metrics::FetchMetrics;

#[derive(Debug, Clone)]
pub struct RequestEvent {
    pub url: Url,
    pub attempt: u32,
    pub proxy: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ResponseEvent {
    pub url: Url,
    pub status: u16,
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RetryEvent {
    pub url: Url,
    pub attempt: u32,
    pub reason: RetryReason,
    pub scheduled_after: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    RateLimited,
    Network,
    Timeout,
    Proxy,
}

impl RetryReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RetryReason::RateLimited => "rate_limited",
            RetryReason::Network => "network",
            RetryReason::Timeout => "timeout",
            RetryReason::Proxy => "proxy",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProxyFailureEvent {
    pub address: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ChallengeEvent {
    pub url: Url,
    pub challenge_type: String,
    pub solved: Option<bool>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub url: Url,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// A pagination stream that failed after yielding some items.
#[derive(Debug, Clone)]
pub struct TruncationEvent {
    pub target: String,
    pub items: usize,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum FetchEvent {
    Request(RequestEvent),
    Response(ResponseEvent),
    Retry(RetryEvent),
    ProxyFailure(ProxyFailureEvent),
    Challenge(ChallengeEvent),
    /// A 200 response whose body was not the expected JSON.
    Decode(ErrorEvent),
    Truncated(TruncationEvent),
    Error(ErrorEvent),
}

pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &FetchEvent);
}

/// Broadcasts events to every registered handler, in registration order.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: FetchEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

/// Renders events through the `log` facade.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &FetchEvent) {
        match event {
            FetchEvent::Request(req) => match &req.proxy {
                Some(proxy) => log::debug!("-> GET {} (attempt {}, via {proxy})", req.url, req.attempt),
                None => log::debug!("-> GET {} (attempt {})", req.url, req.attempt),
            },
            FetchEvent::Response(resp) => {
                log::debug!(
                    "<- {} {} ({:.2}s)",
                    resp.url,
                    resp.status,
                    resp.latency.as_secs_f64()
                );
            }
            FetchEvent::Retry(retry) => {
                if retry.reason == RetryReason::RateLimited {
                    log::warn!(
                        "rate limited on {}; waiting {:.2}s before attempt {}",
                        retry.url,
                        retry.scheduled_after.as_secs_f64(),
                        retry.attempt
                    );
                } else {
                    log::warn!(
                        "{} failure on {}; retry attempt {} after {:.2}s",
                        retry.reason.as_str(),
                        retry.url,
                        retry.attempt,
                        retry.scheduled_after.as_secs_f64()
                    );
                }
            }
            FetchEvent::ProxyFailure(failure) => {
                log::warn!("proxy error via {}: {}", failure.address, failure.error);
            }
            FetchEvent::Challenge(challenge) => match challenge.solved {
                None => log::info!("{} challenge detected on {}", challenge.challenge_type, challenge.url),
                Some(true) => log::info!("{} challenge solved for {}", challenge.challenge_type, challenge.url),
                Some(false) => log::error!("unable to solve {} challenge for {}", challenge.challenge_type, challenge.url),
            },
            FetchEvent::Decode(error) => {
                log::warn!("undecodable body from {}: {}", error.url, error.error);
            }
            FetchEvent::Truncated(truncated) => {
                log::warn!(
                    "{} stopped early after {} items: {}",
                    truncated.target,
                    truncated.items,
                    truncated.error
                );
            }
            FetchEvent::Error(error) => {
                log::error!("{} -> {}", error.url, error.error);
            }
        }
    }
}

/// Feeds [`FetchMetrics`] counters.
#[derive(Clone, Debug)]
pub struct MetricsHandler {
    metrics: FetchMetrics,
}

impl MetricsHandler {
    pub fn new(metrics: FetchMetrics) -> Self {
        Self { metrics }
    }
}

impl EventHandler for MetricsHandler {
    fn handle(&self, event: &FetchEvent) {
        match event {
            FetchEvent::Request(_) => self.metrics.record_request(),
            FetchEvent::Response(resp) => self.metrics.record_response(resp.status),
            FetchEvent::Retry(retry) => self.metrics.record_retry(retry.reason),
            FetchEvent::ProxyFailure(_) => self.metrics.record_proxy_failure(),
            FetchEvent::Challenge(challenge) => self.metrics.record_challenge(challenge.solved),
            FetchEvent::Decode(_) => self.metrics.record_decode_error(),
            FetchEvent::Truncated(_) => self.metrics.record_truncated_stream(),
            FetchEvent::Error(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingHandler(std::sync::Mutex<usize>);

    impl EventHandler for CountingHandler {
        fn handle(&self, _event: &FetchEvent) {
            *self.0.lock().unwrap() += 1;
        }
    }

    #[test]
    fn dispatches_to_handlers() {
        let mut dispatcher = EventDispatcher::new();
        let counter = Arc::new(CountingHandler(std::sync::Mutex::new(0)));
        dispatcher.register_handler(counter.clone());
        dispatcher.register_handler(Arc::new(LoggingHandler));
        dispatcher.dispatch(FetchEvent::Error(ErrorEvent {
            url: Url::parse("https://example.com/r/rust.json").unwrap(),
            error: "timeout".into(),
            timestamp: Utc::now(),
        }));
        assert_eq!(*counter.0.lock().unwrap(), 1);
    }

    #[test]
    fn metrics_handler_tracks_rate_limits_separately() {
        let metrics = FetchMetrics::new();
        let handler = MetricsHandler::new(metrics.clone());
        let url = Url::parse("https://example.com/").unwrap();
        handler.handle(&FetchEvent::Response(ResponseEvent {
            url: url.clone(),
            status: 429,
            latency: Duration::from_millis(5),
            timestamp: Utc::now(),
        }));
        handler.handle(&FetchEvent::Retry(RetryEvent {
            url,
            attempt: 2,
            reason: RetryReason::RateLimited,
            scheduled_after: Duration::from_secs(2),
            timestamp: Utc::now(),
        }));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.rate_limited, 1);
        assert_eq!(snapshot.retries, 1);
        assert_eq!(snapshot.successes, 0);
    }
}
