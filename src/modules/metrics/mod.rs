//! Fetch counters.
//!
//! Aggregates request outcomes across every stream of a scraper. Rate-limit
//! responses are counted apart from other failures.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};

use super::events::RetryReason;

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub started_at: DateTime<Utc>,
    pub requests: u64,
    pub successes: u64,
    pub rate_limited: u64,
    pub http_errors: u64,
    pub decode_errors: u64,
    pub retries: u64,
    pub network_retries: u64,
    pub proxy_failures: u64,
    pub challenges_detected: u64,
    pub challenges_solved: u64,
    pub challenges_failed: u64,
    pub truncated_streams: u64,
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            requests: 0,
            successes: 0,
            rate_limited: 0,
            http_errors: 0,
            decode_errors: 0,
            retries: 0,
            network_retries: 0,
            proxy_failures: 0,
            challenges_detected: 0,
            challenges_solved: 0,
            challenges_failed: 0,
            truncated_streams: 0,
        }
    }
}

impl MetricsSnapshot {
    pub fn success_rate(&self) -> Option<f64> {
        (self.requests > 0).then(|| self.successes as f64 / self.requests as f64)
    }
}

/// Thread-safe counter set shared between the dispatcher and callers.
#[derive(Clone, Debug, Default)]
pub struct FetchMetrics {
    inner: Arc<Mutex<MetricsSnapshot>>,
}

impl FetchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, apply: impl FnOnce(&mut MetricsSnapshot)) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        apply(&mut guard);
    }

    pub fn record_request(&self) {
        self.update(|m| m.requests += 1);
    }

    pub fn record_response(&self, status: u16) {
        self.update(|m| match status {
            200 => m.successes += 1,
            429 => m.rate_limited += 1,
            _ => m.http_errors += 1,
        });
    }

    pub fn record_retry(&self, reason: RetryReason) {
        self.update(|m| {
            m.retries += 1;
            if matches!(reason, RetryReason::Network | RetryReason::Timeout) {
                m.network_retries += 1;
            }
        });
    }

    pub fn record_decode_error(&self) {
        self.update(|m| m.decode_errors += 1);
    }

    pub fn record_truncated_stream(&self) {
        self.update(|m| m.truncated_streams += 1);
    }

    pub fn record_proxy_failure(&self) {
        self.update(|m| m.proxy_failures += 1);
    }

    pub fn record_challenge(&self, solved: Option<bool>) {
        self.update(|m| match solved {
            None => m.challenges_detected += 1,
            Some(true) => m.challenges_solved += 1,
            Some(false) => m.challenges_failed += 1,
        });
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().expect("metrics lock poisoned").clone()
    }
}
