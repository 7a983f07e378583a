//! Cross-cutting services module
//!
//! Proxy rotation, the HTTP transport seam, fetch events and counters shared
//! by every stream of a scraper.

pub mod events;
pub mod metrics;
pub mod proxy;
pub mod transport;

// Re-export commonly used types
pub use events::{
    ChallengeEvent, ErrorEvent, EventDispatcher, EventHandler, FetchEvent, LoggingHandler,
    MetricsHandler, ProxyFailureEvent, RequestEvent, ResponseEvent, RetryEvent, RetryReason,
    TruncationEvent,
};
pub use metrics::{FetchMetrics, MetricsSnapshot};
pub use proxy::{
    HealthProbe, PoolError, PoolStats, ProbeError, ProxyEndpoint, ProxyId, ProxyLease, ProxyPool,
    ProxyProtocol, ReqwestProbe,
};
pub use transport::{ReqwestTransport, Transport, TransportError, TransportResponse};
