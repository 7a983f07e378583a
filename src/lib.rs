//! # listing-scraper
//!
//! Async scraper for a public JSON listing API (subreddit listings, user
//! histories, search results and comment threads).
//!
//! ## Features
//!
//! - Cursor pagination with exact per-page accounting
//! - Bounded retries with exponential backoff on rate limits and network errors
//! - Health-gated proxy rotation with periodic probing
//! - Captcha hand-off through CapSolver or 2Captcha when a challenge page appears
//! - Comment tree reconstruction with a depth cap
//! - Concurrent fan-out over many listings, plus a blocking facade
//!
//! ## Example
//!
//! ```no_run
//! use listing_scraper::{ListingScraper, ListingTarget};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let scraper = ListingScraper::new()?;
//!     let target = ListingTarget::subreddit("rust", "hot")?;
//!     for item in scraper.fetch_listing(target, 50).await? {
//!         println!("{:?}", item.id());
//!     }
//!     scraper.close().await;
//!     Ok(())
//! }
//! ```

mod blocking;
mod scraper;

pub mod challenges;
pub mod config;
pub mod external_deps;
pub mod listing;
pub mod modules;

pub use crate::blocking::BlockingListingScraper;

pub use crate::scraper::{
    ListingScraper,
    ListingScraperBuilder,
    ScraperError,
    ScraperResult,
    TargetOutcome,
};

pub use crate::config::{CaptchaConfig, ProxyPoolConfig, ProxySpec, ScraperConfig};

pub use crate::challenges::{ChallengeDetection, ChallengeDetector, ChallengeResolver};

pub use crate::external_deps::captcha::{
    CapSolverProvider,
    CaptchaError,
    CaptchaProvider,
    CaptchaResult,
    CaptchaSolution,
    CaptchaTask,
    ChallengeKind,
    PollStatus,
    TwoCaptchaProvider,
};

pub use crate::listing::{
    Comment,
    CommentSort,
    CommentThread,
    Edited,
    Item,
    ListingSort,
    ListingTarget,
    Page,
    PageSource,
    Paginator,
    Post,
    PostId,
    Replies,
    SearchSort,
    Subreddit,
    TimeFilter,
    UserActivity,
    UserSort,
    Username,
    ValidationError,
};

pub use crate::modules::{
    ChallengeEvent,
    ErrorEvent,
    EventDispatcher,
    EventHandler,
    FetchEvent,
    FetchMetrics,
    HealthProbe,
    LoggingHandler,
    MetricsHandler,
    MetricsSnapshot,
    PoolError,
    PoolStats,
    ProxyEndpoint,
    ProxyPool,
    ProxyProtocol,
    ReqwestTransport,
    RetryEvent,
    Transport,
    TransportError,
    TransportResponse,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
