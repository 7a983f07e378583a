//! Fetch engine orchestration.
//!
//! Wires the transport, proxy pool, challenge resolver and event bus together
//! and exposes the listing, comment and fan-out operations on top of a single
//! retrying request primitive.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use url::Url;

use async_trait::async_trait;

use crate::challenges::detectors::{ChallengeDetection, ChallengeDetector};
use crate::challenges::resolver::{ChallengeResolver, backoff};
use crate::config::ScraperConfig;
use crate::external_deps::captcha::{CaptchaError, CaptchaProvider};
use crate::listing::models::{KIND_POST, ListingEnvelope};
use crate::listing::tree::build_comment_tree;
use crate::listing::{
	CommentSort, CommentThread, Item, ListingTarget, Page, PageSource, Paginator, Post, PostId,
	Subreddit, ValidationError, validate_limit,
};
use crate::modules::events::{
	ChallengeEvent, ErrorEvent, EventDispatcher, EventHandler, FetchEvent, LoggingHandler,
	MetricsHandler, ProxyFailureEvent, RequestEvent, ResponseEvent, RetryEvent, RetryReason,
	TruncationEvent,
};
use crate::modules::metrics::{FetchMetrics, MetricsSnapshot};
use crate::modules::proxy::{PoolError, PoolStats, ProxyEndpoint, ProxyLease, ProxyPool};
use crate::modules::transport::{ReqwestTransport, Transport, TransportError, TransportResponse};

/// Result alias used across the orchestration layer.
pub type ScraperResult<T> = Result<T, ScraperError>;

/// Upper bound the comments endpoint accepts for one request.
const COMMENT_LIMIT: usize = 500;

/// Error surfaced by the fetch engine.
#[derive(Debug, Error)]
pub enum ScraperError {
	#[error("invalid input: {0}")]
	Validation(#[from] ValidationError),
	#[error("invalid url: {0}")]
	Url(#[from] url::ParseError),
	#[error("network error: {0}")]
	TransientNetwork(String),
	#[error("rate limited")]
	RateLimited,
	#[error("http status {status}")]
	PermanentHttp { status: u16 },
	#[error("could not decode response: {0}")]
	Decode(String),
	#[error("proxy error: {0}")]
	Proxy(String),
	#[error("{0} challenge required")]
	ChallengeRequired(&'static str),
	#[error("challenge solve failed: {0}")]
	ChallengeSolveFailure(CaptchaError),
	#[error("proxy pool: {0}")]
	PoolExhausted(PoolError),
	#[error("request timed out: {0}")]
	Timeout(String),
	#[error("failed after {attempts} attempts: {last}")]
	RetriesExhausted {
		attempts: u32,
		last: Box<ScraperError>,
	},
	#[error("operation cancelled")]
	Cancelled,
	#[error("http client error: {0}")]
	Client(String),
}

impl ScraperError {
	/// Whether the retry loop may try again after this error.
	pub fn is_transient(&self) -> bool {
		matches!(
			self,
			ScraperError::TransientNetwork(_)
				| ScraperError::RateLimited
				| ScraperError::Proxy(_)
				| ScraperError::Timeout(_)
		)
	}
}

/// Fluent builder for [`ListingScraper`].
pub struct ListingScraperBuilder {
	config: ScraperConfig,
	transport: Option<Arc<dyn Transport>>,
	proxy_pool: Option<Arc<ProxyPool>>,
	captcha_provider: Option<Arc<dyn CaptchaProvider>>,
	handlers: Vec<Arc<dyn EventHandler>>,
}

impl ListingScraperBuilder {
	pub fn new() -> Self {
		Self {
			config: ScraperConfig::default(),
			transport: None,
			proxy_pool: None,
			captcha_provider: None,
			handlers: Vec::new(),
		}
	}

	pub fn with_config(mut self, config: ScraperConfig) -> Self {
		self.config = config;
		self
	}

	pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
		self.config.api_base = api_base.into();
		self
	}

	pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
		self.config.user_agent = user_agent.into();
		self.config.rotate_user_agents = false;
		self
	}

	pub fn with_request_delay(mut self, delay: std::time::Duration) -> Self {
		self.config.request_delay = delay;
		self
	}

	pub fn with_max_retries(mut self, retries: u32) -> Self {
		self.config.max_retries = retries;
		self
	}

	pub fn with_backoff_unit(mut self, unit: std::time::Duration) -> Self {
		self.config.backoff_unit = unit;
		self
	}

	pub fn with_batch_size(mut self, batch_size: usize) -> Self {
		self.config.batch_size = batch_size.max(1);
		self
	}

	pub fn with_max_comment_depth(mut self, depth: usize) -> Self {
		self.config.max_comment_depth = depth;
		self
	}

	/// Replace the HTTP layer, e.g. with a scripted transport in tests.
	pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
		self.transport = Some(transport);
		self
	}

	/// Share an existing pool instead of building one from `config.proxies`.
	pub fn with_proxy_pool(mut self, pool: Arc<ProxyPool>) -> Self {
		self.proxy_pool = Some(pool);
		self
	}

	pub fn with_captcha_provider(mut self, provider: Arc<dyn CaptchaProvider>) -> Self {
		self.captcha_provider = Some(provider);
		self
	}

	pub fn with_site_key(mut self, domain: impl Into<String>, key: impl Into<String>) -> Self {
		self.config.captcha.site_keys.insert(domain.into(), key.into());
		self
	}

	pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
		self.handlers.push(handler);
		self
	}

	pub fn build(self) -> ScraperResult<ListingScraper> {
		ListingScraper::from_parts(self)
	}
}

impl Default for ListingScraperBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Outcome of one stream inside [`ListingScraper::fetch_many`].
#[derive(Debug)]
pub struct TargetOutcome {
	pub target: ListingTarget,
	/// Empty whenever `error` is set.
	pub items: Vec<Item>,
	pub error: Option<ScraperError>,
}

impl TargetOutcome {
	pub fn is_complete(&self) -> bool {
		self.error.is_none()
	}
}

/// What a single response means for the retry loop.
enum Verdict {
	Json(Value),
	RateLimited,
	Challenge(ChallengeDetection),
	Fail(ScraperError),
}

/// Main scraper orchestrator.
pub struct ListingScraper {
	config: ScraperConfig,
	api_base: Url,
	transport: Arc<dyn Transport>,
	proxies: Option<Arc<ProxyPool>>,
	resolver: Option<ChallengeResolver>,
	detector: ChallengeDetector,
	events: Arc<EventDispatcher>,
	metrics: FetchMetrics,
	cancel: CancellationToken,
}

impl ListingScraper {
	/// Construct a scraper with default configuration.
	pub fn new() -> ScraperResult<Self> {
		ListingScraperBuilder::new().build()
	}

	pub fn builder() -> ListingScraperBuilder {
		ListingScraperBuilder::new()
	}

	fn from_parts(builder: ListingScraperBuilder) -> ScraperResult<Self> {
		let ListingScraperBuilder {
			config,
			transport,
			proxy_pool,
			captcha_provider,
			handlers,
		} = builder;

		let api_base = Url::parse(&config.api_base)?;
		let cancel = CancellationToken::new();

		let transport: Arc<dyn Transport> = match transport {
			Some(transport) => transport,
			None => Arc::new(ReqwestTransport::new(
				config.user_agent.clone(),
				config.rotate_user_agents,
				config.request_timeout,
			)),
		};

		let proxies = proxy_pool.or_else(|| {
			(!config.proxies.is_empty()).then(|| {
				let pool = ProxyPool::new(config.proxy_pool.clone());
				pool.extend(config.proxies.iter().map(ProxyEndpoint::from));
				Arc::new(pool)
			})
		});

		let resolver = captcha_provider.map(|provider| {
			ChallengeResolver::new(provider, config.captcha.clone())
				.with_cancellation(cancel.child_token())
		});

		let metrics = FetchMetrics::new();
		let mut events = EventDispatcher::new();
		events.register_handler(Arc::new(LoggingHandler));
		events.register_handler(Arc::new(MetricsHandler::new(metrics.clone())));
		for handler in handlers {
			events.register_handler(handler);
		}

		Ok(Self {
			config,
			api_base,
			transport,
			proxies,
			resolver,
			detector: ChallengeDetector::new(),
			events: Arc::new(events),
			metrics,
			cancel,
		})
	}

	pub fn config(&self) -> &ScraperConfig {
		&self.config
	}

	pub fn metrics(&self) -> MetricsSnapshot {
		self.metrics.snapshot()
	}

	pub fn proxy_stats(&self) -> Option<PoolStats> {
		self.proxies.as_ref().map(|pool| pool.stats())
	}

	pub fn proxy_pool(&self) -> Option<&Arc<ProxyPool>> {
		self.proxies.as_ref()
	}

	/// Root token; cancelling it stops every stream and wait of this scraper.
	pub fn cancellation_token(&self) -> CancellationToken {
		self.cancel.clone()
	}

	/// Periodic proxy probing, stopped by [`ListingScraper::close`].
	///
	/// Must be called from within a tokio runtime.
	pub fn start_health_monitor(&self) -> Option<JoinHandle<()>> {
		let pool = self.proxies.as_ref()?;
		Some(pool.spawn_health_monitor(
			pool.config().health_check_interval,
			self.cancel.child_token(),
		))
	}

	/// Cancel outstanding work and drop pooled connections.
	pub async fn close(&self) {
		self.cancel.cancel();
		self.transport.close().await;
		log::debug!("scraper closed");
	}

	fn endpoint(&self, path: &str) -> ScraperResult<Url> {
		Ok(self.api_base.join(path)?)
	}

	/// GET `path` relative to the API base and decode the JSON body.
	pub async fn fetch_json(&self, path: &str, query: &[(String, String)]) -> ScraperResult<Value> {
		let url = self.endpoint(path)?;
		let mut params = Vec::with_capacity(query.len() + 1);
		params.extend_from_slice(query);
		params.push(("raw_json".to_string(), "1".to_string()));
		self.fetch_once(&url, &params).await
	}

	/// One logical request: retries transient failures up to
	/// `max_retries` times and hands challenge pages to the resolver.
	pub async fn fetch_once(&self, url: &Url, query: &[(String, String)]) -> ScraperResult<Value> {
		let result = self.fetch_with_retries(url, query).await;
		if let Err(err) = &result
			&& !matches!(err, ScraperError::Cancelled)
		{
			self.events.dispatch(FetchEvent::Error(ErrorEvent {
				url: url.clone(),
				error: err.to_string(),
				timestamp: Utc::now(),
			}));
		}
		result
	}

	async fn fetch_with_retries(&self, url: &Url, query: &[(String, String)]) -> ScraperResult<Value> {
		let max_attempts = self.config.max_retries.saturating_add(1);
		let mut attempt = 0u32;
		let mut challenge_retried = false;
		let mut last_error: Option<ScraperError> = None;

		while attempt < max_attempts {
			attempt += 1;
			if self.cancel.is_cancelled() {
				return Err(ScraperError::Cancelled);
			}

			let lease = self.lease_proxy()?;
			self.events.dispatch(FetchEvent::Request(RequestEvent {
				url: url.clone(),
				attempt,
				proxy: lease.as_ref().map(|l| l.endpoint.address()),
				timestamp: Utc::now(),
			}));

			let started = Instant::now();
			let outcome = tokio::select! {
				_ = self.cancel.cancelled() => return Err(ScraperError::Cancelled),
				outcome = self.transport.get(url, query, lease.as_ref().map(|l| &l.endpoint)) => outcome,
			};

			let failure = match outcome {
				Ok(response) => {
					self.events.dispatch(FetchEvent::Response(ResponseEvent {
						url: response.url.clone(),
						status: response.status,
						latency: started.elapsed(),
						timestamp: Utc::now(),
					}));

					match self.classify(&response) {
						Verdict::Json(value) => return Ok(value),
						Verdict::Fail(err) => return Err(err),
						Verdict::Challenge(detection) => {
							if challenge_retried {
								return Err(ScraperError::ChallengeRequired(detection.kind.name()));
							}
							tokio::select! {
								_ = self.cancel.cancelled() => return Err(ScraperError::Cancelled),
								solved = self.solve_challenge(url, detection, lease.as_ref()) => solved?,
							}
							challenge_retried = true;
							// The post-solve retry does not consume the attempt budget.
							attempt -= 1;
							continue;
						}
						Verdict::RateLimited => (ScraperError::RateLimited, RetryReason::RateLimited),
					}
				}
				Err(TransportError::Proxy(message)) => {
					if let (Some(pool), Some(lease)) = (&self.proxies, &lease) {
						pool.mark_failure(lease.id);
						self.events.dispatch(FetchEvent::ProxyFailure(ProxyFailureEvent {
							address: lease.endpoint.address(),
							error: message.clone(),
							timestamp: Utc::now(),
						}));
					}
					last_error = Some(ScraperError::Proxy(message));
					if attempt < max_attempts {
						// Rotate straight to the next endpoint.
						self.events.dispatch(FetchEvent::Retry(RetryEvent {
							url: url.clone(),
							attempt: attempt + 1,
							reason: RetryReason::Proxy,
							scheduled_after: std::time::Duration::ZERO,
							timestamp: Utc::now(),
						}));
					}
					continue;
				}
				Err(TransportError::Timeout(message)) => (ScraperError::Timeout(message), RetryReason::Timeout),
				Err(TransportError::Network(message)) => {
					(ScraperError::TransientNetwork(message), RetryReason::Network)
				}
				Err(TransportError::Build(message)) => return Err(ScraperError::Client(message)),
			};

			let (err, reason) = failure;
			last_error = Some(err);
			if attempt < max_attempts {
				let wait = backoff(self.config.backoff_unit, attempt);
				self.events.dispatch(FetchEvent::Retry(RetryEvent {
					url: url.clone(),
					attempt: attempt + 1,
					reason,
					scheduled_after: wait,
					timestamp: Utc::now(),
				}));
				self.wait(wait).await?;
			}
		}

		Err(ScraperError::RetriesExhausted {
			attempts: max_attempts,
			last: Box::new(last_error.unwrap_or(ScraperError::RateLimited)),
		})
	}

	fn lease_proxy(&self) -> ScraperResult<Option<ProxyLease>> {
		match &self.proxies {
			Some(pool) => pool.next(None).map(Some).map_err(ScraperError::PoolExhausted),
			None => Ok(None),
		}
	}

	/// 200 bodies are decoded first; challenge markers are only consulted
	/// when the body is not JSON, or on a 403.
	fn classify(&self, response: &TransportResponse) -> Verdict {
		match response.status {
			200 => match serde_json::from_slice::<Value>(&response.body) {
				Ok(value) => Verdict::Json(value),
				Err(err) => match self.detector.detect(&response.text()) {
					Some(detection) => Verdict::Challenge(detection),
					None => {
						self.events.dispatch(FetchEvent::Decode(ErrorEvent {
							url: response.url.clone(),
							error: err.to_string(),
							timestamp: Utc::now(),
						}));
						Verdict::Fail(ScraperError::Decode(err.to_string()))
					}
				},
			},
			429 => Verdict::RateLimited,
			403 => match self.detector.detect(&response.text()) {
				Some(detection) => Verdict::Challenge(detection),
				None => Verdict::Fail(ScraperError::PermanentHttp { status: 403 }),
			},
			status => {
				log::warn!("HTTP {status} for {}", response.url);
				Verdict::Fail(ScraperError::PermanentHttp { status })
			}
		}
	}

	async fn solve_challenge(
		&self,
		url: &Url,
		detection: ChallengeDetection,
		lease: Option<&ProxyLease>,
	) -> ScraperResult<()> {
		let challenge_type = detection.kind.name();
		self.dispatch_challenge(url, challenge_type, None);

		let Some(resolver) = &self.resolver else {
			log::warn!("{challenge_type} challenge on {url} but no captcha provider is configured");
			return Err(ScraperError::ChallengeRequired(challenge_type));
		};

		let relay = lease.map(|lease| &lease.endpoint);
		match resolver.solve_for_url(url, detection.kind, relay).await {
			Ok(solution) => {
				log::debug!(
					"challenge task {} settled",
					solution.task_id.as_deref().unwrap_or("-")
				);
				self.dispatch_challenge(url, challenge_type, Some(true));
				Ok(())
			}
			Err(CaptchaError::Cancelled) => Err(ScraperError::Cancelled),
			Err(err) => {
				self.dispatch_challenge(url, challenge_type, Some(false));
				Err(ScraperError::ChallengeSolveFailure(err))
			}
		}
	}

	fn dispatch_challenge(&self, url: &Url, challenge_type: &str, solved: Option<bool>) {
		self.events.dispatch(FetchEvent::Challenge(ChallengeEvent {
			url: url.clone(),
			challenge_type: challenge_type.to_string(),
			solved,
			timestamp: Utc::now(),
		}));
	}

	async fn wait(&self, duration: std::time::Duration) -> ScraperResult<()> {
		tokio::select! {
			_ = self.cancel.cancelled() => Err(ScraperError::Cancelled),
			_ = sleep(duration) => Ok(()),
		}
	}

	fn paginator(&self, target: ListingTarget, limit: usize) -> Paginator<'_> {
		Paginator::new(self, target, limit)
			.batch_size(self.config.batch_size)
			.request_delay(self.config.request_delay)
			.with_cancellation(self.cancel.child_token())
	}

	/// Lazy walk over `target`, yielding at most `limit` items.
	pub fn paginate(&self, target: ListingTarget, limit: usize) -> ScraperResult<Paginator<'_>> {
		let limit = validate_limit(limit)?;
		Ok(self.paginator(target, limit))
	}

	/// Walks `target` and collects up to `limit` items.
	///
	/// A failure after the first items have arrived ends the walk: the items
	/// so far are returned and a [`FetchEvent::Truncated`] is published.
	/// Validation errors, cancellation and a failure before any item arrived
	/// are returned as errors.
	pub async fn fetch_listing(&self, target: ListingTarget, limit: usize) -> ScraperResult<Vec<Item>> {
		let label = target.to_string();
		match self.paginate(target, limit)?.collect_partial().await {
			(items, None) => Ok(items),
			(_, Some(err @ (ScraperError::Validation(_) | ScraperError::Cancelled))) => Err(err),
			(items, Some(err)) if items.is_empty() => Err(err),
			(items, Some(err)) => {
				self.events.dispatch(FetchEvent::Truncated(TruncationEvent {
					target: label,
					items: items.len(),
					error: err.to_string(),
					timestamp: Utc::now(),
				}));
				Ok(items)
			}
		}
	}

	/// Posts from a community listing.
	pub async fn fetch_subreddit(&self, name: &str, sort: &str, limit: usize) -> ScraperResult<Vec<Post>> {
		let target = ListingTarget::subreddit(name, sort)?;
		let items = self.fetch_listing(target, limit).await?;
		Ok(items
			.into_iter()
			.filter_map(|item| match item {
				Item::Post(post) => Some(post),
				Item::Comment(_) => None,
			})
			.collect())
	}

	/// A post and its comment forest.
	pub async fn fetch_comments(&self, subreddit: &str, post_id: &str, sort: &str) -> ScraperResult<CommentThread> {
		let subreddit = Subreddit::parse(subreddit)?;
		let post_id = PostId::parse(post_id)?;
		let sort: CommentSort = sort.parse()?;

		let path = format!("/r/{subreddit}/comments/{post_id}.json");
		let query = vec![
			("sort".to_string(), sort.as_str().to_string()),
			("limit".to_string(), COMMENT_LIMIT.to_string()),
			("depth".to_string(), self.config.max_comment_depth.to_string()),
		];
		let body = self.fetch_json(&path, &query).await?;
		let thread = parse_comment_thread(body, self.config.max_comment_depth)?;
		log::info!(
			"fetched {} comments for r/{subreddit}/{post_id}",
			thread.total_comments()
		);
		Ok(thread)
	}

	/// Runs one independent pagination stream per target concurrently.
	///
	/// A failing stream reports an empty item list plus its error; the other
	/// streams are unaffected. Outcomes come back in input order.
	pub async fn fetch_many(
		&self,
		targets: Vec<ListingTarget>,
		limit: usize,
	) -> ScraperResult<Vec<TargetOutcome>> {
		let limit = validate_limit(limit)?;
		let streams = targets.into_iter().map(|target| async move {
			match self.paginator(target.clone(), limit).collect_partial().await {
				(items, None) => TargetOutcome {
					target,
					items,
					error: None,
				},
				(discarded, Some(err)) => {
					log::warn!("{target}: failed after {} items: {err}", discarded.len());
					TargetOutcome {
						target,
						items: Vec::new(),
						error: Some(err),
					}
				}
			}
		});
		Ok(join_all(streams).await)
	}
}

#[async_trait]
impl PageSource for ListingScraper {
	async fn fetch_page(
		&self,
		target: &ListingTarget,
		limit: usize,
		after: Option<&str>,
	) -> Result<Page, ScraperError> {
		let mut query = target.query();
		query.push(("limit".to_string(), limit.to_string()));
		if let Some(cursor) = after {
			query.push(("after".to_string(), cursor.to_string()));
		}
		let path = target.path();
		let body = self.fetch_json(&path, &query).await?;
		target.parse_page(body).map_err(|err| {
			if let Ok(url) = self.endpoint(&path) {
				self.events.dispatch(FetchEvent::Decode(ErrorEvent {
					url,
					error: err.to_string(),
					timestamp: Utc::now(),
				}));
			}
			ScraperError::Decode(err.to_string())
		})
	}
}

/// `[post_listing, comment_listing]` into a [`CommentThread`].
fn parse_comment_thread(body: Value, max_depth: usize) -> ScraperResult<CommentThread> {
	let Value::Array(mut parts) = body else {
		return Err(ScraperError::Decode("comment response is not an array".into()));
	};
	if parts.len() < 2 {
		return Err(ScraperError::Decode(format!(
			"comment response has {} elements, expected 2",
			parts.len()
		)));
	}

	let decode = |value: Value| {
		serde_json::from_value::<ListingEnvelope>(value).map_err(|err| ScraperError::Decode(err.to_string()))
	};
	let comments = decode(parts.swap_remove(1))?;
	let post_listing = decode(parts.swap_remove(0))?;

	let post = post_listing
		.data
		.children
		.iter()
		.find(|child| child.kind == KIND_POST)
		.map(|child| Post::from_data(&child.data));

	Ok(CommentThread {
		post,
		comments: build_comment_tree(&comments.data.children, max_depth),
	})
}
