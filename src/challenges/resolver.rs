//! Challenge resolver.
//!
//! Wraps a [`CaptchaProvider`] with the policies the fetch engine relies on:
//! site key lookup by domain, bounded polling, retry with exponential backoff
//! and a balance gate in front of any spend. Every outcome comes back as a
//! [`CaptchaResult`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::CaptchaConfig;
use crate::external_deps::captcha::{
    CaptchaError, CaptchaProvider, CaptchaResult, CaptchaSolution, CaptchaTask, ChallengeKind,
    ChallengeTask, PollStatus,
};
use crate::modules::proxy::ProxyEndpoint;

pub struct ChallengeResolver {
    provider: Arc<dyn CaptchaProvider>,
    config: CaptchaConfig,
    cancel: CancellationToken,
}

impl ChallengeResolver {
    pub fn new(provider: Arc<dyn CaptchaProvider>, config: CaptchaConfig) -> Self {
        Self {
            provider,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort outstanding provider calls, polls and backoff waits when
    /// `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &CaptchaConfig {
        &self.config
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Registered site key for the URL's host, trying the exact host, then
    /// without a leading `www.`, then with one.
    pub fn resolve_site_key(&self, url: &Url) -> Option<&str> {
        let domain = match url.port() {
            Some(port) => format!("{}:{port}", url.host_str()?),
            None => url.host_str()?.to_string(),
        };
        let keys = &self.config.site_keys;

        if let Some(key) = keys.get(&domain) {
            return Some(key.as_str());
        }
        if let Some(bare) = domain.strip_prefix("www.")
            && let Some(key) = keys.get(bare)
        {
            return Some(key.as_str());
        }
        if let Some(key) = keys.get(&format!("www.{domain}")) {
            return Some(key.as_str());
        }

        log::warn!("no site key configured for domain: {domain}");
        None
    }

    pub async fn create_task(&self, task: &CaptchaTask) -> Result<String, CaptchaError> {
        self.cancellable(self.provider.create_task(task))
            .await
            .map_err(|err| match err {
                CaptchaError::Submission(_)
                | CaptchaError::Configuration(_)
                | CaptchaError::Cancelled => err,
                other => CaptchaError::Submission(other.to_string()),
            })
    }

    /// Poll `task_id` every `poll_interval` until it is ready, the provider
    /// reports failure, or `max_wait` elapses. The deadline also bounds a
    /// slow in-flight poll.
    pub async fn poll_result(
        &self,
        task_id: &str,
        max_wait: Duration,
        poll_interval: Duration,
    ) -> CaptchaResult {
        let deadline = Instant::now() + max_wait;
        loop {
            let status = tokio::select! {
                _ = self.cancel.cancelled() => return Err(CaptchaError::Cancelled),
                _ = sleep_until(deadline) => return Err(CaptchaError::Timeout(max_wait)),
                status = async {
                    sleep(poll_interval).await;
                    self.provider.task_result(task_id).await
                } => status,
            };

            match status {
                Ok(PollStatus::Ready { solution, cost }) => {
                    let solved = CaptchaSolution::from_provider(&solution).ok_or_else(|| {
                        CaptchaError::Failed(format!("task {task_id} returned no token"))
                    })?;
                    log::info!("captcha solved successfully: {task_id}");
                    return Ok(solved.with_task_id(task_id).with_cost(cost));
                }
                Ok(PollStatus::Processing) => {}
                Ok(PollStatus::Failed(reason)) => {
                    log::error!("captcha task {task_id} failed: {reason}");
                    return Err(CaptchaError::Failed(reason));
                }
                Err(err) => {
                    log::warn!("polling captcha task {task_id} failed: {err}");
                }
            }
        }
    }

    /// Submit `task` and poll it to a terminal state.
    pub async fn solve(&self, task: &CaptchaTask) -> CaptchaResult {
        let task_id = self.create_task(task).await?;
        let mut record = ChallengeTask::submitted(task_id, task.kind.clone());
        let outcome = self
            .poll_result(&record.task_id, self.config.max_wait, self.config.poll_interval)
            .await;
        record.settle(&outcome);
        log::debug!(
            "captcha task {} settled as {:?} (cost {:?})",
            record.task_id,
            record.status,
            record.cost
        );
        outcome
    }

    /// Run `op` up to `max_retries + 1` times, waiting `2^attempt` backoff
    /// units before each retry.
    pub async fn solve_with_retry<F, Fut>(&self, mut op: F) -> CaptchaResult
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CaptchaResult>,
    {
        let attempts = self.config.max_retries.saturating_add(1);
        let mut last_error = String::from("no attempt made");

        for attempt in 0..attempts {
            if attempt > 0 {
                let wait = backoff(self.config.backoff_unit, attempt);
                log::info!(
                    "retrying captcha solve in {:.1}s (attempt {}/{attempts})",
                    wait.as_secs_f64(),
                    attempt + 1
                );
                self.wait(wait).await?;
            }

            match op().await {
                Ok(solution) => return Ok(solution),
                Err(CaptchaError::Cancelled) => return Err(CaptchaError::Cancelled),
                Err(err) => {
                    log::warn!("captcha solve attempt {} failed: {err}", attempt + 1);
                    last_error = err.to_string();
                }
            }
        }

        Err(CaptchaError::Exhausted {
            attempts,
            last_error,
        })
    }

    /// Refuse to spend when the balance is unknown or below `min_balance`;
    /// otherwise delegate to [`ChallengeResolver::solve_with_retry`].
    pub async fn balance_gate<F, Fut>(&self, op: F) -> CaptchaResult
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CaptchaResult>,
    {
        let balance = match self.cancellable(self.provider.balance()).await {
            Ok(balance) => balance,
            Err(CaptchaError::Cancelled) => return Err(CaptchaError::Cancelled),
            Err(CaptchaError::BalanceUnavailable(msg)) => {
                return Err(CaptchaError::BalanceUnavailable(msg));
            }
            Err(err) => return Err(CaptchaError::BalanceUnavailable(err.to_string())),
        };

        if balance < self.config.min_balance {
            log::error!("insufficient captcha balance: ${balance}");
            return Err(CaptchaError::InsufficientBalance {
                balance,
                minimum: self.config.min_balance,
            });
        }

        log::info!("account balance: ${balance} - proceeding with captcha solve");
        self.solve_with_retry(op).await
    }

    /// Full hand-off used by the fetch engine: look up the site key, then run
    /// a balance-gated, retried solve. `proxy` is the relay the blocked
    /// request went through, if any.
    pub async fn solve_for_url(
        &self,
        url: &Url,
        kind: ChallengeKind,
        proxy: Option<&ProxyEndpoint>,
    ) -> CaptchaResult {
        let site_key = self
            .resolve_site_key(url)
            .ok_or_else(|| CaptchaError::NoSiteKey(url.host_str().unwrap_or_default().to_string()))?
            .to_string();
        let mut task = CaptchaTask::for_site(kind, url.clone(), site_key);
        if let Some(proxy) = proxy {
            task = task.with_proxy(proxy.clone());
        }
        task.to_payload()?;

        log::info!("attempting to solve {} for {url}", task.kind);
        let task = &task;
        self.balance_gate(move || self.solve(task)).await
    }

    async fn cancellable<T>(
        &self,
        call: impl Future<Output = Result<T, CaptchaError>>,
    ) -> Result<T, CaptchaError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(CaptchaError::Cancelled),
            result = call => result,
        }
    }

    async fn wait(&self, duration: Duration) -> Result<(), CaptchaError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(CaptchaError::Cancelled),
            _ = sleep(duration) => Ok(()),
        }
    }
}

pub(crate) fn backoff(unit: Duration, attempt: u32) -> Duration {
    unit.saturating_mul(2u32.saturating_pow(attempt))
}
