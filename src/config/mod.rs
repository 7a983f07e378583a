//! Immutable configuration consumed by the fetch engine, proxy pool and
//! challenge resolver.
//!
//! Values are built once (defaults, the fluent builder on
//! [`ListingScraperBuilder`](crate::ListingScraperBuilder), or deserialized by an
//! outer loader) and then moved into the components that read them. Nothing
//! in the crate mutates a config after construction.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::modules::proxy::ProxyProtocol;

pub const DEFAULT_API_BASE: &str = "https://www.reddit.com";
pub const DEFAULT_USER_AGENT: &str = "ListingScraper/1.0";

/// Top-level configuration for a [`ListingScraper`](crate::ListingScraper).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub api_base: String,
    pub user_agent: String,
    pub rotate_user_agents: bool,
    #[serde(with = "duration_secs")]
    pub request_delay: Duration,
    pub max_retries: u32,
    /// Unit multiplied by `2^attempt` between retries.
    #[serde(with = "duration_secs")]
    pub backoff_unit: Duration,
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
    pub batch_size: usize,
    pub max_comment_depth: usize,
    pub proxies: Vec<ProxySpec>,
    pub proxy_pool: ProxyPoolConfig,
    pub captcha: CaptchaConfig,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            rotate_user_agents: true,
            request_delay: Duration::from_secs(1),
            max_retries: 3,
            backoff_unit: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
            batch_size: 100,
            max_comment_depth: 100,
            proxies: Vec::new(),
            proxy_pool: ProxyPoolConfig::default(),
            captcha: CaptchaConfig::default(),
        }
    }
}

/// Credentials and address of one upstream relay, as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProxySpec {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, rename = "proxy_type")]
    pub protocol: ProxyProtocol,
}

/// Health gate and probing knobs for the proxy pool.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyPoolConfig {
    pub max_failures: u32,
    pub health_check_concurrency: usize,
    #[serde(with = "duration_secs")]
    pub probe_timeout: Duration,
    pub probe_targets: Vec<String>,
    #[serde(with = "duration_secs")]
    pub health_check_interval: Duration,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            max_failures: 3,
            health_check_concurrency: 10,
            probe_timeout: Duration::from_secs(10),
            probe_targets: vec![
                "http://httpbin.org/ip".to_string(),
                "https://api.ipify.org?format=json".to_string(),
                "http://icanhazip.com".to_string(),
            ],
            health_check_interval: Duration::from_secs(300),
        }
    }
}

/// Captcha solving behaviour: polling, retry budget, spend gate and the
/// per-domain site key registry.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptchaConfig {
    #[serde(with = "duration_secs")]
    pub max_wait: Duration,
    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,
    pub max_retries: u32,
    #[serde(with = "duration_secs")]
    pub backoff_unit: Duration,
    pub min_balance: f64,
    pub site_keys: HashMap<String, String>,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(120),
            poll_interval: Duration::from_secs(3),
            max_retries: 3,
            backoff_unit: Duration::from_secs(1),
            min_balance: 0.01,
            site_keys: HashMap::new(),
        }
    }
}

/// Durations travel as fractional seconds in serialized configs.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, de::Error};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}
