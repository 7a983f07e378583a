use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;

use super::ProxyEndpoint;

const PROBE_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("no probe targets configured")]
    NoTargets,
    #[error("probe client could not be built: {0}")]
    Client(String),
    #[error("probe request failed: {0}")]
    Request(String),
}

/// Lightweight reachability check routed through a proxy endpoint.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Returns the HTTP status the target answered with.
    async fn probe(&self, endpoint: &ProxyEndpoint, target: &str) -> Result<u16, ProbeError>;
}

/// Probe that issues a GET to an "echo my IP" service through the proxy.
#[derive(Debug, Clone)]
pub struct ReqwestProbe {
    timeout: Duration,
}

impl ReqwestProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl HealthProbe for ReqwestProbe {
    async fn probe(&self, endpoint: &ProxyEndpoint, target: &str) -> Result<u16, ProbeError> {
        let proxy = reqwest::Proxy::all(endpoint.url())
            .map_err(|err| ProbeError::Client(err.to_string()))?;
        let client = Client::builder()
            .proxy(proxy)
            .timeout(self.timeout)
            .user_agent(PROBE_USER_AGENT)
            .build()
            .map_err(|err| ProbeError::Client(err.to_string()))?;

        let response = client
            .get(target)
            .send()
            .await
            .map_err(|err| ProbeError::Request(err.to_string()))?;
        Ok(response.status().as_u16())
    }
}
