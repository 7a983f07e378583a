//! Reqwest-backed [`Transport`] with one lazily built client per relay.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT};
use tokio::sync::Mutex;
use url::Url;

use super::{Transport, TransportError, TransportResponse};
use crate::modules::proxy::ProxyEndpoint;

static DESKTOP_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.4; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4_1) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4.1 Safari/605.1.15",
];

/// Transport sharing connections across requests of one scraper instance.
pub struct ReqwestTransport {
    user_agent: String,
    rotate_user_agents: bool,
    timeout: Duration,
    clients: Mutex<HashMap<Option<String>, Client>>,
}

impl ReqwestTransport {
    pub fn new(user_agent: impl Into<String>, rotate_user_agents: bool, timeout: Duration) -> Self {
        Self {
            user_agent: user_agent.into(),
            rotate_user_agents,
            timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn base_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert("dnt", HeaderValue::from_static("1"));
        headers
    }

    fn pick_user_agent(&self) -> &str {
        if self.rotate_user_agents {
            DESKTOP_USER_AGENTS
                .choose(&mut rand::thread_rng())
                .copied()
                .unwrap_or(self.user_agent.as_str())
        } else {
            self.user_agent.as_str()
        }
    }

    async fn client(&self, proxy: Option<&ProxyEndpoint>) -> Result<Client, TransportError> {
        let key = proxy.map(ProxyEndpoint::url);
        let mut guard = self.clients.lock().await;
        if let Some(client) = guard.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder()
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .timeout(self.timeout)
            .default_headers(Self::base_headers());

        if let Some(endpoint) = key.as_deref() {
            let relay = reqwest::Proxy::all(endpoint)
                .map_err(|err| TransportError::Build(err.to_string()))?;
            builder = builder.proxy(relay);
        }

        let client = builder
            .build()
            .map_err(|err| TransportError::Build(err.to_string()))?;
        guard.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(
        &self,
        url: &Url,
        query: &[(String, String)],
        proxy: Option<&ProxyEndpoint>,
    ) -> Result<TransportResponse, TransportError> {
        let client = self.client(proxy).await?;
        let user_agent = self.pick_user_agent().to_string();

        let response = client
            .get(url.clone())
            .query(query)
            .header(USER_AGENT, user_agent)
            .send()
            .await
            .map_err(|err| classify(err, proxy.is_some()))?;

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let body = response
            .bytes()
            .await
            .map_err(|err| classify(err, proxy.is_some()))?;

        Ok(TransportResponse::new(status, final_url, body))
    }

    async fn close(&self) {
        self.clients.lock().await.clear();
    }
}

/// reqwest does not say which hop refused a connection, so a connect error on
/// a proxied request is blamed on the relay. An unreachable origin behind a
/// healthy relay therefore counts against that relay until a probe clears it.
fn classify(err: reqwest::Error, proxied: bool) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if proxied && err.is_connect() {
        TransportError::Proxy(err.to_string())
    } else if err.is_builder() {
        TransportError::Build(err.to_string())
    } else {
        TransportError::Network(err.to_string())
    }
}
