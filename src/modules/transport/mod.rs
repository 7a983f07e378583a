//! HTTP transport seam used by the fetch engine.
//!
//! The engine only needs "GET this URL with these query parameters, optionally
//! through this relay" and a classification of what went wrong. Keeping that
//! behind a trait lets tests script upstream behaviour without sockets.

mod reqwest_client;

pub use reqwest_client::ReqwestTransport;

use std::borrow::Cow;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use url::Url;

use crate::modules::proxy::ProxyEndpoint;

/// Raw upstream answer before any decoding.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub url: Url,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn new(status: u16, url: Url, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            url,
            body: body.into(),
        }
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Failure classes the retry loop distinguishes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("proxy connection failed: {0}")]
    Proxy(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("http client could not be built: {0}")]
    Build(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(
        &self,
        url: &Url,
        query: &[(String, String)],
        proxy: Option<&ProxyEndpoint>,
    ) -> Result<TransportResponse, TransportError>;

    /// Release pooled connections. The transport may be used again afterwards
    /// and will lazily reconnect.
    async fn close(&self) {}
}
