//! HTTP request/response client backed by `reqwest`.

use std::time::Duration;

use async_trait::async_trait;

use ledgerstream_core::error::TransportError;
use ledgerstream_core::request::{RpcRequest, RpcResponse};
use ledgerstream_core::transport::RpcTransport;

/// Configuration for `HttpRpcClient`.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Per-request timeout; `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(30)),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// One-shot request/response client. Stateless apart from the connection pool.
pub struct HttpRpcClient {
    url: String,
    http: reqwest::Client,
    request_timeout: Option<Duration>,
}

impl HttpRpcClient {
    /// Create a new client for the given endpoint URL.
    pub fn new(url: impl Into<String>, config: HttpClientConfig) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder().connect_timeout(config.connect_timeout);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;

        Ok(Self {
            url: url.into(),
            http,
            request_timeout: config.request_timeout,
        })
    }

    /// Create with default configuration.
    pub fn default_for(url: impl Into<String>) -> Result<Self, TransportError> {
        Self::new(url, HttpClientConfig::default())
    }

    fn classify(&self, err: reqwest::Error) -> TransportError {
        match self.request_timeout {
            Some(timeout) if err.is_timeout() => TransportError::Timeout {
                ms: timeout.as_millis() as u64,
            },
            _ => TransportError::Http(err.to_string()),
        }
    }
}

#[async_trait]
impl RpcTransport for HttpRpcClient {
    async fn send(&self, req: RpcRequest) -> Result<RpcResponse, TransportError> {
        tracing::debug!(method = %req.method, url = %self.url, "sending request");

        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Http(format!("HTTP {status}: {body}")));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| self.classify(e))?;
        Ok(serde_json::from_slice::<RpcResponse>(&bytes)?)
    }

    fn url(&self) -> &str {
        &self.url
    }
}
