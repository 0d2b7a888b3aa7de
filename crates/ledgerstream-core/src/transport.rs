//! The `RpcTransport` trait — the request/response channel abstraction.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportError;
use crate::request::{RpcRequest, RpcResponse};

/// Issues one-shot queries against the ledger network.
///
/// Implementations must be `Send + Sync`; the trait is object-safe and is
/// shared as `Arc<dyn RpcTransport>`.
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    /// Send a single request and return the correlated reply.
    async fn send(&self, req: RpcRequest) -> Result<RpcResponse, TransportError>;

    /// Return the transport's endpoint.
    fn url(&self) -> &str;

    /// Convenience: call a method and return the unwrapped `result` object.
    async fn call(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let resp = self.send(RpcRequest::new(method, params)).await?;
        resp.into_result().map_err(TransportError::Rpc)
    }
}
