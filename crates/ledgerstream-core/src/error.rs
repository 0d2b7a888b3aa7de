//! Error types shared across the LedgerStream crates.

use thiserror::Error;

use crate::request::RpcError;

/// Errors that can occur on the request/response or push channel.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed (connection refused, non-200 status, etc.).
    #[error("HTTP error: {0}")]
    Http(String),

    /// WebSocket send/receive error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Handshake or dial failure.
    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    /// Operation timed out after the configured duration.
    #[error("Timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The node replied with an error status.
    #[error("RPC error: {0}")]
    Rpc(RpcError),

    /// Reconnect attempts exhausted; the channel gave up.
    #[error("Gave up reconnecting after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// The channel's background task is gone.
    #[error("Channel closed")]
    Closed,

    /// Payload could not be (de)serialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` if the failure came from the network rather than the node.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::WebSocket(_) | Self::Connect { .. } | Self::Timeout { .. }
        )
    }
}

/// Errors raised inside the ingest pipeline.
///
/// None of these stop the pipeline; they are logged where they occur.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Push or request/response connection failure.
    #[error("Connection error: {0}")]
    Connection(#[from] TransportError),

    #[error("Undecodable message: {reason}")]
    Decode { reason: String },

    #[error("Enrichment failed for ledger {ledger_index}: {source}")]
    Enrichment {
        ledger_index: u64,
        #[source]
        source: TransportError,
    },

    /// Record failed the completeness check.
    #[error("Incomplete record: {reason}")]
    Validation { reason: String },

    /// A ledger record with the same index is already stored.
    #[error("Ledger {ledger_index} already stored")]
    Duplicate { ledger_index: u64 },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl IngestError {
    pub fn storage(e: impl std::fmt::Display) -> Self {
        Self::Storage(e.to_string())
    }
}
