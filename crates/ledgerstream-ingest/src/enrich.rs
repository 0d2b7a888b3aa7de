//! Enrichment: fill in ledger fields the push payload does not carry.

use std::sync::Arc;

use serde_json::{json, Value};

use ledgerstream_core::error::{IngestError, TransportError};
use ledgerstream_core::request::RpcError;
use ledgerstream_core::transport::RpcTransport;
use ledgerstream_core::types::ClosedLedgerEvent;

/// Fetches supplementary ledger data over the request/response channel.
#[derive(Clone)]
pub struct LedgerEnricher {
    transport: Arc<dyn RpcTransport>,
}

impl LedgerEnricher {
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self { transport }
    }

    /// Copy the ledger's total supply into `event`.
    ///
    /// On failure the event is returned unchanged with `total_coins` empty,
    /// and the persistence gate will discard it.
    pub async fn enrich(&self, mut event: ClosedLedgerEvent) -> ClosedLedgerEvent {
        match self.total_coins(event.ledger_index).await {
            Ok(total) => event.total_coins = total,
            Err(e) => {
                tracing::warn!(ledger_index = event.ledger_index, error = %e, "enrichment failed");
            }
        }
        event
    }

    /// Query `total_coins` for one ledger.
    pub async fn total_coins(&self, ledger_index: u64) -> Result<String, IngestError> {
        let params = json!({
            "ledger_index": ledger_index,
            "transactions": false,
            "expand": false,
        });
        let result = self
            .transport
            .call("ledger", params)
            .await
            .map_err(|source| IngestError::Enrichment { ledger_index, source })?;

        result
            .pointer("/ledger/total_coins")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| missing(ledger_index, "ledger.total_coins"))
    }

    /// Build a complete [`ClosedLedgerEvent`] for `ledger_index` from the
    /// `ledger` and `fee` methods, without waiting for a push message.
    pub async fn fetch_ledger(&self, ledger_index: u64) -> Result<ClosedLedgerEvent, IngestError> {
        let params = json!({
            "ledger_index": ledger_index,
            "transactions": true,
            "expand": false,
        });
        let result = self
            .transport
            .call("ledger", params)
            .await
            .map_err(|source| IngestError::Enrichment { ledger_index, source })?;
        let ledger = result
            .get("ledger")
            .ok_or_else(|| missing(ledger_index, "ledger"))?;

        let fee = self
            .transport
            .call("fee", json!({}))
            .await
            .map_err(|source| IngestError::Enrichment { ledger_index, source })?;
        let fee_base = fee
            .pointer("/drops/base_fee")
            .and_then(as_u64)
            .ok_or_else(|| missing(ledger_index, "drops.base_fee"))?;

        let txn_count = ledger
            .get("transactions")
            .and_then(Value::as_array)
            .map_or(0, |txs| txs.len() as i64);

        Ok(ClosedLedgerEvent {
            ledger_index: ledger.get("ledger_index").and_then(as_u64).unwrap_or(ledger_index),
            ledger_hash: str_field(ledger, "ledger_hash"),
            txn_count,
            fee_base,
            ledger_time: ledger.get("close_time").and_then(as_u64),
            total_coins: str_field(ledger, "total_coins"),
        })
    }
}

fn missing(ledger_index: u64, field: &str) -> IngestError {
    IngestError::Enrichment {
        ledger_index,
        source: TransportError::Rpc(RpcError::malformed(&format!("reply missing {field}"))),
    }
}

fn str_field(v: &Value, key: &str) -> String {
    v.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

/// The node reports some integers as JSON numbers and others as strings.
fn as_u64(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ledgerstream_core::request::{RpcRequest, RpcResponse};
    use std::sync::Mutex;

    /// Replies from a fixed table keyed by method name.
    struct Scripted {
        replies: Vec<(&'static str, Value)>,
        requests: Mutex<Vec<RpcRequest>>,
    }

    impl Scripted {
        fn new(replies: Vec<(&'static str, Value)>) -> Arc<Self> {
            Arc::new(Self {
                replies,
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl RpcTransport for Scripted {
        async fn send(&self, req: RpcRequest) -> Result<RpcResponse, TransportError> {
            self.requests.lock().unwrap().push(req.clone());
            self.replies
                .iter()
                .find(|(m, _)| *m == req.method)
                .map(|(_, v)| serde_json::from_value(v.clone()).unwrap())
                .ok_or_else(|| TransportError::Http("connection refused".into()))
        }

        fn url(&self) -> &str {
            "mock://scripted"
        }
    }

    fn ledger_event(index: u64) -> ClosedLedgerEvent {
        ClosedLedgerEvent {
            ledger_index: index,
            ledger_hash: "ABC".into(),
            txn_count: 42,
            fee_base: 10,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn enrich_copies_total_coins() {
        let transport = Scripted::new(vec![(
            "ledger",
            json!({"result": {"ledger": {"total_coins": "99999999999999"}, "status": "success"}}),
        )]);
        let enricher = LedgerEnricher::new(transport.clone());

        let ev = enricher.enrich(ledger_event(12345)).await;
        assert_eq!(ev.total_coins, "99999999999999");

        let reqs = transport.requests.lock().unwrap();
        assert_eq!(reqs[0].method, "ledger");
        assert_eq!(
            reqs[0].params[0],
            json!({"ledger_index": 12345, "transactions": false, "expand": false})
        );
    }

    #[tokio::test]
    async fn enrich_failure_leaves_field_empty() {
        let enricher = LedgerEnricher::new(Scripted::new(vec![]));
        let ev = enricher.enrich(ledger_event(7)).await;
        assert!(ev.total_coins.is_empty());
        assert_eq!(ev.ledger_hash, "ABC");
    }

    #[tokio::test]
    async fn node_error_reply_is_enrichment_error() {
        let transport = Scripted::new(vec![(
            "ledger",
            json!({"result": {"status": "error", "error": "lgrNotFound", "error_code": 21}}),
        )]);
        let err = LedgerEnricher::new(transport).total_coins(5).await.unwrap_err();
        match err {
            IngestError::Enrichment { ledger_index, source: TransportError::Rpc(rpc) } => {
                assert_eq!(ledger_index, 5);
                assert_eq!(rpc.error, "lgrNotFound");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_total_coins_is_an_error() {
        let transport = Scripted::new(vec![("ledger", json!({"result": {"ledger": {}}}))]);
        let err = LedgerEnricher::new(transport).total_coins(5).await.unwrap_err();
        assert!(matches!(err, IngestError::Enrichment { .. }));
    }

    #[tokio::test]
    async fn fetch_ledger_builds_complete_event() {
        let transport = Scripted::new(vec![
            (
                "ledger",
                json!({"result": {
                    "ledger": {
                        "ledger_index": "12345",
                        "ledger_hash": "ABC",
                        "close_time": 750000000u64,
                        "total_coins": "99999999999999",
                        "transactions": ["T1", "T2", "T3"]
                    },
                    "validated": true
                }}),
            ),
            ("fee", json!({"result": {"drops": {"base_fee": "10"}}})),
        ]);
        let ev = LedgerEnricher::new(transport).fetch_ledger(12345).await.unwrap();
        assert_eq!(ev.ledger_index, 12345);
        assert_eq!(ev.ledger_hash, "ABC");
        assert_eq!(ev.txn_count, 3);
        assert_eq!(ev.fee_base, 10);
        assert_eq!(ev.ledger_time, Some(750_000_000));
        assert_eq!(ev.total_coins, "99999999999999");
    }
}
