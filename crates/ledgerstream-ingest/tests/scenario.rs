//! End-to-end ingest scenarios against a local WebSocket node and a scripted
//! request/response transport.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use ledgerstream_core::error::TransportError;
use ledgerstream_core::request::{RpcRequest, RpcResponse};
use ledgerstream_core::store::RecordStore;
use ledgerstream_core::transport::RpcTransport;
use ledgerstream_ingest::{
    LedgerEnricher, PersistOutcome, PersistenceGate, Pipeline, PipelineConfig, PipelineHandle,
    StatsSnapshot, SubscriptionError, SubscriptionRegistry, TopicDispatcher, TopicFilter,
    ACCOUNTS_SUBSCRIPTION, LEDGER_SUBSCRIPTION,
};
use ledgerstream_storage::InMemoryStorage;
use ledgerstream_ws::{PushChannel, PushChannelConfig};

// ─── Fixtures ────────────────────────────────────────────────────────────────

/// Node that reports the same total supply for every ledger.
struct FixedSupply;

#[async_trait]
impl RpcTransport for FixedSupply {
    async fn send(&self, req: RpcRequest) -> Result<RpcResponse, TransportError> {
        let body = match req.method.as_str() {
            "ledger" => json!({"result": {
                "ledger": {
                    "ledger_index": req.params[0]["ledger_index"].to_string(),
                    "ledger_hash": "FETCHED",
                    "total_coins": "99999999999999",
                    "transactions": ["T1"]
                },
                "status": "success"
            }}),
            "fee" => json!({"result": {"drops": {"base_fee": "10"}}}),
            other => return Err(TransportError::Other(format!("unexpected method {other}"))),
        };
        Ok(serde_json::from_value(body)?)
    }

    fn url(&self) -> &str {
        "mock://fixed-supply"
    }
}

/// Node whose request/response endpoint is down.
struct Unreachable;

#[async_trait]
impl RpcTransport for Unreachable {
    async fn send(&self, _req: RpcRequest) -> Result<RpcResponse, TransportError> {
        Err(TransportError::Http("connection refused".into()))
    }

    fn url(&self) -> &str {
        "mock://down"
    }
}

struct Harness {
    store: Arc<InMemoryStorage>,
    dispatcher: Arc<TopicDispatcher>,
    channel: Arc<PushChannel>,
    registry: SubscriptionRegistry,
    pipeline: Pipeline,
    handle: PipelineHandle,
}

async fn harness(url: String, transport: Arc<dyn RpcTransport>) -> Harness {
    let store = Arc::new(InMemoryStorage::new());
    let dispatcher = Arc::new(TopicDispatcher::new());
    let channel = Arc::new(
        PushChannel::connect(url, PushChannelConfig::default(), dispatcher.clone())
            .await
            .expect("connect to local node"),
    );
    let pipeline = Pipeline::start(
        LedgerEnricher::new(transport),
        PersistenceGate::new(store.clone()),
        PipelineConfig::default(),
    );
    let handle = pipeline.handle();
    let registry = SubscriptionRegistry::new(channel.clone(), dispatcher.clone(), Arc::new(handle.clone()));
    Harness {
        store,
        dispatcher,
        channel,
        registry,
        pipeline,
        handle,
    }
}

/// Accept one connection, wait for a subscribe, push `frames`, then hold the
/// socket open until `release` fires. Returns the subscribe payload it saw.
async fn node(
    listener: TcpListener,
    frames: Vec<String>,
    release: oneshot::Receiver<()>,
) -> Value {
    let (tcp, _) = listener.accept().await.unwrap();
    let mut ws = accept_async(tcp).await.unwrap();
    let subscribe = next_json(&mut ws).await;
    for frame in frames {
        ws.send(Message::Text(frame.into())).await.unwrap();
    }
    let _ = release.await;
    subscribe
}

async fn next_json(ws: &mut WebSocketStream<TcpStream>) -> Value {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(t))) => return serde_json::from_str(t.as_str()).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn wait_for_total(handle: &PipelineHandle, total: u64) -> StatsSnapshot {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let stats = handle.stats();
            if stats.total() >= total {
                return stats;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("pipeline did not reach expected outcome count")
}

fn ledger_frame(index: u64) -> String {
    json!({
        "type": "ledgerClosed",
        "ledger_index": index,
        "ledger_hash": "ABC123",
        "txn_count": 42,
        "fee_base": 10
    })
    .to_string()
}

fn tx_frame(account: &str) -> String {
    json!({
        "type": "transaction",
        "engine_result": "tesSUCCESS",
        "ledger_hash": "LH",
        "ledger_index": 12346,
        "status": "closed",
        "validated": true,
        "transaction": {
            "Account": account,
            "TransactionType": "OfferCreate",
            "Fee": "12",
            "TakerGets": "1000000",
            "TakerPays": {"currency": "USD", "issuer": "rIssuer", "value": "2.5"},
            "date": 750000000u64,
            "hash": format!("TX-{account}")
        }
    })
    .to_string()
}

fn payment_frame(from: &str, to: &str) -> String {
    json!({
        "type": "transaction",
        "engine_result": "tesSUCCESS",
        "ledger_hash": "LH",
        "ledger_index": 12347,
        "status": "closed",
        "validated": true,
        "transaction": {
            "Account": from,
            "Destination": to,
            "TransactionType": "Payment",
            "Fee": "12",
            "Amount": "25000000",
            "hash": format!("PAY-{from}-{to}")
        }
    })
    .to_string()
}

fn mpt_offer_frame(account: &str) -> String {
    json!({
        "type": "transaction",
        "status": "closed",
        "validated": true,
        "transaction": {
            "Account": account,
            "TransactionType": "OfferCreate",
            "Fee": "12",
            "TakerGets": {"value": "10", "mpt_issuance_id": "00AB"},
            "TakerPays": "1000",
            "hash": format!("MPT-{account}")
        }
    })
    .to_string()
}

// ─── Scenarios ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn ledger_stream_enriches_dedups_and_gates() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (release, held) = oneshot::channel();
    let frames = vec![
        ledger_frame(12345),
        ledger_frame(12345),
        json!({"type": "ledgerClosed", "ledger_index": 0, "ledger_hash": "ABC123", "txn_count": 42}).to_string(),
        "{not json".to_string(),
        json!({"type": "response", "id": LEDGER_SUBSCRIPTION, "status": "success"}).to_string(),
    ];
    let server = tokio::spawn(node(listener, frames, held));

    let h = harness(url, Arc::new(FixedSupply)).await;
    h.registry.start(LEDGER_SUBSCRIPTION, TopicFilter::Ledger).await.unwrap();

    let stats = wait_for_total(&h.handle, 3).await;
    assert_eq!(stats.inserted, 1);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(stats.incomplete, 1);

    assert_eq!(h.store.ledger_count(), 1);
    let record = h.store.find_ledger(12345).await.unwrap().unwrap();
    assert_eq!(record.ledger_hash, "ABC123");
    assert_eq!(record.txn_count, 42);
    assert_eq!(record.fee_base, 10);
    assert_eq!(record.total_coins, "99999999999999");
    assert!(h.store.find_ledger(0).await.unwrap().is_none());

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.dispatcher.undecodable_count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("garbage frame was not reported");
    assert_eq!(h.dispatcher.undecodable_count(), 1);

    release.send(()).unwrap();
    let subscribe = server.await.unwrap();
    assert_eq!(
        subscribe,
        json!({"id": LEDGER_SUBSCRIPTION, "command": "subscribe", "streams": ["ledger"]})
    );

    h.registry.shutdown().await;
    h.pipeline.shutdown().await;
    h.channel.close().await.unwrap();
}

#[tokio::test]
async fn enrichment_failure_drops_the_ledger() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (release, held) = oneshot::channel();
    let server = tokio::spawn(node(listener, vec![ledger_frame(500)], held));

    let h = harness(url, Arc::new(Unreachable)).await;
    h.registry.start(LEDGER_SUBSCRIPTION, TopicFilter::Ledger).await.unwrap();

    let stats = wait_for_total(&h.handle, 1).await;
    assert_eq!(stats.incomplete, 1);
    assert_eq!(h.store.ledger_count(), 0);

    release.send(()).unwrap();
    server.await.unwrap();
    h.registry.shutdown().await;
    h.pipeline.shutdown().await;
}

#[tokio::test]
async fn account_stream_routes_transactions_affecting_subscribed_accounts() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (release, held) = oneshot::channel();
    let frames = vec![
        tx_frame("rOther"),
        tx_frame("rA"),
        tx_frame("rB"),
        tx_frame("rA"),
        payment_frame("rX", "rA"),
        mpt_offer_frame("rB"),
    ];
    let server = tokio::spawn(node(listener, frames, held));

    let h = harness(url, Arc::new(FixedSupply)).await;
    h.registry
        .start(ACCOUNTS_SUBSCRIPTION, TopicFilter::Accounts(vec!["rA".into(), "rB".into()]))
        .await
        .unwrap();

    let stats = wait_for_total(&h.handle, 5).await;
    assert_eq!(stats.inserted, 5);

    // Append-only: the repeated rA transaction is stored twice.
    let for_a = h.store.transactions_for("rA");
    assert_eq!(for_a.len(), 2);
    assert_eq!(for_a[0].taker_gets, "1000000");
    assert_eq!(for_a[0].taker_pays, r#"{"currency":"USD","issuer":"rIssuer","value":"2.5"}"#);
    assert_eq!(for_a[0].tx_hash, "TX-rA");
    assert!(h.store.transactions_for("rOther").is_empty());

    // Incoming payment: sent by rX, stored because it credits rA.
    let incoming = h.store.transactions_for("rX");
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].transaction_type, "Payment");
    assert_eq!(incoming[0].tx_hash, "PAY-rX-rA");

    let for_b = h.store.transactions_for("rB");
    assert_eq!(for_b.len(), 2);
    assert!(for_b
        .iter()
        .any(|t| t.taker_gets == r#"{"mpt_issuance_id":"00AB","value":"10"}"#));
    assert_eq!(h.dispatcher.undecodable_count(), 0);

    release.send(()).unwrap();
    let subscribe = server.await.unwrap();
    assert_eq!(subscribe["accounts"], json!(["rA", "rB"]));

    h.registry.shutdown().await;
    h.pipeline.shutdown().await;
}

#[tokio::test]
async fn subscription_names_are_exclusive() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (release, held) = oneshot::channel();
    let server = tokio::spawn(node(listener, vec![], held));

    let h = harness(url, Arc::new(FixedSupply)).await;
    h.registry
        .start(ACCOUNTS_SUBSCRIPTION, TopicFilter::Accounts(vec!["rA".into()]))
        .await
        .unwrap();

    let err = h
        .registry
        .start(ACCOUNTS_SUBSCRIPTION, TopicFilter::Accounts(vec!["rA".into()]))
        .await
        .unwrap_err();
    assert!(matches!(err, SubscriptionError::AlreadyActive(_)));

    let err = h.registry.stop("missing").await.unwrap_err();
    assert!(matches!(err, SubscriptionError::NotFound(_)));

    h.registry.stop(ACCOUNTS_SUBSCRIPTION).await.unwrap();
    assert_eq!(h.channel.remembered(), 0);

    release.send(()).unwrap();
    server.await.unwrap();
    h.pipeline.shutdown().await;
}

#[tokio::test]
async fn one_shot_fetch_goes_through_the_gate() {
    let store = Arc::new(InMemoryStorage::new());
    let gate = PersistenceGate::new(store.clone());
    let enricher = LedgerEnricher::new(Arc::new(FixedSupply));

    let event = enricher.fetch_ledger(12345).await.unwrap();
    assert_eq!(gate.persist_ledger(event.clone()).await.unwrap(), PersistOutcome::Inserted);
    assert_eq!(gate.persist_ledger(event).await.unwrap(), PersistOutcome::SkippedDuplicate);

    let record = store.find_ledger(12345).await.unwrap().unwrap();
    assert_eq!(record.ledger_hash, "FETCHED");
    assert_eq!(record.total_coins, "99999999999999");
}
