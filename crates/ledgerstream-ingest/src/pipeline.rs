//! Two-stage ingest pipeline: receive → enrich → persist.
//!
//! Subscription tasks hand messages to a [`PipelineHandle`]. Ledger events go
//! to the enrichment stage, which runs one task per event (up to
//! `max_inflight_enrichments` at once) so a slow request/response call never
//! holds up the push read loop. Enriched ledgers
//! and account transactions meet in a single persistence worker, so dedup
//! lookups and inserts for the same ledger index never interleave.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use ledgerstream_core::error::IngestError;
use ledgerstream_core::types::{AccountTransactionEvent, ClosedLedgerEvent};

use crate::dispatcher::PushMessage;
use crate::enrich::LedgerEnricher;
use crate::gate::{PersistOutcome, PersistenceGate};
use crate::handler::MessageHandler;

/// Queue sizes and concurrency for the two stages.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub enrich_queue: usize,
    pub persist_queue: usize,
    /// Enrichment calls in flight at once. When reached, the stage stops
    /// reading its queue and submitters wait.
    pub max_inflight_enrichments: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enrich_queue: 256,
            persist_queue: 1024,
            max_inflight_enrichments: 32,
        }
    }
}

enum PersistJob {
    Ledger(ClosedLedgerEvent),
    Transaction(AccountTransactionEvent),
}

/// Outcome counters, updated by the persistence worker.
#[derive(Debug, Default)]
pub struct PipelineStats {
    inserted: AtomicU64,
    duplicates: AtomicU64,
    incomplete: AtomicU64,
    storage_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub inserted: u64,
    pub duplicates: u64,
    pub incomplete: u64,
    pub storage_errors: u64,
}

impl StatsSnapshot {
    /// Records that reached the gate, whatever the outcome.
    pub fn total(&self) -> u64 {
        self.inserted + self.duplicates + self.incomplete + self.storage_errors
    }
}

impl PipelineStats {
    fn record(&self, result: &Result<PersistOutcome, IngestError>) {
        let counter = match result {
            Ok(PersistOutcome::Inserted) => &self.inserted,
            Ok(PersistOutcome::SkippedDuplicate) => &self.duplicates,
            Ok(PersistOutcome::SkippedIncomplete(_)) => &self.incomplete,
            Err(_) => &self.storage_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            inserted: self.inserted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            incomplete: self.incomplete.load(Ordering::Relaxed),
            storage_errors: self.storage_errors.load(Ordering::Relaxed),
        }
    }
}

struct Senders {
    enrich: Mutex<Option<mpsc::Sender<ClosedLedgerEvent>>>,
    persist: Mutex<Option<mpsc::Sender<PersistJob>>>,
}

/// Cheap, cloneable entry point into the pipeline.
#[derive(Clone)]
pub struct PipelineHandle {
    senders: Arc<Senders>,
    stats: Arc<PipelineStats>,
}

impl PipelineHandle {
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Queue a ledger event for enrichment.
    pub async fn submit_ledger(&self, event: ClosedLedgerEvent) {
        let tx = self.senders.enrich.lock().unwrap().clone();
        match tx {
            Some(tx) => {
                if tx.send(event).await.is_err() {
                    tracing::warn!("enrichment stage stopped; ledger event dropped");
                }
            }
            None => tracing::debug!(ledger_index = event.ledger_index, "pipeline closed; ledger event dropped"),
        }
    }

    /// Queue a transaction event for persistence.
    pub async fn submit_transaction(&self, event: AccountTransactionEvent) {
        let tx = self.senders.persist.lock().unwrap().clone();
        match tx {
            Some(tx) => {
                if tx.send(PersistJob::Transaction(event)).await.is_err() {
                    tracing::warn!("persistence stage stopped; transaction dropped");
                }
            }
            None => tracing::debug!("pipeline closed; transaction dropped"),
        }
    }
}

#[async_trait]
impl MessageHandler for PipelineHandle {
    async fn handle(&self, subscription: &str, message: PushMessage) {
        match message {
            PushMessage::LedgerClosed(event) => self.submit_ledger(event).await,
            PushMessage::Transaction(event) => self.submit_transaction(event).await,
            PushMessage::Response(v) => {
                tracing::debug!(subscription, response = %v, "command response");
            }
        }
    }
}

/// Owns the stage workers.
pub struct Pipeline {
    handle: PipelineHandle,
    enrich_worker: JoinHandle<()>,
    persist_worker: JoinHandle<()>,
}

impl Pipeline {
    /// Spawn the enrichment and persistence workers.
    pub fn start(enricher: LedgerEnricher, gate: PersistenceGate, config: PipelineConfig) -> Self {
        let (enrich_tx, enrich_rx) = mpsc::channel(config.enrich_queue.max(1));
        let (persist_tx, persist_rx) = mpsc::channel(config.persist_queue.max(1));
        let stats = Arc::new(PipelineStats::default());

        let enrich_worker = tokio::spawn(enrich_stage(
            enricher,
            enrich_rx,
            persist_tx.clone(),
            config.max_inflight_enrichments.max(1),
        ));
        let persist_worker = tokio::spawn(persist_stage(gate, persist_rx, stats.clone()));

        let handle = PipelineHandle {
            senders: Arc::new(Senders {
                enrich: Mutex::new(Some(enrich_tx)),
                persist: Mutex::new(Some(persist_tx)),
            }),
            stats,
        };

        Self {
            handle,
            enrich_worker,
            persist_worker,
        }
    }

    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    /// Stop accepting events, then wait until everything queued is persisted.
    pub async fn shutdown(self) -> StatsSnapshot {
        self.handle.senders.enrich.lock().unwrap().take();
        self.handle.senders.persist.lock().unwrap().take();

        if let Err(e) = self.enrich_worker.await {
            tracing::error!(error = %e, "enrichment worker panicked");
        }
        if let Err(e) = self.persist_worker.await {
            tracing::error!(error = %e, "persistence worker panicked");
        }

        let stats = self.handle.stats();
        tracing::info!(
            inserted = stats.inserted,
            duplicates = stats.duplicates,
            incomplete = stats.incomplete,
            storage_errors = stats.storage_errors,
            "pipeline drained"
        );
        stats
    }
}

async fn enrich_stage(
    enricher: LedgerEnricher,
    mut rx: mpsc::Receiver<ClosedLedgerEvent>,
    persist: mpsc::Sender<PersistJob>,
    max_inflight: usize,
) {
    let limit = Arc::new(Semaphore::new(max_inflight));
    let mut inflight = JoinSet::new();
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => {
                    let Ok(permit) = limit.clone().acquire_owned().await else {
                        break;
                    };
                    let enricher = enricher.clone();
                    let persist = persist.clone();
                    inflight.spawn(async move {
                        let _permit = permit;
                        let event = enricher.enrich(event).await;
                        if persist.send(PersistJob::Ledger(event)).await.is_err() {
                            tracing::warn!("persistence stage stopped; ledger event dropped");
                        }
                    });
                }
                None => break,
            },
            Some(done) = inflight.join_next(), if !inflight.is_empty() => {
                if let Err(e) = done {
                    tracing::error!(error = %e, "enrichment task panicked");
                }
            }
        }
    }
    while let Some(done) = inflight.join_next().await {
        if let Err(e) = done {
            tracing::error!(error = %e, "enrichment task panicked");
        }
    }
    tracing::debug!("enrichment stage finished");
}

async fn persist_stage(
    gate: PersistenceGate,
    mut rx: mpsc::Receiver<PersistJob>,
    stats: Arc<PipelineStats>,
) {
    while let Some(job) = rx.recv().await {
        let result = match job {
            PersistJob::Ledger(event) => gate.persist_ledger(event).await,
            PersistJob::Transaction(event) => gate.persist_transaction(event).await,
        };
        stats.record(&result);
    }
    tracing::debug!("persistence stage finished");
}
