//! ledgerstream — stream closed ledgers and account transactions from an XRP
//! Ledger node, enrich them and persist deduplicated records.
//!
//! Usage:
//! ```bash
//! # Run the service (configuration from the environment or .env)
//! WEBSOCKET_URL=wss://xrplcluster.com API_BASE_URL=https://xrplcluster.com \
//!     ledgerstream serve
//!
//! # Then, over HTTP:
//! curl localhost:3000/ledgers/stream
//! curl 'localhost:3000/accounts/stream?accounts=rA,rB'
//! curl -X DELETE localhost:3000/subscriptions/ledger_subscribe
//! ```

mod config;
mod logging;
mod routes;

use std::env;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;

use ledgerstream_core::policy::ReconnectPolicy;
use ledgerstream_core::store::RecordStore;
use ledgerstream_http::HttpRpcClient;
use ledgerstream_ingest::{
    LedgerEnricher, PersistenceGate, Pipeline, PipelineConfig, SubscriptionRegistry,
    TopicDispatcher,
};
use ledgerstream_storage::{InMemoryStorage, SqliteStorage};
use ledgerstream_ws::{PushChannel, PushChannelConfig};

use crate::config::{AppConfig, DatabaseConfig};
use crate::logging::init_tracing;
use crate::routes::{router, AppState};

const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("serve");

    let result = match command {
        "serve" => cmd_serve().await,
        "version" | "--version" | "-V" => {
            println!("ledgerstream {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("ledgerstream {}", env!("CARGO_PKG_VERSION"));
    println!("Stream, enrich and persist XRP Ledger events\n");
    println!("USAGE:");
    println!("    ledgerstream [COMMAND]\n");
    println!("COMMANDS:");
    println!("    serve      Run the ingest service (default)");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("ENVIRONMENT:");
    println!("    WEBSOCKET_URL          Push endpoint (ws:// or wss://)  [required]");
    println!("    API_BASE_URL           Request/response endpoint        [required]");
    println!("    DATABASE_URL           'memory' or a SQLite path/URL    [default: memory]");
    println!("    SERVER_PORT            HTTP port                        [default: 3000]");
    println!("    LOG_LEVEL              Global log level                 [default: info]");
    println!("    LOG_COMPONENTS         e.g. ledgerstream-ws=debug");
    println!("    LOG_JSON               Emit JSON logs                   [default: false]");
    println!("    RECONNECT_MAX_RETRIES  Give up after N failed reconnects [default: never]");
    println!("    LEDGER_RETENTION_DAYS  Ledger record retention          [default: 30]");
}

async fn cmd_serve() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.log);

    let store: Arc<dyn RecordStore> = match &config.database {
        DatabaseConfig::Memory => {
            tracing::warn!("DATABASE_URL not set to a database; records are kept in memory");
            Arc::new(InMemoryStorage::new())
        }
        DatabaseConfig::Sqlite(path) => Arc::new(
            SqliteStorage::open(path)
                .await
                .with_context(|| format!("opening database {path}"))?,
        ),
    };

    let transport = Arc::new(HttpRpcClient::default_for(&config.api_base_url)?);

    let mut reconnect = ReconnectPolicy::default();
    reconnect.max_retries = config.reconnect_max_retries;
    let push_config = PushChannelConfig {
        reconnect,
        ..Default::default()
    };

    let dispatcher = Arc::new(TopicDispatcher::new());
    let channel = Arc::new(
        PushChannel::connect(config.websocket_url.clone(), push_config, dispatcher.clone())
            .await
            .context("connecting push channel")?,
    );

    let enricher = LedgerEnricher::new(transport);
    let gate = PersistenceGate::new(store.clone());
    let pipeline = Pipeline::start(enricher.clone(), gate.clone(), PipelineConfig::default());
    let registry = Arc::new(SubscriptionRegistry::new(
        channel.clone(),
        dispatcher,
        Arc::new(pipeline.handle()),
    ));

    let sweeper = tokio::spawn(retention_sweep(store, config.retention_days));

    let state = AppState {
        registry: registry.clone(),
        channel: channel.clone(),
        enricher,
        gate,
        pipeline: pipeline.handle(),
    };

    let listener = TcpListener::bind(("0.0.0.0", config.server_port))
        .await
        .with_context(|| format!("binding port {}", config.server_port))?;
    tracing::info!(
        port = config.server_port,
        push = %config.websocket_url,
        rpc = %config.api_base_url,
        "ledgerstream listening"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down");
    registry.shutdown().await;
    sweeper.abort();
    pipeline.shutdown().await;
    if let Err(e) = channel.close().await {
        tracing::error!(error = %e, "push channel ended with error");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

/// Hourly purge of ledger records older than `days`.
async fn retention_sweep(store: Arc<dyn RecordStore>, days: i64) {
    let mut ticker = tokio::time::interval(RETENTION_SWEEP_INTERVAL);
    loop {
        ticker.tick().await;
        let cutoff = chrono::Utc::now() - chrono::Duration::days(days);
        match store.purge_expired(cutoff).await {
            Ok(0) => tracing::debug!(%cutoff, "retention sweep: nothing expired"),
            Ok(removed) => tracing::info!(removed, %cutoff, "retention sweep"),
            Err(e) => tracing::error!(error = %e, "retention sweep failed"),
        }
    }
}
