//! Service configuration read from the environment (and an optional `.env`).

use std::collections::HashMap;

use anyhow::{bail, Context};

use crate::logging::LogConfig;

/// Where ledger and transaction records are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseConfig {
    Memory,
    /// SQLite file path or `sqlite:` URL.
    Sqlite(String),
}

impl DatabaseConfig {
    fn parse(raw: &str) -> Self {
        match raw.trim() {
            "" | "memory" => Self::Memory,
            other => Self::Sqlite(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Push endpoint (`WEBSOCKET_URL`).
    pub websocket_url: String,
    /// Request/response endpoint (`API_BASE_URL`).
    pub api_base_url: String,
    pub database: DatabaseConfig,
    pub server_port: u16,
    pub log: LogConfig,
    /// `None` retries forever.
    pub reconnect_max_retries: Option<u32>,
    pub retention_days: i64,
}

impl AppConfig {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let required = |key: &str| -> anyhow::Result<String> {
            match get(key) {
                Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
                _ => bail!("{key} must be set"),
            }
        };

        let websocket_url = required("WEBSOCKET_URL")?;
        if !(websocket_url.starts_with("ws://") || websocket_url.starts_with("wss://")) {
            bail!("WEBSOCKET_URL must be a ws:// or wss:// URL, got {websocket_url}");
        }
        let api_base_url = required("API_BASE_URL")?;

        let server_port = match get("SERVER_PORT") {
            Some(v) => v.trim().parse().with_context(|| format!("invalid SERVER_PORT {v:?}"))?,
            None => 3000,
        };

        let reconnect_max_retries = match get("RECONNECT_MAX_RETRIES") {
            Some(v) if !v.trim().is_empty() => Some(
                v.trim()
                    .parse()
                    .with_context(|| format!("invalid RECONNECT_MAX_RETRIES {v:?}"))?,
            ),
            _ => None,
        };

        let retention_days = match get("LEDGER_RETENTION_DAYS") {
            Some(v) => v
                .trim()
                .parse()
                .with_context(|| format!("invalid LEDGER_RETENTION_DAYS {v:?}"))?,
            None => 30,
        };
        if retention_days <= 0 {
            bail!("LEDGER_RETENTION_DAYS must be positive");
        }

        let log = LogConfig {
            level: get("LOG_LEVEL").unwrap_or_else(|| "info".into()),
            components: parse_components(get("LOG_COMPONENTS").as_deref().unwrap_or("")),
            json: get("LOG_JSON").is_some_and(|v| matches!(v.trim(), "1" | "true" | "yes")),
        };

        Ok(Self {
            websocket_url,
            api_base_url,
            database: DatabaseConfig::parse(&get("DATABASE_URL").unwrap_or_default()),
            server_port,
            log,
            reconnect_max_retries,
            retention_days,
        })
    }
}

/// `"ledgerstream-ws=debug,ledgerstream-ingest=trace"` → map.
fn parse_components(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (component, level) = pair.split_once('=')?;
            let (component, level) = (component.trim(), level.trim());
            (!component.is_empty() && !level.is_empty())
                .then(|| (component.to_string(), level.to_string()))
        })
        .collect()
}
