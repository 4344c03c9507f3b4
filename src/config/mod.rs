//! Application configuration.
//!
//! Layered loading: `config/default.toml` (optional) under `CURREX_*`
//! environment overrides, e.g. `CURREX_STORE__URL` or
//! `CURREX_POLL__MATCH_MS`. Every field carries a default so the binary
//! starts with no configuration at all.

use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub environment: String,
    pub port: u16,
    /// Integer ledger units per 1.0 of any currency amount.
    pub amount_scale: f64,
    /// Cooldown before a panicked worker is restarted, in milliseconds.
    pub worker_cooldown_ms: u64,
    pub store: StoreConfig,
    pub ledger: LedgerConfig,
    pub poll: PollConfig,
    pub batch: BatchConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            environment: "development".to_string(),
            port: 8080,
            amount_scale: crate::models::DEFAULT_AMOUNT_SCALE,
            worker_cooldown_ms: 5_000,
            store: StoreConfig::default(),
            ledger: LedgerConfig::default(),
            poll: PollConfig::default(),
            batch: BatchConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    /// In-process store, for tests and local development.
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            backend: StoreBackend::Redis,
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Base URL of the ledger HTTP adaptor.
    pub url: String,
    /// WebSocket endpoint of the ledger event feed; empty disables the
    /// listener (results must then be injected externally).
    pub events_url: String,
    /// Deadline for a single ledger RPC.
    pub timeout_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            url: "http://127.0.0.1:7050".to_string(),
            events_url: "ws://127.0.0.1:7051/events".to_string(),
            timeout_ms: 10_000,
        }
    }
}

impl LedgerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Tick periods of the background workers, in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub lock_ms: u64,
    pub match_ms: u64,
    pub exec_ms: u64,
    pub expired_ms: u64,
    pub findexpired_ms: u64,
    pub cancel_ms: u64,
    pub event_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        PollConfig {
            lock_ms: 1_000,
            match_ms: 1_000,
            exec_ms: 1_000,
            expired_ms: 2_000,
            findexpired_ms: 5_000,
            cancel_ms: 1_000,
            event_ms: 500,
        }
    }
}

impl PollConfig {
    pub fn lock(&self) -> Duration {
        Duration::from_millis(self.lock_ms)
    }
    pub fn matching(&self) -> Duration {
        Duration::from_millis(self.match_ms)
    }
    pub fn exec(&self) -> Duration {
        Duration::from_millis(self.exec_ms)
    }
    pub fn expired(&self) -> Duration {
        Duration::from_millis(self.expired_ms)
    }
    pub fn findexpired(&self) -> Duration {
        Duration::from_millis(self.findexpired_ms)
    }
    pub fn cancel(&self) -> Duration {
        Duration::from_millis(self.cancel_ms)
    }
    pub fn event(&self) -> Duration {
        Duration::from_millis(self.event_ms)
    }
}

/// Upper bounds on how many members a worker samples per tick.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub pending: i64,
    pub matched: i64,
    pub expired: i64,
    pub cancel: i64,
    pub event: i64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            pending: 16,
            matched: 16,
            expired: 16,
            cancel: 16,
            event: 32,
        }
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(
                config::Environment::with_prefix("CURREX")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(cfg.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.amount_scale, 1_000_000.0);
        assert_eq!(cfg.store.backend, StoreBackend::Redis);
        assert_eq!(cfg.poll.event(), Duration::from_millis(500));
        assert!(cfg.batch.pending > 0);
    }
}
