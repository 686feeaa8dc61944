//! Layered node configuration: built-in defaults, overridden by environment
//! variables, overridden again by whatever the embedding binary sets
//! explicitly.

use serde::{Deserialize, Serialize};
use std::env;

/// Every timeout, interval, and size limit the core's components need,
/// plus the observability settings for this process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Service name attached to traces and logs.
    pub service_name: String,
    /// OTLP endpoint traces are exported to.
    pub otlp_endpoint: String,
    /// `tracing_subscriber::EnvFilter` directive string.
    pub log_level: String,

    /// Lane count, expressed as its log2 (matches [`shared_types::Block::num_lanes`]).
    pub log2_num_lanes: u32,
    /// Number of transaction slices per block.
    pub num_slices: usize,
    /// Maximum stake-weighted cabinet size.
    pub max_cabinet_size: usize,
    /// Target spacing between blocks, in milliseconds.
    pub block_interval_ms: u64,
    /// Length of an aeon (DKG/beacon period), in blocks.
    pub aeon_period: u64,

    /// How long `WaitForTransactions` waits before giving up on a block.
    pub wait_for_transactions_timeout_ms: u64,
    /// Idle sleep the reactor takes after a sweep makes no progress.
    pub reactor_idle_sleep_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            service_name: "ledger-node".to_string(),
            otlp_endpoint: "http://localhost:4317".to_string(),
            log_level: "info".to_string(),
            log2_num_lanes: 0,
            num_slices: 1,
            max_cabinet_size: 10,
            block_interval_ms: 10_000,
            aeon_period: 100,
            wait_for_transactions_timeout_ms: 600_000,
            reactor_idle_sleep_ms: 50,
        }
    }
}

impl NodeConfig {
    /// Start from defaults, then overlay anything set in the environment.
    ///
    /// # Environment Variables
    ///
    /// - `LEDGER_SERVICE_NAME`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `LEDGER_LOG_LEVEL` / `RUST_LOG`
    /// - `LEDGER_LOG2_NUM_LANES`, `LEDGER_NUM_SLICES`, `LEDGER_MAX_CABINET_SIZE`
    /// - `LEDGER_BLOCK_INTERVAL_MS`, `LEDGER_AEON_PERIOD`
    /// - `LEDGER_WAIT_FOR_TX_TIMEOUT_MS`, `LEDGER_REACTOR_IDLE_SLEEP_MS`
    pub fn from_env() -> Self {
        let defaults = Self::default();

        fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
            env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
        }

        Self {
            service_name: env::var("LEDGER_SERVICE_NAME").unwrap_or(defaults.service_name),
            otlp_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT").unwrap_or(defaults.otlp_endpoint),
            log_level: env::var("LEDGER_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or(defaults.log_level),
            log2_num_lanes: env_or("LEDGER_LOG2_NUM_LANES", defaults.log2_num_lanes),
            num_slices: env_or("LEDGER_NUM_SLICES", defaults.num_slices),
            max_cabinet_size: env_or("LEDGER_MAX_CABINET_SIZE", defaults.max_cabinet_size),
            block_interval_ms: env_or("LEDGER_BLOCK_INTERVAL_MS", defaults.block_interval_ms),
            aeon_period: env_or("LEDGER_AEON_PERIOD", defaults.aeon_period),
            wait_for_transactions_timeout_ms: env_or(
                "LEDGER_WAIT_FOR_TX_TIMEOUT_MS",
                defaults.wait_for_transactions_timeout_ms,
            ),
            reactor_idle_sleep_ms: env_or("LEDGER_REACTOR_IDLE_SLEEP_MS", defaults.reactor_idle_sleep_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let config = NodeConfig::default();
        assert!(config.max_cabinet_size > 0);
        assert!(config.block_interval_ms > 0);
    }
}
