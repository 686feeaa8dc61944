#![warn(missing_docs)]
//! Logging, tracing, in-process metrics registry, and layered node
//! configuration shared by every binary in this workspace.

mod config;
mod metrics;
mod tracing_setup;

pub use config::NodeConfig;
pub use metrics::{
    encode_metrics, register_metrics, HistogramTimer, MetricsHandle, CHAIN_ADD_BLOCK_OUTCOMES,
    COORDINATOR_BLOCKS_EXECUTED, COORDINATOR_BLOCKS_MINED, COORDINATOR_STATE_TRANSITIONS,
    COORDINATOR_TX_WAIT_TIMEOUTS, REGISTRY, SYNC_PEERS_ABANDONED, SYNC_PEER_FAILURES,
    SYNC_PULL_DURATION_SECONDS,
};
pub use tracing_setup::{init_tracing, TracingGuard};

use thiserror::Error;

/// Errors raised while standing up or tearing down telemetry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The OTLP tracer pipeline failed to initialize.
    #[error("failed to initialize tracer: {0}")]
    TracerInit(String),
    /// A Prometheus metric failed to register.
    #[error("failed to initialize metrics: {0}")]
    MetricsInit(String),
}

/// Everything [`init_telemetry`] stood up. Dropping this tears tracing
/// down in reverse order; metrics stay registered for the process
/// lifetime since there is nothing meaningful to undo there.
pub struct TelemetryGuard {
    _tracing: TracingGuard,
    _metrics: MetricsHandle,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!("telemetry shutting down");
    }
}

/// Register metrics and initialize tracing in one call, the way a
/// binary's `main` should do it.
pub async fn init_telemetry(config: &NodeConfig) -> Result<TelemetryGuard, TelemetryError> {
    let metrics = register_metrics()?;
    let tracing_guard = init_tracing(config).await?;
    Ok(TelemetryGuard { _tracing: tracing_guard, _metrics: metrics })
}
