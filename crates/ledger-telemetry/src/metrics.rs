//! In-process Prometheus registry. There is no scrape HTTP server here
//! (no HTTP surface at all, per scope); [`encode_metrics`] renders the
//! current registry to the Prometheus text exposition format for
//! whatever embeds this crate to serve or log.

use crate::TelemetryError;
use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use std::time::Instant;

lazy_static! {
    /// Registry every metric below is registered into.
    pub static ref REGISTRY: Registry = Registry::new();

    // ==================== block coordinator (C5) ====================

    /// Count of `BlockCoordinator` state transitions, labeled by the
    /// state being entered.
    pub static ref COORDINATOR_STATE_TRANSITIONS: CounterVec = CounterVec::new(
        Opts::new(
            "ledger_coordinator_state_transitions_total",
            "Block coordinator state transitions, labeled by destination state"
        ),
        &["state"],
    ).expect("metric options are valid");

    /// Blocks the coordinator has sent to the execution manager.
    pub static ref COORDINATOR_BLOCKS_EXECUTED: Counter = Counter::new(
        "ledger_coordinator_blocks_executed_total",
        "Blocks fully executed by the block coordinator",
    ).expect("metric options are valid");

    /// Blocks the coordinator mined and transmitted.
    pub static ref COORDINATOR_BLOCKS_MINED: Counter = Counter::new(
        "ledger_coordinator_blocks_mined_total",
        "Blocks generated and transmitted by this node's consensus contract",
    ).expect("metric options are valid");

    /// Times `WaitForTransactions` hit its timeout before all transaction
    /// bodies arrived.
    pub static ref COORDINATOR_TX_WAIT_TIMEOUTS: Counter = Counter::new(
        "ledger_coordinator_tx_wait_timeouts_total",
        "Times WaitForTransactions gave up waiting on missing transaction bodies",
    ).expect("metric options are valid");

    // ==================== main chain ingestion (C4/C6) ====================

    /// Tally of `AddBlock` outcomes, labeled by outcome kind, across both
    /// gossip ingestion and peer pulls.
    pub static ref CHAIN_ADD_BLOCK_OUTCOMES: CounterVec = CounterVec::new(
        Opts::new(
            "ledger_chain_add_block_outcomes_total",
            "AddBlock outcomes, labeled by outcome (added/loose/duplicate/invalid/dirty)"
        ),
        &["outcome"],
    ).expect("metric options are valid");

    // ==================== chain sync (C6) ====================

    /// Peer pulls that failed and triggered a back-off.
    pub static ref SYNC_PEER_FAILURES: Counter = Counter::new(
        "ledger_sync_peer_failures_total",
        "Time-travel RPC pulls that failed and incremented a peer's back-off",
    ).expect("metric options are valid");

    /// Peers abandoned after repeated failures.
    pub static ref SYNC_PEERS_ABANDONED: Counter = Counter::new(
        "ledger_sync_peers_abandoned_total",
        "Peers abandoned after exceeding the consecutive-failure threshold",
    ).expect("metric options are valid");

    /// Wall-clock time spent in a single time-travel round trip.
    pub static ref SYNC_PULL_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "ledger_sync_pull_duration_seconds",
            "Time from issuing a time-travel request to it resolving",
        )
    ).expect("metric options are valid");
}

/// Handle returned by [`register_metrics`]. Dropping it does not
/// unregister anything; it exists so callers have something to hold
/// alongside the other telemetry guards.
pub struct MetricsHandle;

/// Register every metric declared above into [`REGISTRY`].
///
/// Safe to call more than once only if the registry is fresh; the
/// embedding binary should call this exactly once at startup.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(COORDINATOR_STATE_TRANSITIONS.clone()),
        Box::new(COORDINATOR_BLOCKS_EXECUTED.clone()),
        Box::new(COORDINATOR_BLOCKS_MINED.clone()),
        Box::new(COORDINATOR_TX_WAIT_TIMEOUTS.clone()),
        Box::new(CHAIN_ADD_BLOCK_OUTCOMES.clone()),
        Box::new(SYNC_PEER_FAILURES.clone()),
        Box::new(SYNC_PEERS_ABANDONED.clone()),
        Box::new(SYNC_PULL_DURATION_SECONDS.clone()),
    ];
    for collector in collectors {
        REGISTRY
            .register(collector)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    }
    Ok(MetricsHandle)
}

/// Render the current registry to the Prometheus text exposition format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    encoder
        .encode_to_string(&families)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// RAII guard that observes elapsed seconds on a [`Histogram`] when
/// dropped. Used to time a single time-travel round trip without
/// threading a `Instant` through every return path.
pub struct HistogramTimer<'a> {
    histogram: &'a Histogram,
    start: Instant,
}

impl<'a> HistogramTimer<'a> {
    /// Start timing against `histogram`.
    pub fn start(histogram: &'a Histogram) -> Self {
        Self { histogram, start: Instant::now() }
    }
}

impl Drop for HistogramTimer<'_> {
    fn drop(&mut self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}
