//! # Integration Tests
//!
//! Workspace-level end-to-end scenarios exercising the block coordinator
//! (C5) and chain sync service (C6) together against the other crates'
//! real, non-mocked implementations: [`ledger_chain::InMemoryMainChain`],
//! [`ledger_consensus::SimulatedPowConsensus`], and [`shared_bus::GossipBus`].
//! Unit-level coverage (cabinet determinism, stake history trimming,
//! individual state transitions) lives inline in each crate; this crate
//! only covers flows that cross crate boundaries.
//!
//! Every scenario is driven by [`ledger_reactor::ManualClock`] instead of
//! the system clock so timeouts and mining deadlines resolve
//! deterministically.

#[cfg(test)]
mod coordinator_scenarios;
#[cfg(test)]
mod fixtures;
#[cfg(test)]
mod sync_scenarios;
