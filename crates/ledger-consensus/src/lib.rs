//! # Ledger Consensus
//!
//! The stake snapshot (C1), stake manager (C2), and the two consensus
//! contract variants (C3) this core ships: a stake-weighted contract for
//! production-shaped configurations and a simulated-PoW contract for
//! single-node operation and integration tests where liveness matters more
//! than a real cabinet.

#![warn(missing_docs)]

mod contract;
mod errors;
mod simulated_pow;
mod stake_consensus;
mod stake_manager;
mod stake_snapshot;

pub use contract::{BlockValidity, ConsensusContract};
pub use errors::ConsensusError;
pub use simulated_pow::SimulatedPowConsensus;
pub use stake_consensus::StakeConsensus;
pub use stake_manager::{PendingUpdate, StakeManager, StakeUpdateQueue, HISTORY_LENGTH};
pub use stake_snapshot::StakeSnapshot;
