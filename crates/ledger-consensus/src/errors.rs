//! Consensus error types.

use thiserror::Error;

/// Errors surfaced by the stake manager and consensus contract.
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// No stake snapshot is recorded at or before the requested block.
    #[error("no stake snapshot available at or before block {0}")]
    NoSnapshotBefore(u64),

    /// A cabinet was requested larger than the whitelist intersection could
    /// ever satisfy.
    #[error("cabinet size {requested} exceeds available stakers {available}")]
    CabinetTooSmall { requested: usize, available: usize },
}
