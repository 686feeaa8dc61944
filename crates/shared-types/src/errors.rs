//! # Error Types
//!
//! Errors raised by the storage interface and surfaced, read-only, to the
//! block coordinator and chain sync service.

use thiserror::Error;

/// Errors that can occur while talking to the content-addressed state store.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// `RevertToHash` was asked for a hash that was never committed.
    #[error("revert target was never committed: hash={hash_hex} block_number={block_number}")]
    NeverCommitted { hash_hex: String, block_number: u64 },

    /// Underlying database operation failed.
    #[error("database error: {0}")]
    Database(String),
}

/// Node operational states surfaced for introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Normal operation.
    Running,
    /// Synchronizing with the network.
    Syncing,
    /// Halted due to a fatal condition; awaiting operator intervention.
    HaltedAwaitingIntervention,
}
