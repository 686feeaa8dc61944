//! Consensus Contract (C3): the shared interface both the stake-weighted
//! and simulated-PoW variants implement, plus the verdict type block
//! validation is expressed in.

use shared_types::{Block, Identity};
use std::collections::HashSet;

/// Verdict from [`ConsensusContract::valid_block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockValidity {
    /// The block may be accepted.
    Valid,
    /// The block must be rejected.
    Invalid,
}

/// The contract the block coordinator and chain sync service drive:
/// "is this block acceptable" and "what block should I mine next".
pub trait ConsensusContract: Send {
    /// Notify the contract that `current` is now the chain's head, so it
    /// can recompute cabinet membership and mining deadlines relative to
    /// it.
    fn update_current_block(&mut self, current: &Block);

    /// Judge whether `candidate` may be accepted onto the chain.
    fn valid_block(&self, candidate: &Block) -> BlockValidity;

    /// If this node should produce a block right now, build and return it;
    /// otherwise `None`. Does not mutate chain state; the caller is
    /// responsible for submitting the returned block.
    fn generate_next_block(&mut self, current_time_ms: u64) -> Option<Block>;

    /// Bound the cabinet size used in future snapshots. A simulated-PoW
    /// contract has no cabinet and treats this as a no-op.
    fn set_max_cabinet_size(&mut self, _size: usize) {}

    /// Target spacing between blocks, in milliseconds. `0` or `u64::MAX`
    /// disables block generation.
    fn set_block_interval(&mut self, interval_ms: u64);

    /// Length of an aeon (DKG/beacon period), in blocks. A simulated-PoW
    /// contract has no beacon and treats this as a no-op.
    fn set_aeon_period(&mut self, _period: u64) {}

    /// Restrict future cabinets to this set of identities. A simulated-PoW
    /// contract has no cabinet and treats this as a no-op.
    fn set_whitelist(&mut self, _whitelist: Option<HashSet<Identity>>) {}

    /// Reset all internal state as if freshly constructed against
    /// `genesis`.
    fn reset(&mut self, genesis: &Block);

    /// Test hook: force the next [`generate_next_block`](Self::generate_next_block)
    /// call to produce a block regardless of timing.
    fn trigger_block_generation(&mut self) {}
}
