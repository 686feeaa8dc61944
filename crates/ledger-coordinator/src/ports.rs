//! The interfaces `BlockCoordinator` drives. Each is a contract only: the
//! execution engine, synergetic (DAG) miner, block packer, block sink, and
//! peer transaction requester implementations themselves are out of scope
//! for this core.

use shared_types::{Block, Hash, ZERO_HASH};

/// Progress of an execution run started via [`ExecutionManagerInterface::execute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// No execution is in flight.
    Idle,
    /// An execution is currently running.
    Active,
    /// Execution made no progress for longer than its internal timeout.
    Stalled,
    /// Execution failed outright.
    Error,
}

/// The transaction execution engine. Scheduling is asynchronous: `execute`
/// starts a run and `status` is polled until it leaves
/// [`ExecutionStatus::Active`].
pub trait ExecutionManagerInterface: Send {
    /// Start executing the block identified by `block_hash` at
    /// `block_number`.
    fn execute(&mut self, block_hash: Hash, block_number: u64);

    /// Current status of the most recently started execution.
    fn status(&self) -> ExecutionStatus;

    /// Hash of the last block this engine finished executing.
    fn last_processed_block(&self) -> Hash;
}

/// Produces a new block template from the current chain head. Transaction
/// selection and lane packing internals are out of scope; this crate only
/// needs the contract.
pub trait BlockPackerInterface: Send {
    /// Fill `template`'s slices from the mempool, given the chain head it
    /// extends and the lane/slice geometry in effect.
    fn pack_block(&mut self, head: &Block, template: Block, log2_num_lanes: u32, num_slices: usize) -> Block;
}

/// Receives newly mined blocks for broadcast to the network. The p2p layer
/// behind it is out of scope for this core.
pub trait BlockSinkInterface: Send {
    /// Called once for every block this node mines, after it has been
    /// added to the main chain.
    fn on_block(&mut self, block: Block);
}

/// Asks peers for transactions `WAIT_FOR_TRANSACTIONS` is still missing.
/// The p2p layer behind it is out of scope for this core; a real adapter
/// would turn this into a gossip request for each digest.
pub trait TransactionRequestPort: Send {
    /// Request the given missing transaction digests, referenced by the
    /// block that needs them. Called at most once per block per short
    /// grace period, not once per poll.
    fn request_missing_transactions(&mut self, block_hash: Hash, missing: Vec<Hash>);
}

/// The content-addressed state database the coordinator checkpoints
/// execution against. The Merkle store itself is out of scope for this
/// core; this is the contract `RELOAD_STATE` and `POST_EXEC_BLOCK_VALIDATION`
/// drive.
pub trait StorageUnitInterface: Send {
    /// True if the transaction identified by `digest` is present.
    fn has_transaction(&self, digest: &Hash) -> bool;

    /// The merkle root of the store's current state.
    fn current_hash(&self) -> Hash;

    /// The merkle root as of the most recent `commit`.
    fn last_commit_hash(&self) -> Hash;

    /// Checkpoint the current state as belonging to `block_number`,
    /// returning the committed root.
    fn commit(&mut self, block_number: u64) -> Hash;

    /// True if `hash` was committed at `block_number` and has not since
    /// been pruned.
    fn hash_exists(&self, hash: Hash, block_number: u64) -> bool;

    /// Roll the store back to a previously committed root. Fails if the
    /// hash was never committed at that block number.
    fn revert_to_hash(&mut self, hash: Hash, block_number: u64) -> bool;

    /// Discard all state, as if freshly constructed.
    fn reset(&mut self);
}

/// An execution manager that completes synchronously and immediately,
/// useful for tests and for configurations with no transaction execution
/// engine wired in.
#[derive(Debug, Default)]
pub struct ImmediateExecutionManager {
    last_processed: Hash,
}

impl ExecutionManagerInterface for ImmediateExecutionManager {
    fn execute(&mut self, block_hash: Hash, _block_number: u64) {
        self.last_processed = block_hash;
    }

    fn status(&self) -> ExecutionStatus {
        ExecutionStatus::Idle
    }

    fn last_processed_block(&self) -> Hash {
        self.last_processed
    }
}

/// A block packer that leaves the template's slices untouched. Useful when
/// no mempool is wired in (single-node test configurations).
#[derive(Debug, Default)]
pub struct PassthroughBlockPacker;

impl BlockPackerInterface for PassthroughBlockPacker {
    fn pack_block(&mut self, _head: &Block, template: Block, _log2_num_lanes: u32, _num_slices: usize) -> Block {
        template
    }
}

/// A block sink that discards blocks. Useful when no p2p layer is wired
/// in.
#[derive(Debug, Default)]
pub struct NullBlockSink;

impl BlockSinkInterface for NullBlockSink {
    fn on_block(&mut self, _block: Block) {}
}

/// A transaction requester that drops every request. Useful when no p2p
/// layer is wired in (single-node operation, where a missing transaction
/// can only mean a bug, not a slow peer).
#[derive(Debug, Default)]
pub struct NullTransactionRequester;

impl TransactionRequestPort for NullTransactionRequester {
    fn request_missing_transactions(&mut self, _block_hash: Hash, _missing: Vec<Hash>) {}
}

/// A storage unit that reports every transaction as present and every
/// root as already committed. Useful when no real Merkle store is wired
/// in (single-node operation, consensus-only test fixtures); every block
/// this core produces or replays in that mode carries `merkle_hash ==
/// ZERO_HASH`, so treating [`ZERO_HASH`] as perpetually current and
/// committed keeps `POST_EXEC_BLOCK_VALIDATION`'s root comparison a
/// no-op.
#[derive(Debug, Default)]
pub struct AlwaysPresentStorageUnit;

impl StorageUnitInterface for AlwaysPresentStorageUnit {
    fn has_transaction(&self, _digest: &Hash) -> bool {
        true
    }

    fn current_hash(&self) -> Hash {
        ZERO_HASH
    }

    fn last_commit_hash(&self) -> Hash {
        ZERO_HASH
    }

    fn commit(&mut self, _block_number: u64) -> Hash {
        ZERO_HASH
    }

    fn hash_exists(&self, _hash: Hash, _block_number: u64) -> bool {
        true
    }

    fn revert_to_hash(&mut self, _hash: Hash, _block_number: u64) -> bool {
        true
    }

    fn reset(&mut self) {}
}
