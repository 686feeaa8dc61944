//! Shared test doubles and block-building helpers for the scenarios in
//! [`crate::coordinator_scenarios`] and [`crate::sync_scenarios`].

use ledger_coordinator::{BlockSinkInterface, StorageUnitInterface};
use shared_types::{Block, Hash, Identity, ZERO_HASH};
use std::sync::{Arc, Mutex};

/// Build a direct child of `parent` with the given producer-assigned
/// weight, as a test harness (not the block packer) would.
pub fn child_of(parent: &Block, weight: u64, miner: Identity) -> Block {
    let mut block = Block {
        hash: ZERO_HASH,
        previous_hash: parent.hash,
        block_number: parent.block_number + 1,
        miner_id: miner,
        timestamp: parent.timestamp + 1,
        weight,
        total_weight: 0,
        merkle_hash: ZERO_HASH,
        log2_num_lanes: parent.log2_num_lanes,
        slices: vec![Vec::new(); parent.slices.len()],
        block_entropy: Default::default(),
    };
    block.update_digest();
    block
}

/// A [`BlockSinkInterface`] that records every block handed to it instead
/// of discarding it, so a scenario can assert on what the coordinator
/// actually transmitted.
#[derive(Clone, Default)]
pub struct RecordingBlockSink {
    blocks: Arc<Mutex<Vec<Block>>>,
}

impl RecordingBlockSink {
    pub fn blocks(&self) -> Vec<Block> {
        self.blocks.lock().expect("sink mutex poisoned").clone()
    }
}

impl BlockSinkInterface for RecordingBlockSink {
    fn on_block(&mut self, block: Block) {
        self.blocks.lock().expect("sink mutex poisoned").push(block);
    }
}

/// A [`StorageUnitInterface`] that behaves like
/// [`ledger_coordinator::AlwaysPresentStorageUnit`] (every root is
/// perpetually current, matching the `merkle_hash == ZERO_HASH` every
/// block in this harness carries) but additionally records every
/// `commit`/`revert_to_hash` call, so a scenario can assert on how many
/// times the coordinator checkpointed or rolled back.
#[derive(Clone, Default)]
pub struct RecordingStorageUnit {
    commits: Arc<Mutex<Vec<u64>>>,
    reverts: Arc<Mutex<Vec<(Hash, u64)>>>,
}

impl RecordingStorageUnit {
    pub fn commits(&self) -> Vec<u64> {
        self.commits.lock().expect("storage mutex poisoned").clone()
    }

    pub fn reverts(&self) -> Vec<(Hash, u64)> {
        self.reverts.lock().expect("storage mutex poisoned").clone()
    }
}

impl StorageUnitInterface for RecordingStorageUnit {
    fn has_transaction(&self, _digest: &Hash) -> bool {
        true
    }

    fn current_hash(&self) -> Hash {
        ZERO_HASH
    }

    fn last_commit_hash(&self) -> Hash {
        ZERO_HASH
    }

    fn commit(&mut self, block_number: u64) -> Hash {
        self.commits.lock().expect("storage mutex poisoned").push(block_number);
        ZERO_HASH
    }

    fn hash_exists(&self, _hash: Hash, _block_number: u64) -> bool {
        true
    }

    fn revert_to_hash(&mut self, hash: Hash, block_number: u64) -> bool {
        self.reverts.lock().expect("storage mutex poisoned").push((hash, block_number));
        true
    }

    fn reset(&mut self) {
        self.commits.lock().expect("storage mutex poisoned").clear();
        self.reverts.lock().expect("storage mutex poisoned").clear();
    }
}

/// A [`StorageUnitInterface`] that reports a transaction digest as absent
/// until told otherwise, for the missing-transactions timeout scenario.
#[derive(Clone, Default)]
pub struct WithholdingStorageUnit {
    present: Arc<Mutex<bool>>,
}

impl WithholdingStorageUnit {
    pub fn release(&self) {
        *self.present.lock().expect("storage mutex poisoned") = true;
    }
}

impl StorageUnitInterface for WithholdingStorageUnit {
    fn has_transaction(&self, _digest: &Hash) -> bool {
        *self.present.lock().expect("storage mutex poisoned")
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
