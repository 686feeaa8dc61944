//! # Ledger Chain
//!
//! The main chain port (C4): a rooted DAG of [`Block`]s with a single
//! heaviest tip, plus the `TimeTravel` walk the chain sync service needs to
//! answer a peer. The storage engine behind a production adapter (RocksDB or
//! similar) is out of scope; this crate defines the [`MainChain`] trait and
//! the one adapter this repo actually needs to drive tests and single-node
//! operation, [`InMemoryMainChain`].

use shared_types::{Block, Hash, Travelogue, TravelogueStatus, ZERO_HASH};
use std::collections::HashMap;
use std::sync::Arc;

/// Maximum number of blocks a single `TimeTravel` reply carries.
pub const TIME_TRAVEL_CAP: usize = 256;

/// Outcome of [`MainChain::add_block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The block was appended to the chain.
    Added,
    /// The block's parent is not yet known; held pending the parent's arrival.
    Loose,
    /// A block with this hash is already stored.
    Duplicate,
    /// The block failed a structural check and was never stored.
    Invalid,
    /// A block with this hash was already held loose, with different content.
    Dirty,
}

/// The main chain contract: block storage, heaviest-tip tracking, and the
/// server side of the time-travel walk.
pub trait MainChain: Send + Sync {
    /// Insert `block`, classifying the outcome per [`AddOutcome`].
    fn add_block(&mut self, block: Block) -> AddOutcome;

    /// Look up a stored (non-loose) block by hash.
    fn get_block(&self, hash: &Hash) -> Option<Arc<Block>>;

    /// The tip of maximum `total_weight`, ties broken by lexicographically
    /// smaller hash.
    fn get_heaviest_block(&self) -> Arc<Block>;

    /// Remove a block from the chain. Used by the coordinator to drop blocks
    /// that fail validation or execution.
    fn remove_block(&mut self, hash: &Hash) -> bool;

    /// Walk the heaviest chain forward from the block immediately after
    /// `from_hash`, returning up to [`TIME_TRAVEL_CAP`] blocks oldest-first.
    fn time_travel(&self, from_hash: &Hash) -> Travelogue;

    /// Number of blocks held loose (parent unknown). The chain sync
    /// service uses this to decide whether it needs to pull from a peer.
    fn loose_count(&self) -> usize;
}

/// An in-memory [`MainChain`] adapter: a `HashMap` keyed by hash plus a side
/// table for loose blocks. Sufficient for tests and single-node operation;
/// a persistent adapter would implement the same trait against an embedded
/// key-value store.
pub struct InMemoryMainChain {
    blocks: HashMap<Hash, Arc<Block>>,
    loose: HashMap<Hash, Arc<Block>>,
    heaviest: Hash,
}

impl InMemoryMainChain {
    /// Seed the chain with `genesis`. Panics if `genesis` is not actually a
    /// genesis block (`previous_hash != ZERO_HASH`), matching the contract
    /// that every chain has exactly one root.
    pub fn new(genesis: Block) -> Self {
        assert!(genesis.is_genesis(), "chain must be seeded with a genesis block");
        let hash = genesis.hash;
        let mut blocks = HashMap::new();
        blocks.insert(hash, Arc::new(genesis));
        Self {
            blocks,
            loose: HashMap::new(),
            heaviest: hash,
        }
    }

    fn consider_heaviest(&mut self, candidate: &Arc<Block>) {
        let current = &self.blocks[&self.heaviest];
        let better = match candidate.total_weight.cmp(&current.total_weight) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Equal => candidate.hash < current.hash,
            std::cmp::Ordering::Less => false,
        };
        if better {
            self.heaviest = candidate.hash;
        }
    }

    /// After inserting a resolved block, promote any loose blocks that were
    /// waiting on it, recursively.
    fn promote_loose_children(&mut self, mut newly_resolved: Vec<Hash>) {
        while let Some(parent_hash) = newly_resolved.pop() {
            let waiting: Vec<Hash> = self
                .loose
                .iter()
                .filter(|(_, b)| b.previous_hash == parent_hash)
                .map(|(h, _)| *h)
                .collect();
            for hash in waiting {
                let block = self.loose.remove(&hash).expect("just found by key");
                let parent = self.blocks[&parent_hash].clone();
                if block.block_number != parent.block_number + 1 {
                    continue; // stays dropped; a later structurally-valid block may still arrive
                }
                let mut resolved = (*block).clone();
                resolved.total_weight = parent.total_weight + resolved.weight;
                let arc = Arc::new(resolved);
                self.consider_heaviest(&arc);
                self.blocks.insert(hash, arc);
                newly_resolved.push(hash);
            }
        }
    }
}

impl MainChain for InMemoryMainChain {
    fn add_block(&mut self, mut block: Block) -> AddOutcome {
        if self.blocks.contains_key(&block.hash) {
            return AddOutcome::Duplicate;
        }
        if !block.digest_is_valid() || block.is_genesis() {
            return AddOutcome::Invalid;
        }

        if let Some(parent) = self.blocks.get(&block.previous_hash).cloned() {
            if block.block_number != parent.block_number + 1 {
                return AddOutcome::Invalid;
            }
            block.total_weight = parent.total_weight + block.weight;
            let hash = block.hash;
            let arc = Arc::new(block);
            self.consider_heaviest(&arc);
            self.blocks.insert(hash, arc);
            self.promote_loose_children(vec![hash]);
            return AddOutcome::Added;
        }

        if let Some(existing) = self.loose.get(&block.hash) {
            return if **existing == block {
                AddOutcome::Duplicate
            } else {
                AddOutcome::Dirty
            };
        }

        tracing::debug!(hash = ?block.hash, previous_hash = ?block.previous_hash, "block held loose, parent unknown");
        self.loose.insert(block.hash, Arc::new(block));
        AddOutcome::Loose
    }

    fn get_block(&self, hash: &Hash) -> Option<Arc<Block>> {
        self.blocks.get(hash).cloned()
    }

    fn get_heaviest_block(&self) -> Arc<Block> {
        self.blocks[&self.heaviest].clone()
    }

    fn remove_block(&mut self, hash: &Hash) -> bool {
        if *hash == self.heaviest {
            // caller is expected to have already moved last_executed_block
            // away from this hash; recompute heaviest from remaining tips by
            // falling back to genesis if nothing else is known.
            self.heaviest = self
                .blocks
                .values()
                .filter(|b| b.hash != *hash)
                .max_by(|a, b| {
                    a.total_weight
                        .cmp(&b.total_weight)
                        .then_with(|| b.hash.cmp(&a.hash))
                })
                .map(|b| b.hash)
                .unwrap_or(ZERO_HASH);
        }
        self.blocks.remove(hash).is_some() | self.loose.remove(hash).is_some()
    }

    fn loose_count(&self) -> usize {
        self.loose.len()
    }

    fn time_travel(&self, from_hash: &Hash) -> Travelogue {
        let heaviest = self.get_heaviest_block();
        if !self.blocks.contains_key(from_hash) {
            return Travelogue::not_found(heaviest.hash, heaviest.block_number);
        }

        // Walk the heaviest chain from the tip back to `from_hash`, then
        // reverse to return the slice oldest-first.
        let mut path = Vec::new();
        let mut cursor = heaviest.clone();
        while cursor.hash != *from_hash {
            if cursor.is_genesis() {
                // from_hash is not on the heaviest chain at all.
                return Travelogue::not_found(heaviest.hash, heaviest.block_number);
            }
            path.push(cursor.clone());
            cursor = match self.blocks.get(&cursor.previous_hash) {
                Some(parent) => parent.clone(),
                None => return Travelogue::not_found(heaviest.hash, heaviest.block_number),
            };
        }
        path.reverse();
        path.truncate(TIME_TRAVEL_CAP);

        Travelogue {
            status: TravelogueStatus::Ok,
            blocks: path.iter().map(|b| (**b).clone()).collect(),
            heaviest_hash: heaviest.hash,
            block_number: heaviest.block_number,
        }
    }
}
