//! # Core Domain Entities
//!
//! The data model shared by the chain, the consensus contracts, the block
//! coordinator and the chain sync service: blocks, transaction layouts, the
//! stake snapshot record, and the wire-level travelogue reply.
//!
//! ## Clusters
//!
//! - **Chain**: [`Block`], [`BlockEntropy`], [`TransactionLayout`]
//! - **Consensus**: [`Identity`], [`StakeRecord`]
//! - **Sync wire format**: [`Travelogue`], [`TravelogueStatus`]

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::fmt;

/// A 32-byte content hash (SHA3-256 over a block's canonical byte encoding).
pub type Hash = [u8; 32];

/// The all-zero hash used as the `previous_hash` of the genesis block.
pub const ZERO_HASH: Hash = [0u8; 32];

/// A validator/miner identity. Wraps a public key; equality and ordering are
/// over the raw bytes so cabinet selection is reproducible across nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identity(pub [u8; 32]);

impl Identity {
    /// The identity used by genesis / unminted blocks.
    pub const NONE: Identity = Identity([0u8; 32]);

    /// Build an identity from raw bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// True if this is the placeholder "no identity" value.
    pub fn is_none(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// DKG / beacon output attached to a block, used as the randomness source for
/// cabinet selection. `qualified` records the cabinet that produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEntropy {
    /// Raw entropy bytes contributed by the beacon/DKG round.
    pub seed: Hash,
    /// Identities that were qualified to contribute to this round.
    pub qualified: Vec<Identity>,
}

impl BlockEntropy {
    /// Reduce the entropy to a single `u64` for use as a PRNG seed, matching
    /// the original node's `EntropyAsU64`.
    pub fn as_u64(&self) -> u64 {
        u64::from_le_bytes(self.seed[0..8].try_into().unwrap())
    }
}

/// A summary of a transaction sufficient to schedule its execution. The
/// payload itself is held by the storage lanes, not by the block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionLayout {
    /// Digest of the full transaction.
    pub digest: Hash,
    /// Bitmask of the lanes this transaction touches.
    pub lane_mask: u64,
    /// Opaque resource identifiers the transaction reads or writes.
    pub resources: Vec<Hash>,
    /// Block number after which the transaction is no longer valid.
    pub valid_until: u64,
    /// Fee offered, in base units.
    pub fee: u64,
}

/// An ordered list of transaction layouts; the unit of parallel scheduling
/// within a block.
pub type Slice = Vec<TransactionLayout>;

/// A block of the replicated ledger.
///
/// `hash` is a content hash over every other field and is recomputed by
/// [`Block::update_digest`] whenever the block is mutated; it is never itself
/// fed into the digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Content hash of this block. Not part of its own digest input.
    pub hash: Hash,
    /// Hash of the parent block, or [`ZERO_HASH`] for genesis.
    pub previous_hash: Hash,
    /// Height of this block; zero for genesis, `parent.block_number + 1` otherwise.
    pub block_number: u64,
    /// Identity of the block's producer.
    pub miner_id: Identity,
    /// Unix timestamp (seconds) at which the block was produced.
    pub timestamp: u64,
    /// Producer-assigned, consensus-validated contribution to cumulative weight.
    pub weight: u64,
    /// Sum of `weight` along the chain back to genesis. Derived, not producer-set.
    pub total_weight: u64,
    /// Root of the state trie after executing this block.
    pub merkle_hash: Hash,
    /// `log2` of the number of lanes; must match the node's configuration.
    pub log2_num_lanes: u32,
    /// Ordered list of transaction slices.
    pub slices: Vec<Slice>,
    /// Randomness/beacon output attached to this block.
    pub block_entropy: BlockEntropy,
}

impl Block {
    /// Construct the genesis block for a given lane configuration.
    pub fn genesis(log2_num_lanes: u32, num_slices: usize) -> Self {
        let mut block = Self {
            hash: ZERO_HASH,
            previous_hash: ZERO_HASH,
            block_number: 0,
            miner_id: Identity::NONE,
            timestamp: 0,
            weight: 0,
            total_weight: 0,
            merkle_hash: ZERO_HASH,
            log2_num_lanes,
            slices: vec![Vec::new(); num_slices],
            block_entropy: BlockEntropy::default(),
        };
        block.update_digest();
        block
    }

    /// True for the chain's single root block.
    pub fn is_genesis(&self) -> bool {
        self.previous_hash == ZERO_HASH
    }

    /// Number of lanes implied by `log2_num_lanes`.
    pub fn num_lanes(&self) -> u64 {
        1u64 << self.log2_num_lanes
    }

    /// Total number of transaction layouts across all slices.
    pub fn transaction_count(&self) -> usize {
        self.slices.iter().map(|slice| slice.len()).sum()
    }

    /// Iterate over the digests of every transaction referenced by this block.
    pub fn transaction_digests(&self) -> impl Iterator<Item = Hash> + '_ {
        self.slices
            .iter()
            .flat_map(|slice| slice.iter().map(|tx| tx.digest))
    }

    /// Recompute `hash` from every other field. Must be called after any
    /// mutation and before the block is inserted into the chain or compared.
    pub fn update_digest(&mut self) {
        self.hash = self.compute_digest();
    }

    /// Compute the content digest without mutating the block.
    pub fn compute_digest(&self) -> Hash {
        let mut hasher = Sha3_256::new();
        hasher.update(self.previous_hash);
        hasher.update(self.block_number.to_le_bytes());
        hasher.update(self.miner_id.0);
        hasher.update(self.timestamp.to_le_bytes());
        hasher.update(self.weight.to_le_bytes());
        hasher.update(self.merkle_hash);
        hasher.update(self.log2_num_lanes.to_le_bytes());
        for slice in &self.slices {
            hasher.update((slice.len() as u64).to_le_bytes());
            for tx in slice {
                hasher.update(tx.digest);
                hasher.update(tx.lane_mask.to_le_bytes());
                hasher.update(tx.fee.to_le_bytes());
            }
        }
        hasher.update(self.block_entropy.seed);
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        out
    }

    /// True if the stored `hash` matches a freshly computed digest.
    pub fn digest_is_valid(&self) -> bool {
        self.hash == self.compute_digest()
    }
}

/// Per-identity stake weight as recorded in a [`crate::StakeSnapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeRecord {
    /// The staking identity.
    pub identity: Identity,
    /// Stake amount; always greater than zero for a live record.
    pub stake: u64,
}

/// Outcome of the time-travel RPC: the server's chain status relative
/// to a reference hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TravelogueStatus {
    /// The reference hash is known and `blocks` follows it.
    Ok,
    /// The reference hash is unknown to the server.
    NotFound,
}

/// Reply record of the time-travel RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Travelogue {
    /// Whether the reference hash was recognised.
    pub status: TravelogueStatus,
    /// Blocks immediately following the reference hash, oldest first.
    pub blocks: Vec<Block>,
    /// The server's current heaviest tip.
    pub heaviest_hash: Hash,
    /// Block number of `heaviest_hash`.
    pub block_number: u64,
}

impl Travelogue {
    /// Build a `NOT_FOUND` reply for a server that does not recognise the
    /// requested reference hash.
    pub fn not_found(heaviest_hash: Hash, block_number: u64) -> Self {
        Self {
            status: TravelogueStatus::NotFound,
            blocks: Vec::new(),
            heaviest_hash,
            block_number,
        }
    }
}
