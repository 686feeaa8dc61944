//! Simulated-PoW consensus variant (C3): no real proof-of-work, just a
//! Poisson-distributed wait so single-node and integration tests get
//! block timing that looks like a live network without burning CPU.

use crate::contract::{BlockValidity, ConsensusContract};
use ledger_reactor::Clock;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Poisson};
use shared_types::{Block, BlockEntropy, Identity, ZERO_HASH};
use std::sync::Arc;

/// Cap on the Poisson-sampled wait, in milliseconds, matching the
/// original node's constant: no single wait is allowed to stall block
/// production indefinitely even with a large mean.
const WAIT_SAMPLE_CAP_MS: u64 = 30_000;

/// Cap on the Poisson-sampled block weight.
const WEIGHT_SAMPLE_CAP: u64 = 200;

/// Mean of the block-weight distribution.
const WEIGHT_SAMPLE_MEAN: f64 = 50.0;

/// Multiplier applied to the mining interval when this node produced the
/// current head, making two-in-a-row less likely and provoking more forks
/// for test coverage.
const REPEAT_MINER_BIAS: f64 = 1.05;

fn poisson_sample(rng: &mut StdRng, cap: u64, mean: f64) -> u64 {
    if mean <= 0.0 {
        return 0;
    }
    let dist = Poisson::new(mean).expect("mean must be finite and positive");
    let sample = dist.sample(rng) as u64;
    sample.min(cap)
}

/// A consensus contract with no real proof-of-work: block generation is
/// gated purely by a randomized wait off a single miner identity.
pub struct SimulatedPowConsensus {
    mining_identity: Identity,
    block_interval_ms: u64,
    clock: Arc<dyn Clock>,
    rng: StdRng,
    current: Block,
    decided_next_timestamp_ms: u64,
    forcibly_generate_next: bool,
}

impl SimulatedPowConsensus {
    /// Build a contract that mines as `mining_identity`, targeting
    /// `block_interval_ms` between blocks, using `clock` for "now".
    pub fn new(mining_identity: Identity, block_interval_ms: u64, genesis: Block, clock: Arc<dyn Clock>) -> Self {
        let mut contract = Self {
            mining_identity,
            block_interval_ms,
            clock,
            rng: StdRng::seed_from_u64(genesis.block_entropy.as_u64()),
            current: genesis.clone(),
            decided_next_timestamp_ms: u64::MAX,
            forcibly_generate_next: false,
        };
        contract.recompute_deadline();
        contract
    }

    fn disabled(&self) -> bool {
        self.block_interval_ms == 0 || self.block_interval_ms == u64::MAX
    }

    fn recompute_deadline(&mut self) {
        if self.disabled() {
            self.decided_next_timestamp_ms = u64::MAX;
            return;
        }
        let mut mean = self.block_interval_ms as f64;
        if self.current.miner_id == self.mining_identity {
            mean *= REPEAT_MINER_BIAS;
        }
        let wait_ms = poisson_sample(&mut self.rng, WAIT_SAMPLE_CAP_MS, mean);
        self.decided_next_timestamp_ms = self.current.timestamp.saturating_mul(1000).saturating_add(wait_ms);
    }
}

impl ConsensusContract for SimulatedPowConsensus {
    fn update_current_block(&mut self, current: &Block) {
        if current.hash == self.current.hash {
            return;
        }
        if current.miner_id.is_none() && current.block_number != 0 {
            tracing::warn!(block_number = current.block_number, "block has no miner identity");
        }
        self.current = current.clone();
        self.recompute_deadline();
    }

    fn valid_block(&self, _candidate: &Block) -> BlockValidity {
        // The simulated variant has no cabinet or proof to check; a block
        // is acceptable as long as it isn't loose (its parent is handled
        // upstream by the main chain before this is ever called).
        BlockValidity::Valid
    }

    fn generate_next_block(&mut self, current_time_ms: u64) -> Option<Block> {
        if !self.forcibly_generate_next && current_time_ms <= self.decided_next_timestamp_ms {
            return None;
        }
        self.forcibly_generate_next = false;

        let weight = poisson_sample(&mut self.rng, WEIGHT_SAMPLE_CAP, WEIGHT_SAMPLE_MEAN).max(1);
        let timestamp_s = self.clock.now_ms() / 1000 + 1; // rounded up to the next second

        let mut block = Block {
            hash: ZERO_HASH,
            previous_hash: self.current.hash,
            block_number: self.current.block_number + 1,
            miner_id: self.mining_identity,
            timestamp: timestamp_s,
            weight,
            total_weight: 0,
            merkle_hash: ZERO_HASH,
            log2_num_lanes: self.current.log2_num_lanes,
            slices: vec![Vec::new(); self.current.slices.len()],
            block_entropy: BlockEntropy::default(),
        };
        block.update_digest();
        Some(block)
    }

    fn set_block_interval(&mut self, interval_ms: u64) {
        self.block_interval_ms = interval_ms;
        self.recompute_deadline();
    }

    fn reset(&mut self, genesis: &Block) {
        self.current = genesis.clone();
        self.forcibly_generate_next = false;
        self.recompute_deadline();
    }

    fn trigger_block_generation(&mut self) {
        self.forcibly_generate_next = true;
    }
}
