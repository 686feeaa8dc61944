//! Stake-weighted consensus variant (C3): blocks must come from the miner
//! whose turn it is in the cabinet for that block's height, with a well
//! formed entropy value and respecting the configured block interval.

use crate::contract::{BlockValidity, ConsensusContract};
use crate::stake_manager::StakeManager;
use ledger_reactor::Clock;
use shared_types::{Block, BlockEntropy, Identity, ZERO_HASH};
use std::collections::HashSet;
use std::sync::Arc;

/// A consensus contract where block production rights are determined by
/// stake-weighted cabinet membership rather than computational work.
pub struct StakeConsensus {
    own_identity: Identity,
    manager: StakeManager,
    max_cabinet_size: usize,
    block_interval_ms: u64,
    whitelist: Option<HashSet<Identity>>,
    clock: Arc<dyn Clock>,
    current: Block,
    forcibly_generate_next: bool,
}

impl StakeConsensus {
    /// Build a contract mining as `own_identity`, drawing cabinets from
    /// `manager`, targeting `block_interval_ms` between blocks.
    pub fn new(
        own_identity: Identity,
        manager: StakeManager,
        max_cabinet_size: usize,
        block_interval_ms: u64,
        genesis: Block,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            own_identity,
            manager,
            max_cabinet_size,
            block_interval_ms,
            whitelist: None,
            clock,
            current: genesis,
            forcibly_generate_next: false,
        }
    }

    fn disabled(&self) -> bool {
        self.block_interval_ms == 0 || self.block_interval_ms == u64::MAX
    }

    fn cabinet_for(&self, block_number: u64, entropy: u64) -> Vec<Identity> {
        self.manager
            .build_cabinet(block_number, entropy, self.max_cabinet_size)
            .unwrap_or_default()
            .into_iter()
            .filter(|id| self.whitelist.as_ref().map_or(true, |w| w.contains(id)))
            .collect()
    }

    fn entropy_is_well_formed(entropy: &BlockEntropy, block_number: u64) -> bool {
        block_number == 0 || entropy.seed != ZERO_HASH
    }

    fn interval_is_respected(&self, candidate: &Block) -> bool {
        if self.disabled() || candidate.block_number == 0 {
            return true;
        }
        let min_gap_s = self.block_interval_ms / 1000;
        candidate.timestamp >= self.current.timestamp + min_gap_s
    }
}

impl ConsensusContract for StakeConsensus {
    fn update_current_block(&mut self, current: &Block) {
        if current.hash == self.current.hash {
            return;
        }
        self.current = current.clone();
        self.manager.update_current_block(current.block_number);
    }

    fn valid_block(&self, candidate: &Block) -> BlockValidity {
        if !Self::entropy_is_well_formed(&candidate.block_entropy, candidate.block_number) {
            return BlockValidity::Invalid;
        }
        if !self.interval_is_respected(candidate) {
            return BlockValidity::Invalid;
        }
        if candidate.block_number == 0 {
            return BlockValidity::Valid;
        }
        let cabinet = self.cabinet_for(candidate.block_number, candidate.block_entropy.as_u64());
        if cabinet.contains(&candidate.miner_id) {
            BlockValidity::Valid
        } else {
            BlockValidity::Invalid
        }
    }

    fn generate_next_block(&mut self, current_time_ms: u64) -> Option<Block> {
        if self.disabled() {
            return None;
        }
        let next_number = self.current.block_number + 1;
        let min_gap_s = self.block_interval_ms / 1000;
        let deadline_ms = (self.current.timestamp + min_gap_s) * 1000;
        if !self.forcibly_generate_next && current_time_ms < deadline_ms {
            return None;
        }
        self.forcibly_generate_next = false;

        let entropy = self.current.block_entropy.as_u64();
        let cabinet = self.cabinet_for(next_number, entropy);
        if !cabinet.contains(&self.own_identity) {
            return None;
        }

        let timestamp_s = self.clock.now_ms() / 1000 + 1;
        let mut block = Block {
            hash: ZERO_HASH,
            previous_hash: self.current.hash,
            block_number: next_number,
            miner_id: self.own_identity,
            timestamp: timestamp_s,
            weight: 1,
            total_weight: 0,
            merkle_hash: ZERO_HASH,
            log2_num_lanes: self.current.log2_num_lanes,
            slices: vec![Vec::new(); self.current.slices.len()],
            block_entropy: self.current.block_entropy.clone(),
        };
        block.update_digest();
        Some(block)
    }

    fn set_max_cabinet_size(&mut self, size: usize) {
        self.max_cabinet_size = size;
    }

    fn set_block_interval(&mut self, interval_ms: u64) {
        self.block_interval_ms = interval_ms;
    }

    fn set_whitelist(&mut self, whitelist: Option<HashSet<Identity>>) {
        self.whitelist = whitelist;
    }

    fn reset(&mut self, genesis: &Block) {
        self.current = genesis.clone();
        self.forcibly_generate_next = false;
    }

    fn trigger_block_generation(&mut self) {
        self.forcibly_generate_next = true;
    }
}
