//! The block coordinator (C5) itself: a 15-state machine that replays
//! blocks onto the execution engine to catch up with the chain head, and
//! mines new ones once caught up.

use crate::ports::{
    BlockPackerInterface, BlockSinkInterface, ExecutionManagerInterface, ExecutionStatus, StorageUnitInterface,
    TransactionRequestPort,
};
use ledger_chain::MainChain;
use ledger_consensus::{BlockValidity, ConsensusContract};
use ledger_reactor::{Clock, Runnable};
use ledger_telemetry::{
    COORDINATOR_BLOCKS_EXECUTED, COORDINATOR_BLOCKS_MINED, COORDINATOR_STATE_TRANSITIONS, COORDINATOR_TX_WAIT_TIMEOUTS,
};
use shared_types::{Block, Hash, ZERO_HASH};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

/// Longest ancestor walk the coordinator will perform, in either direction,
/// before giving up on finding a common ancestor between the chain head and
/// `last_executed_block`.
pub const COMMON_PATH_TO_ANCESTOR_LENGTH_LIMIT: usize = 5000;

/// How long `WaitForTransactions` will wait for a block's transactions to
/// land in storage before abandoning the block and resynchronising. The
/// default for [`BlockCoordinatorConfig::wait_for_transactions_timeout_ms`].
pub const WAIT_FOR_TRANSACTIONS_TIMEOUT_MS: u64 = 600_000;

/// Short grace period before `WaitForTransactions` asks peers for whatever
/// digests are still missing. Much shorter than the hard deadline: most
/// stalls are a transaction still in flight from gossip, not an actually
/// missing one.
const WAIT_FOR_TRANSACTIONS_SHORT_GRACE_MS: u64 = 5_000;

/// The fifteen coordinator states, grouped as the original design does:
/// the main loop, the "catch up on inbound blocks" pipe, and the "mine a
/// new block" pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Recover `last_executed_block` from the chain at startup.
    ReloadState,
    /// Walk from the chain head back to `last_executed_block`.
    Synchronising,
    /// Caught up; idle until the chain head moves or it's our turn to mine.
    Synchronised,

    /// Pipe 1 (catching up on inbound blocks)
    PreExecBlockValidation,
    SynergeticExecution,
    WaitForTransactions,
    ScheduleBlockExecution,
    WaitForExecution,
    PostExecBlockValidation,

    /// Pipe 2 (mining a new block)
    PackNewBlock,
    NewSynergeticExecution,
    ExecuteNewBlock,
    WaitForNewBlockExecution,
    TransmitBlock,

    /// Main loop: cycle complete, return to `Synchronising`.
    Reset,
}

/// Drives block execution and production against a shared [`MainChain`].
pub struct BlockCoordinator {
    chain: Arc<Mutex<dyn MainChain>>,
    consensus: Box<dyn ConsensusContract>,
    execution_manager: Box<dyn ExecutionManagerInterface>,
    block_packer: Box<dyn BlockPackerInterface>,
    block_sink: Box<dyn BlockSinkInterface>,
    storage_unit: Box<dyn StorageUnitInterface>,
    transaction_requester: Box<dyn TransactionRequestPort>,
    clock: Arc<dyn Clock>,

    log2_num_lanes: u32,
    num_slices: usize,
    wait_for_transactions_timeout_ms: u64,

    state: CoordinatorState,
    last_executed_block: Hash,
    blocks_to_common_ancestor: VecDeque<Arc<Block>>,
    next_block: Option<Block>,
    wait_for_tx_deadline_ms: Option<u64>,
    have_asked_for_missing_txs: bool,
}

/// Everything the coordinator needs constructed around it.
pub struct BlockCoordinatorConfig {
    pub chain: Arc<Mutex<dyn MainChain>>,
    pub consensus: Box<dyn ConsensusContract>,
    pub execution_manager: Box<dyn ExecutionManagerInterface>,
    pub block_packer: Box<dyn BlockPackerInterface>,
    pub block_sink: Box<dyn BlockSinkInterface>,
    pub storage_unit: Box<dyn StorageUnitInterface>,
    pub clock: Arc<dyn Clock>,
    pub log2_num_lanes: u32,
    pub num_slices: usize,
    pub wait_for_transactions_timeout_ms: u64,
}

impl BlockCoordinator {
    /// Build a coordinator in [`CoordinatorState::ReloadState`].
    pub fn new(config: BlockCoordinatorConfig) -> Self {
        Self {
            chain: config.chain,
            consensus: config.consensus,
            execution_manager: config.execution_manager,
            block_packer: config.block_packer,
            block_sink: config.block_sink,
            storage_unit: config.storage_unit,
            transaction_requester: Box::new(crate::ports::NullTransactionRequester),
            clock: config.clock,
            log2_num_lanes: config.log2_num_lanes,
            num_slices: config.num_slices,
            wait_for_transactions_timeout_ms: config.wait_for_transactions_timeout_ms,
            state: CoordinatorState::ReloadState,
            last_executed_block: ZERO_HASH,
            blocks_to_common_ancestor: VecDeque::new(),
            next_block: None,
            wait_for_tx_deadline_ms: None,
            have_asked_for_missing_txs: false,
        }
    }

    /// Swap in a real peer transaction requester, replacing the default
    /// no-op. Kept separate from [`BlockCoordinatorConfig`] so existing
    /// single-node callers don't need to wire one up.
    pub fn with_transaction_requester(mut self, requester: Box<dyn TransactionRequestPort>) -> Self {
        self.transaction_requester = requester;
        self
    }

    /// Current state, for tests and diagnostics.
    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    /// Hash of the block this coordinator has most recently finished
    /// executing.
    pub fn last_executed_block(&self) -> Hash {
        self.last_executed_block
    }

    /// True once the coordinator is idle in [`CoordinatorState::Synchronised`]
    /// with `last_executed_block` matching the chain's current tip.
    pub fn is_synced(&self) -> bool {
        self.state == CoordinatorState::Synchronised
            && self.last_executed_block == self.chain.lock().expect("chain mutex poisoned").get_heaviest_block().hash
    }

    /// Drop all in-flight replay/mining state and restart from
    /// `Synchronising`, keeping `last_executed_block` as-is.
    pub fn reset(&mut self) {
        self.blocks_to_common_ancestor.clear();
        self.next_block = None;
        self.wait_for_tx_deadline_ms = None;
        self.have_asked_for_missing_txs = false;
        self.state = CoordinatorState::Synchronising;
    }

    /// Drop everything and treat `genesis` as though freshly started.
    pub fn reset_to_genesis(&mut self, genesis: &Block) {
        self.blocks_to_common_ancestor.clear();
        self.next_block = None;
        self.wait_for_tx_deadline_ms = None;
        self.have_asked_for_missing_txs = false;
        self.last_executed_block = genesis.hash;
        self.consensus.reset(genesis);
        self.state = CoordinatorState::Synchronising;
    }

    /// Walk back from the chain head until a block whose state the store
    /// actually has is found, and pin the store there. Runs once at
    /// startup; a node whose store has nothing within the search limit
    /// cannot safely resume and must refuse to start.
    fn on_reload_state(&mut self) -> CoordinatorState {
        let chain = self.chain.lock().expect("chain mutex poisoned");
        let heaviest = chain.get_heaviest_block();
        let mut cursor = heaviest.clone();
        let mut steps = 0usize;
        let ancestor = loop {
            if self.storage_unit.hash_exists(cursor.merkle_hash, cursor.block_number) {
                break cursor;
            }
            if cursor.is_genesis() || steps >= COMMON_PATH_TO_ANCESTOR_LENGTH_LIMIT {
                panic!(
                    "no committed ancestor found within {COMMON_PATH_TO_ANCESTOR_LENGTH_LIMIT} blocks \
                     of heaviest block {:?}; refusing to start",
                    heaviest.hash
                );
            }
            cursor = chain.get_block(&cursor.previous_hash).unwrap_or_else(|| {
                panic!("chain missing block {:?} while reloading state", cursor.previous_hash)
            });
            steps += 1;
        };
        drop(chain);
        self.storage_unit.revert_to_hash(ancestor.merkle_hash, ancestor.block_number);
        self.last_executed_block = ancestor.hash;
        self.consensus.update_current_block(&ancestor);
        CoordinatorState::Synchronising
    }

    fn on_synchronising(&mut self) -> CoordinatorState {
        let chain = self.chain.lock().expect("chain mutex poisoned");
        let heaviest = chain.get_heaviest_block();
        if heaviest.hash == self.last_executed_block {
            drop(chain);
            return CoordinatorState::Synchronised;
        }

        let mut path = Vec::new();
        let mut cursor = heaviest.clone();
        let mut steps = 0usize;
        let found = loop {
            if cursor.hash == self.last_executed_block {
                break true;
            }
            if cursor.is_genesis() || steps >= COMMON_PATH_TO_ANCESTOR_LENGTH_LIMIT {
                break false;
            }
            path.push(cursor.clone());
            cursor = match chain.get_block(&cursor.previous_hash) {
                Some(parent) => parent,
                None => break false,
            };
            steps += 1;
        };
        drop(chain);

        if !found {
            let Some(ancestor) = self.find_common_ancestor(&heaviest) else {
                tracing::warn!(
                    heaviest = ?heaviest.hash,
                    last_executed = ?self.last_executed_block,
                    "no common ancestor within search limit, adopting head without replay"
                );
                self.last_executed_block = heaviest.hash;
                self.consensus.update_current_block(&heaviest);
                return CoordinatorState::Synchronised;
            };
            tracing::warn!(
                heaviest = ?heaviest.hash,
                last_executed = ?self.last_executed_block,
                ancestor = ?ancestor.hash,
                "last executed block is not an ancestor of the heaviest chain, rewinding to common ancestor"
            );
            self.last_executed_block = ancestor.hash;
            self.revert_to_last_executed();
            self.consensus.update_current_block(&ancestor);
            return CoordinatorState::Synchronising;
        }

        path.reverse();
        self.blocks_to_common_ancestor = path.into();
        if self.blocks_to_common_ancestor.is_empty() {
            return CoordinatorState::Synchronised;
        }
        CoordinatorState::PreExecBlockValidation
    }

    /// Walk `last_executed_block`'s ancestry and `heaviest`'s ancestry back
    /// toward genesis, each capped at [`COMMON_PATH_TO_ANCESTOR_LENGTH_LIMIT`],
    /// and return the first block common to both. `None` if the two chains
    /// share no ancestor within the search limit (most likely a different
    /// genesis entirely).
    fn find_common_ancestor(&self, heaviest: &Block) -> Option<Block> {
        let chain = self.chain.lock().expect("chain mutex poisoned");

        let mut local_path = HashSet::new();
        let mut cursor = chain.get_block(&self.last_executed_block)?;
        local_path.insert(cursor.hash);
        let mut steps = 0usize;
        while !cursor.is_genesis() && steps < COMMON_PATH_TO_ANCESTOR_LENGTH_LIMIT {
            cursor = chain.get_block(&cursor.previous_hash)?;
            local_path.insert(cursor.hash);
            steps += 1;
        }

        let mut cursor = heaviest.clone();
        let mut steps = 0usize;
        loop {
            if local_path.contains(&cursor.hash) {
                return Some(cursor);
            }
            if cursor.is_genesis() || steps >= COMMON_PATH_TO_ANCESTOR_LENGTH_LIMIT {
                return None;
            }
            cursor = (*chain.get_block(&cursor.previous_hash)?).clone();
            steps += 1;
        }
    }

    fn on_pre_exec_block_validation(&mut self) -> CoordinatorState {
        let Some(block) = self.blocks_to_common_ancestor.front().cloned() else {
            return CoordinatorState::Synchronising;
        };
        let geometry_ok = block.log2_num_lanes == self.log2_num_lanes && block.slices.len() == self.num_slices;
        let sequence_ok = block.is_genesis() || {
            let chain = self.chain.lock().expect("chain mutex poisoned");
            chain
                .get_block(&block.previous_hash)
                .is_some_and(|parent| block.block_number == parent.block_number + 1)
        };
        let consensus_ok = geometry_ok && sequence_ok && self.consensus.valid_block(&block) == BlockValidity::Valid;
        if consensus_ok {
            return CoordinatorState::SynergeticExecution;
        }

        tracing::warn!(
            hash = ?block.hash,
            geometry_ok,
            sequence_ok,
            "inbound block failed pre-execution validation"
        );
        let mut chain = self.chain.lock().expect("chain mutex poisoned");
        chain.remove_block(&block.hash);
        let parent_merkle = chain.get_block(&block.previous_hash).map(|b| b.merkle_hash).unwrap_or(ZERO_HASH);
        drop(chain);
        self.storage_unit
            .revert_to_hash(parent_merkle, block.block_number.saturating_sub(1));
        self.blocks_to_common_ancestor.clear();
        CoordinatorState::Reset
    }

    fn on_synergetic_execution(&mut self) -> CoordinatorState {
        // Synergetic (DAG) contract execution is a trait-contract boundary
        // this core does not implement; nothing to schedule here.
        CoordinatorState::WaitForTransactions
    }

    fn on_wait_for_transactions(&mut self) -> CoordinatorState {
        let Some(block) = self.blocks_to_common_ancestor.front().cloned() else {
            return CoordinatorState::Synchronising;
        };
        let missing: Vec<Hash> = block
            .transaction_digests()
            .filter(|digest| !self.storage_unit.has_transaction(digest))
            .collect();
        if missing.is_empty() {
            self.wait_for_tx_deadline_ms = None;
            self.have_asked_for_missing_txs = false;
            return CoordinatorState::ScheduleBlockExecution;
        }

        let now = self.clock.now_ms();
        let deadline = *self
            .wait_for_tx_deadline_ms
            .get_or_insert(now + self.wait_for_transactions_timeout_ms);
        let started_waiting_at = deadline.saturating_sub(self.wait_for_transactions_timeout_ms);

        if !self.have_asked_for_missing_txs
            && now.saturating_sub(started_waiting_at) >= WAIT_FOR_TRANSACTIONS_SHORT_GRACE_MS
        {
            self.transaction_requester.request_missing_transactions(block.hash, missing);
            self.have_asked_for_missing_txs = true;
        }

        if now >= deadline {
            tracing::warn!(hash = ?block.hash, "gave up waiting for transactions, resynchronising");
            self.wait_for_tx_deadline_ms = None;
            self.have_asked_for_missing_txs = false;
            self.chain.lock().expect("chain mutex poisoned").remove_block(&block.hash);
            self.blocks_to_common_ancestor.clear();
            COORDINATOR_TX_WAIT_TIMEOUTS.inc();
            return CoordinatorState::Reset;
        }
        CoordinatorState::WaitForTransactions
    }

    fn on_schedule_block_execution(&mut self) -> CoordinatorState {
        let Some(block) = self.blocks_to_common_ancestor.front().cloned() else {
            return CoordinatorState::Synchronising;
        };
        self.execution_manager.execute(block.hash, block.block_number);
        CoordinatorState::WaitForExecution
    }

    fn on_wait_for_execution(&mut self) -> CoordinatorState {
        match self.execution_manager.status() {
            ExecutionStatus::Active => CoordinatorState::WaitForExecution,
            ExecutionStatus::Idle => CoordinatorState::PostExecBlockValidation,
            ExecutionStatus::Stalled | ExecutionStatus::Error => {
                tracing::error!("block execution did not complete cleanly, resynchronising");
                self.revert_to_last_executed();
                self.blocks_to_common_ancestor.clear();
                CoordinatorState::Synchronising
            }
        }
    }

    /// Roll the store back to whatever root `last_executed_block` committed,
    /// looking that root up from the chain. Used by the execution-error and
    /// state-mismatch recovery paths.
    fn revert_to_last_executed(&mut self) {
        let last = self
            .chain
            .lock()
            .expect("chain mutex poisoned")
            .get_block(&self.last_executed_block);
        let (merkle, number) = last.map(|b| (b.merkle_hash, b.block_number)).unwrap_or((ZERO_HASH, 0));
        self.storage_unit.revert_to_hash(merkle, number);
    }

    fn on_post_exec_block_validation(&mut self) -> CoordinatorState {
        let Some(block) = self.blocks_to_common_ancestor.front().cloned() else {
            return CoordinatorState::Synchronising;
        };

        if self.storage_unit.current_hash() != block.merkle_hash {
            tracing::error!(hash = ?block.hash, "post-execution state mismatch, reverting");
            self.chain.lock().expect("chain mutex poisoned").remove_block(&block.hash);
            self.revert_to_last_executed();
            self.blocks_to_common_ancestor.clear();
            return CoordinatorState::Reset;
        }

        self.storage_unit.commit(block.block_number);
        self.blocks_to_common_ancestor.pop_front();
        self.last_executed_block = block.hash;
        self.consensus.update_current_block(&block);
        COORDINATOR_BLOCKS_EXECUTED.inc();
        if self.blocks_to_common_ancestor.is_empty() {
            CoordinatorState::Synchronised
        } else {
            CoordinatorState::PreExecBlockValidation
        }
    }

    fn on_synchronised(&mut self) -> CoordinatorState {
        let heaviest = self.chain.lock().expect("chain mutex poisoned").get_heaviest_block();
        if heaviest.hash != self.last_executed_block {
            return CoordinatorState::Synchronising;
        }
        match self.consensus.generate_next_block(self.clock.now_ms()) {
            Some(block) => {
                self.next_block = Some(block);
                CoordinatorState::PackNewBlock
            }
            None => CoordinatorState::Synchronised,
        }
    }

    fn on_pack_new_block(&mut self) -> CoordinatorState {
        let Some(template) = self.next_block.take() else {
            return CoordinatorState::Synchronised;
        };
        let heaviest = self.chain.lock().expect("chain mutex poisoned").get_heaviest_block();
        let packed = self
            .block_packer
            .pack_block(&heaviest, template, self.log2_num_lanes, self.num_slices);
        self.next_block = Some(packed);
        CoordinatorState::NewSynergeticExecution
    }

    fn on_new_synergetic_execution(&mut self) -> CoordinatorState {
        CoordinatorState::ExecuteNewBlock
    }

    fn on_execute_new_block(&mut self) -> CoordinatorState {
        let Some(block) = &self.next_block else {
            return CoordinatorState::Synchronised;
        };
        self.execution_manager.execute(block.hash, block.block_number);
        CoordinatorState::WaitForNewBlockExecution
    }

    fn on_wait_for_new_block_execution(&mut self) -> CoordinatorState {
        match self.execution_manager.status() {
            ExecutionStatus::Active => CoordinatorState::WaitForNewBlockExecution,
            ExecutionStatus::Idle => CoordinatorState::TransmitBlock,
            ExecutionStatus::Stalled | ExecutionStatus::Error => {
                tracing::error!("failed to execute our own mined block, discarding it");
                self.next_block = None;
                CoordinatorState::Reset
            }
        }
    }

    fn on_transmit_block(&mut self) -> CoordinatorState {
        let Some(mut block) = self.next_block.take() else {
            return CoordinatorState::Reset;
        };
        block.update_digest();
        self.chain.lock().expect("chain mutex poisoned").add_block(block.clone());
        self.storage_unit.commit(block.block_number);
        self.last_executed_block = block.hash;
        self.consensus.update_current_block(&block);
        self.block_sink.on_block(block);
        COORDINATOR_BLOCKS_MINED.inc();
        CoordinatorState::Reset
    }

    fn on_reset(&mut self) -> CoordinatorState {
        self.blocks_to_common_ancestor.clear();
        self.next_block = None;
        self.wait_for_tx_deadline_ms = None;
        self.have_asked_for_missing_txs = false;
        CoordinatorState::Synchronising
    }

    fn state_label(state: CoordinatorState) -> &'static str {
        match state {
            CoordinatorState::ReloadState => "reload_state",
            CoordinatorState::Synchronising => "synchronising",
            CoordinatorState::Synchronised => "synchronised",
            CoordinatorState::PreExecBlockValidation => "pre_exec_block_validation",
            CoordinatorState::SynergeticExecution => "synergetic_execution",
            CoordinatorState::WaitForTransactions => "wait_for_transactions",
            CoordinatorState::ScheduleBlockExecution => "schedule_block_execution",
            CoordinatorState::WaitForExecution => "wait_for_execution",
            CoordinatorState::PostExecBlockValidation => "post_exec_block_validation",
            CoordinatorState::PackNewBlock => "pack_new_block",
            CoordinatorState::NewSynergeticExecution => "new_synergetic_execution",
            CoordinatorState::ExecuteNewBlock => "execute_new_block",
            CoordinatorState::WaitForNewBlockExecution => "wait_for_new_block_execution",
            CoordinatorState::TransmitBlock => "transmit_block",
            CoordinatorState::Reset => "reset",
        }
    }

    fn step(&mut self) -> CoordinatorState {
        match self.state {
            CoordinatorState::ReloadState => self.on_reload_state(),
            CoordinatorState::Synchronising => self.on_synchronising(),
            CoordinatorState::Synchronised => self.on_synchronised(),
            CoordinatorState::PreExecBlockValidation => self.on_pre_exec_block_validation(),
            CoordinatorState::SynergeticExecution => self.on_synergetic_execution(),
            CoordinatorState::WaitForTransactions => self.on_wait_for_transactions(),
            CoordinatorState::ScheduleBlockExecution => self.on_schedule_block_execution(),
            CoordinatorState::WaitForExecution => self.on_wait_for_execution(),
            CoordinatorState::PostExecBlockValidation => self.on_post_exec_block_validation(),
            CoordinatorState::PackNewBlock => self.on_pack_new_block(),
            CoordinatorState::NewSynergeticExecution => self.on_new_synergetic_execution(),
            CoordinatorState::ExecuteNewBlock => self.on_execute_new_block(),
            CoordinatorState::WaitForNewBlockExecution => self.on_wait_for_new_block_execution(),
            CoordinatorState::TransmitBlock => self.on_transmit_block(),
            CoordinatorState::Reset => self.on_reset(),
        }
    }
}

impl Runnable for BlockCoordinator {
    fn name(&self) -> &str {
        "block_coordinator"
    }

    fn poll_once(&mut self) -> bool {
        let previous = self.state;
        self.state = self.step();
        if self.state != previous {
            tracing::debug!(from = ?previous, to = ?self.state, "coordinator state transition");
            COORDINATOR_STATE_TRANSITIONS.with_label_values(&[Self::state_label(self.state)]).inc();
        }
        self.state != previous
    }
}
