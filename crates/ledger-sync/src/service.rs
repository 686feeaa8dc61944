//! The chain sync service (C6) itself: a six-state machine that pulls a
//! peer's chain via time-travel RPC when the main chain holds loose
//! blocks or a resync timer expires, and otherwise just ingests gossip.

use crate::peer::PeerState;
use crate::rpc::{RpcClient, RpcPoll};
use ledger_chain::{AddOutcome, MainChain};
use ledger_consensus::{BlockValidity, ConsensusContract};
use ledger_reactor::{Clock, PeriodicAction, Runnable};
use ledger_telemetry::{
    HistogramTimer, CHAIN_ADD_BLOCK_OUTCOMES, SYNC_PEERS_ABANDONED, SYNC_PEER_FAILURES, SYNC_PULL_DURATION_SECONDS,
};
use rand::seq::SliceRandom;
use shared_bus::GossipSubscription;
use shared_types::{Hash, Travelogue, TravelogueStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Longest backward walk toward genesis the service will perform looking
/// for a hash the peer recognises, mirroring
/// `ledger_coordinator::COMMON_PATH_TO_ANCESTOR_LENGTH_LIMIT`.
pub const COMMON_PATH_TO_ANCESTOR_LENGTH_LIMIT: usize = 5000;

/// Consecutive in-session RPC failures against one peer before giving up
/// on it for this sync attempt.
const MAX_REQUEST_FAILURES: u32 = 3;

/// Loose-block count above which `SYNCHRONISED` re-enters `SYNCHRONISING`
/// even without the resync timer firing.
const LOOSE_BLOCK_THRESHOLD: usize = 5;

/// How often `SYNCHRONISED` proactively re-checks a peer even with no
/// loose blocks pending.
const RESYNC_INTERVAL_MS: u64 = 20_000;

/// The six chain sync states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Drain gossip; pick a peer to sync with, if any is eligible.
    Synchronising,
    /// Bias `block_resolving` one block back off the local heaviest tip.
    StartSyncWithPeer,
    /// Issue a time-travel request against the current peer.
    RequestNextBlocks,
    /// Poll the in-flight request.
    WaitForNextBlocks,
    /// Clear per-peer session state.
    CompleteSyncWithPeer,
    /// No loose blocks, no resync due, no peer pull in flight.
    Synchronised,
}

/// Tally of [`AddOutcome`]s seen while ingesting blocks, whether from
/// gossip or from a peer's time-travel reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestCounters {
    pub added: u64,
    pub loose: u64,
    pub duplicate: u64,
    pub invalid: u64,
    pub dirty: u64,
}

fn outcome_label(outcome: AddOutcome) -> &'static str {
    match outcome {
        AddOutcome::Added => "added",
        AddOutcome::Loose => "loose",
        AddOutcome::Duplicate => "duplicate",
        AddOutcome::Invalid => "invalid",
        AddOutcome::Dirty => "dirty",
    }
}

impl IngestCounters {
    fn record(&mut self, outcome: AddOutcome) {
        match outcome {
            AddOutcome::Added => self.added += 1,
            AddOutcome::Loose => self.loose += 1,
            AddOutcome::Duplicate => self.duplicate += 1,
            AddOutcome::Invalid => self.invalid += 1,
            AddOutcome::Dirty => self.dirty += 1,
        }
        CHAIN_ADD_BLOCK_OUTCOMES.with_label_values(&[outcome_label(outcome)]).inc();
    }

    fn record_invalid(&mut self) {
        self.invalid += 1;
        CHAIN_ADD_BLOCK_OUTCOMES.with_label_values(&["invalid"]).inc();
    }
}

/// Drives peer pulls and gossip ingestion against a shared [`MainChain`].
pub struct ChainSyncService {
    chain: Arc<Mutex<dyn MainChain>>,
    rpc: Box<dyn RpcClient>,
    consensus: Box<dyn ConsensusContract>,
    gossip: GossipSubscription,
    clock: Arc<dyn Clock>,
    resync_timer: PeriodicAction,

    state: SyncState,
    peers: HashMap<String, PeerState>,
    current_peer: Option<String>,
    block_resolving: Option<Hash>,
    resolving_steps: usize,
    request_failures: u32,
    counters: IngestCounters,
    pull_timer: Option<HistogramTimer<'static>>,
}

impl ChainSyncService {
    /// Build a service starting in [`SyncState::Synchronising`]. `consensus`
    /// gates every block this service ingests, from gossip or from a peer's
    /// time-travel reply, the same way the block coordinator's own
    /// consensus contract gates replay.
    pub fn new(
        chain: Arc<Mutex<dyn MainChain>>,
        rpc: Box<dyn RpcClient>,
        consensus: Box<dyn ConsensusContract>,
        gossip: GossipSubscription,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let resync_timer = PeriodicAction::new(RESYNC_INTERVAL_MS, clock.now_ms() + RESYNC_INTERVAL_MS);
        Self {
            chain,
            rpc,
            consensus,
            gossip,
            clock,
            resync_timer,
            state: SyncState::Synchronising,
            peers: HashMap::new(),
            current_peer: None,
            block_resolving: None,
            resolving_steps: 0,
            request_failures: 0,
            counters: IngestCounters::default(),
            pull_timer: None,
        }
    }

    /// Current state, for tests and diagnostics.
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Running tally of ingestion outcomes, across both gossip and peer
    /// pulls.
    pub fn counters(&self) -> IngestCounters {
        self.counters
    }

    fn drain_gossip(&mut self) {
        let mut chain = self.chain.lock().expect("chain mutex poisoned");
        loop {
            match self.gossip.try_recv() {
                Ok(Some(mut block)) => {
                    block.update_digest();
                    if self.consensus.valid_block(&block) != BlockValidity::Valid {
                        tracing::warn!(hash = ?block.hash, "gossiped block failed consensus validation");
                        self.counters.record_invalid();
                        continue;
                    }
                    let outcome = chain.add_block(block);
                    self.counters.record(outcome);
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(error = %err, "gossip subscription error while draining");
                    break;
                }
            }
        }
    }

    fn loose_count(&self) -> usize {
        self.chain.lock().expect("chain mutex poisoned").loose_count()
    }

    /// Pick one eligible peer uniformly at random from the directly
    /// connected set, skipping abandoned or currently backed-off peers.
    fn on_synchronising(&mut self) -> SyncState {
        self.drain_gossip();
        let now = self.clock.now_ms();
        let eligible: Vec<String> = self
            .rpc
            .peers()
            .into_iter()
            .filter(|peer| {
                let state = self.peers.entry(peer.clone()).or_default();
                !state.is_abandoned() && !state.is_backed_off(now)
            })
            .collect();
        match eligible.choose(&mut rand::thread_rng()) {
            Some(peer) => {
                self.current_peer = Some(peer.clone());
                SyncState::StartSyncWithPeer
            }
            None => SyncState::Synchronised,
        }
    }

    /// Bias `block_resolving` one block back off the local heaviest tip
    /// (or the tip itself, if it's genesis), absorbing the case where the
    /// local heaviest was just mined and the peer hasn't seen it yet.
    fn on_start_sync_with_peer(&mut self) -> SyncState {
        let heaviest = self.chain.lock().expect("chain mutex poisoned").get_heaviest_block();
        self.block_resolving = Some(if heaviest.is_genesis() { heaviest.hash } else { heaviest.previous_hash });
        self.resolving_steps = 0;
        self.request_failures = 0;
        SyncState::RequestNextBlocks
    }

    fn on_request_next_blocks(&mut self) -> SyncState {
        let (Some(peer), Some(block_resolving)) = (self.current_peer.clone(), self.block_resolving) else {
            return SyncState::Synchronising;
        };
        self.rpc.request_time_travel(&peer, block_resolving);
        self.pull_timer.get_or_insert_with(|| HistogramTimer::start(&SYNC_PULL_DURATION_SECONDS));
        SyncState::WaitForNextBlocks
    }

    fn on_wait_for_next_blocks(&mut self) -> SyncState {
        match self.rpc.poll_time_travel() {
            RpcPoll::Waiting => SyncState::WaitForNextBlocks,
            RpcPoll::Success(travelogue) => {
                self.pull_timer.take();
                self.handle_travelogue(travelogue)
            }
            RpcPoll::Failed => {
                self.pull_timer.take();
                self.record_request_failure()
            }
        }
    }

    fn record_request_failure(&mut self) -> SyncState {
        self.mark_peer_result(false);
        self.request_failures += 1;
        if self.request_failures >= MAX_REQUEST_FAILURES {
            tracing::debug!(peer = ?self.current_peer, "giving up on peer after repeated request failures");
            return SyncState::CompleteSyncWithPeer;
        }
        SyncState::RequestNextBlocks
    }

    fn handle_travelogue(&mut self, travelogue: Travelogue) -> SyncState {
        match travelogue.status {
            TravelogueStatus::NotFound => self.step_block_resolving_back(),
            TravelogueStatus::Ok if travelogue.blocks.is_empty() => {
                self.mark_peer_result(true);
                SyncState::CompleteSyncWithPeer
            }
            TravelogueStatus::Ok => self.handle_chain_response(travelogue),
        }
    }

    /// The peer has no record of `block_resolving`; step one block back
    /// toward genesis and retry, capped at
    /// [`COMMON_PATH_TO_ANCESTOR_LENGTH_LIMIT`].
    fn step_block_resolving_back(&mut self) -> SyncState {
        let Some(current_hash) = self.block_resolving else {
            return SyncState::CompleteSyncWithPeer;
        };
        if self.resolving_steps >= COMMON_PATH_TO_ANCESTOR_LENGTH_LIMIT {
            tracing::warn!(peer = ?self.current_peer, "exhausted common-ancestor search, giving up on peer");
            self.mark_peer_result(false);
            return SyncState::CompleteSyncWithPeer;
        }
        let chain = self.chain.lock().expect("chain mutex poisoned");
        let Some(current) = chain.get_block(&current_hash) else {
            drop(chain);
            return SyncState::CompleteSyncWithPeer;
        };
        if current.is_genesis() {
            drop(chain);
            tracing::warn!(peer = ?self.current_peer, "peer has no record even of genesis, giving up");
            self.mark_peer_result(false);
            return SyncState::CompleteSyncWithPeer;
        }
        let parent_hash = current.previous_hash;
        drop(chain);
        self.block_resolving = Some(parent_hash);
        self.resolving_steps += 1;
        SyncState::RequestNextBlocks
    }

    /// Ingest a peer's reply oldest-first, validating each block against
    /// consensus before admitting it, then decide whether the pull with
    /// this peer is done or needs another round from the last block the
    /// local chain actually holds.
    fn handle_chain_response(&mut self, travelogue: Travelogue) -> SyncState {
        let mut blocks = travelogue.blocks;
        for block in &mut blocks {
            block.update_digest();
        }
        let last = blocks.last().map(|b| (b.hash, b.block_number));

        let mut chain = self.chain.lock().expect("chain mutex poisoned");
        let mut resolvable = Vec::new();
        for block in blocks {
            if block.is_genesis() {
                continue;
            }
            if self.consensus.valid_block(&block) != BlockValidity::Valid {
                tracing::warn!(hash = ?block.hash, peer = ?self.current_peer, "peer block failed consensus validation");
                self.counters.record_invalid();
                continue;
            }
            let hash = block.hash;
            let outcome = chain.add_block(block);
            self.counters.record(outcome);
            if matches!(outcome, AddOutcome::Added | AddOutcome::Duplicate) {
                resolvable.push(hash);
            }
        }
        drop(chain);
        self.mark_peer_result(true);

        let finished = match last {
            Some((hash, number)) => hash == travelogue.heaviest_hash || number > travelogue.block_number,
            None => true,
        };
        if finished {
            return SyncState::CompleteSyncWithPeer;
        }

        match resolvable.last() {
            Some(&hash) => {
                self.block_resolving = Some(hash);
                self.resolving_steps = 0;
                SyncState::RequestNextBlocks
            }
            None => {
                tracing::warn!(peer = ?self.current_peer, "peer reply left nothing locally resolvable, giving up");
                SyncState::CompleteSyncWithPeer
            }
        }
    }

    fn mark_peer_result(&mut self, success: bool) {
        let Some(peer) = &self.current_peer else { return };
        let now = self.clock.now_ms();
        let state = self.peers.entry(peer.clone()).or_default();
        if success {
            state.record_success();
        } else {
            let was_abandoned = state.is_abandoned();
            state.record_failure(now);
            SYNC_PEER_FAILURES.inc();
            if !was_abandoned && state.is_abandoned() {
                SYNC_PEERS_ABANDONED.inc();
            }
        }
    }

    fn on_complete_sync_with_peer(&mut self) -> SyncState {
        self.current_peer = None;
        self.block_resolving = None;
        self.resolving_steps = 0;
        self.request_failures = 0;
        SyncState::Synchronised
    }

    fn on_synchronised(&mut self) -> SyncState {
        self.drain_gossip();
        if self.loose_count() > LOOSE_BLOCK_THRESHOLD {
            return SyncState::Synchronising;
        }
        if self.resync_timer.poll(self.clock.as_ref()) {
            return SyncState::Synchronising;
        }
        SyncState::Synchronised
    }

    fn step(&mut self) -> SyncState {
        match self.state {
            SyncState::Synchronising => self.on_synchronising(),
            SyncState::StartSyncWithPeer => self.on_start_sync_with_peer(),
            SyncState::RequestNextBlocks => self.on_request_next_blocks(),
            SyncState::WaitForNextBlocks => self.on_wait_for_next_blocks(),
            SyncState::CompleteSyncWithPeer => self.on_complete_sync_with_peer(),
            SyncState::Synchronised => self.on_synchronised(),
        }
    }
}

impl Runnable for ChainSyncService {
    fn name(&self) -> &str {
        "chain_sync_service"
    }

    fn poll_once(&mut self) -> bool {
        let previous = self.state;
        self.state = self.step();
        if self.state != previous {
            tracing::debug!(from = ?previous, to = ?self.state, "sync state transition");
        }
        self.state != previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_chain::InMemoryMainChain;
    use ledger_consensus::SimulatedPowConsensus;
    use ledger_reactor::ManualClock;
    use shared_bus::GossipBus;
    use shared_types::{Block, Identity};

    struct ScriptedRpc {
        peers: Vec<String>,
        replies: Vec<RpcPoll>,
    }

    impl RpcClient for ScriptedRpc {
        fn peers(&self) -> Vec<String> {
            self.peers.clone()
        }

        fn request_time_travel(&mut self, _peer: &str, _from_hash: Hash) {}

        fn poll_time_travel(&mut self) -> RpcPoll {
            if self.replies.is_empty() {
                RpcPoll::Failed
            } else {
                self.replies.remove(0)
            }
        }
    }

    fn permissive_consensus(genesis: &Block, clock: Arc<dyn Clock>) -> Box<dyn ConsensusContract> {
        Box::new(SimulatedPowConsensus::new(Identity::NONE, 0, genesis.clone(), clock))
    }

    fn child_of(parent: &Block, weight: u64) -> Block {
        let mut b = Block {
            hash: shared_types::ZERO_HASH,
            previous_hash: parent.hash,
            block_number: parent.block_number + 1,
            miner_id: shared_types::Identity::NONE,
            timestamp: parent.timestamp + 1,
            weight,
            total_weight: 0,
            merkle_hash: shared_types::ZERO_HASH,
            log2_num_lanes: parent.log2_num_lanes,
            slices: vec![Vec::new(); parent.slices.len()],
            block_entropy: Default::default(),
        };
        b.update_digest();
        b
    }

    #[test]
    fn no_loose_blocks_goes_straight_to_synchronised() {
        let genesis = Block::genesis(0, 1);
        let chain: Arc<Mutex<dyn MainChain>> = Arc::new(Mutex::new(InMemoryMainChain::new(genesis.clone())));
        let bus = GossipBus::new();
        let rpc = Box::new(ScriptedRpc { peers: vec![], replies: vec![] });
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
        let consensus = permissive_consensus(&genesis, clock.clone());
        let mut service = ChainSyncService::new(chain, rpc, consensus, bus.subscribe(), clock);

        service.poll_once();
        assert_eq!(service.state(), SyncState::Synchronised);
    }

    #[test]
    fn pulls_missing_ancestor_from_peer() {
        let genesis = Block::genesis(0, 1);
        let b1 = child_of(&genesis, 1);
        let b2 = child_of(&b1, 1);

        let chain: Arc<Mutex<dyn MainChain>> = Arc::new(Mutex::new(InMemoryMainChain::new(genesis.clone())));
        chain.lock().unwrap().add_block(b2.clone()); // loose: parent b1 unknown

        let bus = GossipBus::new();
        let travelogue = Travelogue {
            status: TravelogueStatus::Ok,
            blocks: vec![b1.clone()],
            heaviest_hash: b1.hash,
            block_number: b1.block_number,
        };
        let rpc = Box::new(ScriptedRpc {
            peers: vec!["peer-a".to_string()],
            replies: vec![RpcPoll::Success(travelogue)],
        });
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
        let consensus = permissive_consensus(&genesis, clock.clone());
        let mut service = ChainSyncService::new(chain.clone(), rpc, consensus, bus.subscribe(), clock);

        // Synchronising -> StartSyncWithPeer -> RequestNextBlocks -> WaitForNextBlocks
        // -> CompleteSyncWithPeer -> Synchronised
        for _ in 0..6 {
            service.poll_once();
        }

        assert_eq!(service.state(), SyncState::Synchronised);
        assert_eq!(chain.lock().unwrap().loose_count(), 0);
        assert_eq!(chain.lock().unwrap().get_heaviest_block().hash, b2.hash);
    }

    #[test]
    fn not_found_steps_block_resolving_back_toward_genesis() {
        let genesis = Block::genesis(0, 1);
        let b1 = child_of(&genesis, 1);
        let b2 = child_of(&b1, 1);

        let chain: Arc<Mutex<dyn MainChain>> = Arc::new(Mutex::new(InMemoryMainChain::new(genesis.clone())));
        {
            let mut locked = chain.lock().unwrap();
            locked.add_block(b1.clone());
            locked.add_block(b2.clone());
        }

        let bus = GossipBus::new();
        // The peer doesn't recognise our heaviest's bias point (b1) at
        // first, forcing one more step back to genesis before it replies.
        let not_found = Travelogue::not_found(b2.hash, b2.block_number);
        let travelogue = Travelogue {
            status: TravelogueStatus::Ok,
            blocks: vec![b1.clone(), b2.clone()],
            heaviest_hash: b2.hash,
            block_number: b2.block_number,
        };
        let rpc = Box::new(ScriptedRpc {
            peers: vec!["peer-a".to_string()],
            replies: vec![RpcPoll::Success(not_found), RpcPoll::Success(travelogue)],
        });
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
        let consensus = permissive_consensus(&genesis, clock.clone());
        let mut service = ChainSyncService::new(chain.clone(), rpc, consensus, bus.subscribe(), clock);

        for _ in 0..9 {
            service.poll_once();
        }

        assert_eq!(service.state(), SyncState::Synchronised);
    }

    #[test]
    fn failed_pull_backs_off_the_peer() {
        let genesis = Block::genesis(0, 1);
        let b1 = child_of(&genesis, 1);
        let b2 = child_of(&b1, 1);
        let chain: Arc<Mutex<dyn MainChain>> = Arc::new(Mutex::new(InMemoryMainChain::new(genesis.clone())));
        chain.lock().unwrap().add_block(b2);

        let bus = GossipBus::new();
        let rpc = Box::new(ScriptedRpc {
            peers: vec!["peer-a".to_string()],
            replies: vec![RpcPoll::Failed],
        });
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
        let consensus = permissive_consensus(&genesis, clock.clone());
        let mut service = ChainSyncService::new(chain, rpc, consensus, bus.subscribe(), clock);

        for _ in 0..4 {
            service.poll_once();
        }
        assert_eq!(service.peers.get("peer-a").unwrap().consecutive_failures, 1);
    }

    #[test]
    fn invalid_peer_block_is_never_added_to_the_chain() {
        let genesis = Block::genesis(0, 1);
        let b1 = child_of(&genesis, 1);
        let b2 = child_of(&b1, 1);
        let b2_hash = b2.hash;
        let chain: Arc<Mutex<dyn MainChain>> = Arc::new(Mutex::new(InMemoryMainChain::new(genesis.clone())));
        chain.lock().unwrap().add_block(b2.clone());

        let bus = GossipBus::new();
        let travelogue = Travelogue {
            status: TravelogueStatus::Ok,
            blocks: vec![b1.clone()],
            heaviest_hash: b1.hash,
            block_number: b1.block_number,
        };
        let rpc = Box::new(ScriptedRpc {
            peers: vec!["peer-a".to_string()],
            replies: vec![RpcPoll::Success(travelogue)],
        });
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));

        // A refuser rejects every block, so b1 never gets admitted and b2
        // stays loose.
        struct RefuseAll;
        impl ConsensusContract for RefuseAll {
            fn update_current_block(&mut self, _current: &shared_types::Block) {}
            fn valid_block(&self, _candidate: &shared_types::Block) -> BlockValidity {
                BlockValidity::Invalid
            }
            fn generate_next_block(&mut self, _current_time_ms: u64) -> Option<shared_types::Block> {
                None
            }
            fn set_block_interval(&mut self, _interval_ms: u64) {}
            fn reset(&mut self, _genesis: &shared_types::Block) {}
        }
        let mut service = ChainSyncService::new(chain.clone(), rpc, Box::new(RefuseAll), bus.subscribe(), clock);

        for _ in 0..6 {
            service.poll_once();
        }

        assert_eq!(chain.lock().unwrap().loose_count(), 1);
        assert!(chain.lock().unwrap().get_block(&b2_hash).is_none());
        assert_eq!(service.counters().invalid, 1);
    }
}
