//! End-to-end scenario for the chain sync service (C6): a peer fork
//! reconciliation. The local chain's own block is loose on arrival of a
//! heavier peer chain; the sync service pulls the missing ancestor,
//! promotes the peer's branch to heaviest, and the block coordinator then
//! resumes execution along it.

use crate::fixtures::child_of;
use ledger_chain::{InMemoryMainChain, MainChain};
use ledger_consensus::SimulatedPowConsensus;
use ledger_coordinator::{
    AlwaysPresentStorageUnit, BlockCoordinator, BlockCoordinatorConfig, CoordinatorState, ImmediateExecutionManager,
    NullBlockSink, PassthroughBlockPacker,
};
use ledger_reactor::{Clock, ManualClock, Runnable};
use ledger_sync::{ChainSyncService, RpcClient, RpcPoll, SyncState};
use shared_bus::GossipBus;
use shared_types::{Block, Hash, Identity, Travelogue, TravelogueStatus};
use std::sync::{Arc, Mutex};

const MINER: Identity = Identity([3; 32]);

/// A peer whose reply script is fixed up front, mirroring
/// `ledger_sync::service`'s own private test double.
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

/// The local node mined `local_tip` on top of the shared ancestor `a`,
/// while a peer mined a heavier two-block branch `b1 -> b2` on the same
/// ancestor. The peer's tip arrives as a loose block (its parent `b1` is
/// unknown locally); the sync service asks the peer for what follows `a`
/// and receives `[b1, b2]`, which promotes the whole branch and leaves it
/// heaviest since its combined weight beats the local tip's.
#[test]
fn adopts_heavier_peer_fork_and_resumes_execution_along_it() {
    let genesis = Block::genesis(0, 1);
    let local_tip = child_of(&genesis, 1, MINER);
    let b1 = child_of(&genesis, 5, MINER);
    let b2 = child_of(&b1, 5, MINER);

    let chain: Arc<Mutex<dyn MainChain>> = Arc::new(Mutex::new(InMemoryMainChain::new(genesis.clone())));
    {
        let mut locked = chain.lock().unwrap();
        assert_eq!(locked.add_block(local_tip.clone()), ledger_chain::AddOutcome::Added);
        assert_eq!(locked.get_heaviest_block().hash, local_tip.hash);
        // b2's parent b1 isn't known yet: arrives loose, same as gossip
        // delivering a peer's tip ahead of its ancestors.
        assert_eq!(locked.add_block(b2.clone()), ledger_chain::AddOutcome::Loose);
        assert_eq!(locked.loose_count(), 1);
    }

    let bus = GossipBus::new();
    // The sync service's bias-by-one walk asks for what follows local_tip's
    // parent (genesis), since local_tip hasn't been accepted by the peer.
    let travelogue = Travelogue {
        status: TravelogueStatus::Ok,
        blocks: vec![b1.clone(), b2.clone()],
        heaviest_hash: b2.hash,
        block_number: b2.block_number,
    };
    let rpc = Box::new(ScriptedRpc {
        peers: vec!["peer-a".to_string()],
        replies: vec![RpcPoll::Success(travelogue)],
    });
    let sync_clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
    let sync_consensus = Box::new(SimulatedPowConsensus::new(MINER, 0, genesis.clone(), sync_clock.clone()));
    let mut sync_service = ChainSyncService::new(chain.clone(), rpc, sync_consensus, bus.subscribe(), sync_clock);

    // Synchronising -> StartSyncWithPeer -> RequestNextBlocks ->
    // WaitForNextBlocks -> CompleteSyncWithPeer -> Synchronised
    for _ in 0..6 {
        sync_service.poll_once();
    }
    assert_eq!(sync_service.state(), SyncState::Synchronised);

    {
        let locked = chain.lock().unwrap();
        assert_eq!(locked.loose_count(), 0);
        assert_eq!(locked.get_heaviest_block().hash, b2.hash, "heavier peer branch should win the tip");
    }

    // The coordinator, started fresh against the now-reconciled chain,
    // should walk the common ancestor (genesis) forward along the adopted
    // branch rather than the abandoned local_tip.
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
    let consensus = Box::new(SimulatedPowConsensus::new(MINER, 0, genesis.clone(), clock.clone()));
    let mut coordinator = BlockCoordinator::new(BlockCoordinatorConfig {
        chain: chain.clone(),
        consensus,
        execution_manager: Box::new(ImmediateExecutionManager::default()),
        block_packer: Box::new(PassthroughBlockPacker),
        block_sink: Box::new(NullBlockSink),
        storage_unit: Box::new(AlwaysPresentStorageUnit),
        clock,
        log2_num_lanes: 0,
        num_slices: 1,
        wait_for_transactions_timeout_ms: ledger_coordinator::WAIT_FOR_TRANSACTIONS_TIMEOUT_MS,
    });
    coordinator.reset_to_genesis(&genesis);

    for _ in 0..40 {
        if coordinator.state() == CoordinatorState::Synchronised {
            break;
        }
        coordinator.poll_once();
    }
    assert_eq!(coordinator.state(), CoordinatorState::Synchronised);
    assert_eq!(coordinator.last_executed_block(), b2.hash);
    assert_ne!(coordinator.last_executed_block(), local_tip.hash);
}
