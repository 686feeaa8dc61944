//! Wires the reactor, block coordinator, chain sync service, main chain,
//! and a stake-weighted consensus contract into one running node.
//!
//! ## Teardown
//!
//! Rust's `Drop` already gives reverse-construction-order teardown for
//! anything held by a local or a struct field, which covers the reactor's
//! stop handle and every `Arc`/`Box` below. The explicit teardown stack is
//! only needed for resources built conditionally (e.g. an optional RPC
//! listener a future revision of this binary might add) where no single
//! struct field naturally owns the guard.

use base64::Engine;
use ledger_chain::InMemoryMainChain;
use ledger_consensus::{StakeConsensus, StakeManager};
use ledger_coordinator::{
    AlwaysPresentStorageUnit, BlockCoordinator, BlockCoordinatorConfig, ImmediateExecutionManager,
    PassthroughBlockPacker,
};
use ledger_reactor::{Clock, Reactor, SystemClock};
use ledger_sync::{ChainSyncService, NoPeersRpcClient};
use ledger_telemetry::NodeConfig;
use shared_bus::GossipBus;
use shared_types::{Block, Identity, StakeRecord};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::genesis::GenesisFile;

/// Errors that prevent the node from starting at all. Per the fatal-error
/// handling rule in the error design, a node hitting one of these must
/// refuse to start rather than attempt in-process recovery.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The genesis file failed its own validation.
    #[error("genesis file invalid: {0}")]
    Genesis(#[from] crate::genesis::GenesisError),
    /// A staker's identity did not base64-decode to exactly 32 bytes.
    #[error("staker identity {identity:?} is not a valid 32-byte key: {reason}")]
    InvalidStakerIdentity {
        /// The offending base64 string.
        identity: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Publishes newly mined blocks to the gossip bus, grounding the
/// coordinator's `TransmitBlock` state in the actual fan-out primitive
/// the chain sync service's peers listen on.
struct GossipBlockSink {
    bus: GossipBus,
}

impl ledger_coordinator::BlockSinkInterface for GossipBlockSink {
    fn on_block(&mut self, block: Block) {
        let subscribers = self.bus.publish(block);
        tracing::debug!(subscribers, "published mined block to gossip bus");
    }
}

fn decode_identity(base64_identity: &str) -> Result<Identity, NodeError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(base64_identity)
        .map_err(|e| NodeError::InvalidStakerIdentity {
            identity: base64_identity.to_string(),
            reason: e.to_string(),
        })?;
    let array: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| NodeError::InvalidStakerIdentity {
        identity: base64_identity.to_string(),
        reason: format!("expected 32 bytes, got {}", v.len()),
    })?;
    Ok(Identity::new(array))
}

fn build_stake_manager(genesis: &GenesisFile) -> Result<StakeManager, NodeError> {
    let records = genesis
        .consensus
        .stakers
        .iter()
        .map(|staker| {
            let identity = decode_identity(&staker.identity)?;
            Ok(StakeRecord { identity, stake: staker.amount as u64 })
        })
        .collect::<Result<Vec<_>, NodeError>>()?;
    let snapshot = ledger_consensus::StakeSnapshot::new(records);
    Ok(StakeManager::new(snapshot))
}

/// Everything needed to run one node: the reactor and the two state
/// machines it drives, plus handles tests and the binary's `main` use to
/// observe progress.
pub struct NodeContainer {
    /// The cooperative reactor driving the coordinator and sync service.
    pub reactor: Reactor,
    /// The main chain, shared between the coordinator (single writer on
    /// the reactor thread) and anything inspecting chain state.
    pub chain: Arc<Mutex<dyn ledger_chain::MainChain>>,
    /// The block coordinator (C5), held behind a mutex so the reactor's
    /// `Weak<Mutex<dyn Runnable>>` can poll it.
    pub coordinator: Arc<Mutex<BlockCoordinator>>,
    /// The chain sync service (C6), driven by the same reactor.
    pub sync_service: Arc<Mutex<ChainSyncService>>,
    /// Gossip bus new blocks are published to and ingested from.
    pub gossip: GossipBus,
}

impl std::fmt::Debug for NodeContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeContainer").finish_non_exhaustive()
    }
}

impl NodeContainer {
    /// Build a node for `genesis`, mining as `own_identity`, using
    /// `config` for every tunable.
    pub fn new(genesis: GenesisFile, config: &NodeConfig, own_identity: Identity) -> Result<Self, NodeError> {
        genesis.validate()?;

        let genesis_block = Block::genesis(config.log2_num_lanes, config.num_slices);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let stake_manager = build_stake_manager(&genesis)?;
        let max_cabinet_size = genesis.consensus.cabinet_size.min(config.max_cabinet_size);
        let consensus = Box::new(StakeConsensus::new(
            own_identity,
            stake_manager,
            max_cabinet_size,
            config.block_interval_ms,
            genesis_block.clone(),
            clock.clone(),
        ));

        let chain: Arc<Mutex<dyn ledger_chain::MainChain>> =
            Arc::new(Mutex::new(InMemoryMainChain::new(genesis_block.clone())));

        let gossip = GossipBus::new();

        let coordinator = BlockCoordinator::new(BlockCoordinatorConfig {
            chain: chain.clone(),
            consensus,
            execution_manager: Box::new(ImmediateExecutionManager::default()),
            block_packer: Box::new(PassthroughBlockPacker),
            block_sink: Box::new(GossipBlockSink { bus: gossip.clone() }),
            storage_unit: Box::new(AlwaysPresentStorageUnit),
            clock: clock.clone(),
            log2_num_lanes: config.log2_num_lanes,
            num_slices: config.num_slices,
            wait_for_transactions_timeout_ms: config.wait_for_transactions_timeout_ms,
        });
        let coordinator = Arc::new(Mutex::new(coordinator));

        // The sync service needs its own consensus instance to gate
        // peer-supplied blocks; it never mines, so its cabinet rotation is
        // free to diverge from the coordinator's own instance over time.
        let sync_stake_manager = build_stake_manager(&genesis)?;
        let sync_consensus = Box::new(StakeConsensus::new(
            own_identity,
            sync_stake_manager,
            max_cabinet_size,
            0,
            genesis_block.clone(),
            clock.clone(),
        ));

        let sync_service = ChainSyncService::new(
            chain.clone(),
            Box::new(NoPeersRpcClient),
            sync_consensus,
            gossip.subscribe(),
            clock,
        );
        let sync_service = Arc::new(Mutex::new(sync_service));

        let mut reactor = Reactor::new(std::time::Duration::from_millis(config.reactor_idle_sleep_ms));
        reactor.attach(&(coordinator.clone() as Arc<Mutex<dyn ledger_reactor::Runnable>>));
        reactor.attach(&(sync_service.clone() as Arc<Mutex<dyn ledger_reactor::Runnable>>));

        Ok(Self { reactor, chain, coordinator, sync_service, gossip })
    }

    /// The reactor's stop flag, for the binary's shutdown-signal handler.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.reactor.stop_handle()
    }
}
