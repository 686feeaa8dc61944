//! # Ledger Sync
//!
//! The chain sync service (C6): a six-state machine that pulls a peer's
//! chain via time-travel RPC whenever the main chain holds loose blocks,
//! and otherwise just ingests gossiped blocks. Implements
//! [`ledger_reactor::Runnable`] so the node's reactor can drive it
//! alongside the block coordinator.

#![warn(missing_docs)]

mod errors;
mod peer;
mod rpc;
mod service;

pub use errors::SyncError;
pub use rpc::{NoPeersRpcClient, RpcClient, RpcPoll};
pub use service::{ChainSyncService, IngestCounters, SyncState, COMMON_PATH_TO_ANCESTOR_LENGTH_LIMIT};
