//! The time-travel RPC boundary the chain sync service drives. The actual
//! peer transport (muddle-style p2p) is out of scope for this core; this
//! is the contract an adapter over it would implement.

use shared_types::{Hash, Travelogue};

/// Outcome of polling an in-flight time-travel request.
pub enum RpcPoll {
    /// The request has not resolved yet.
    Waiting,
    /// The peer replied.
    Success(Travelogue),
    /// The request failed (timeout, disconnect, malformed reply).
    Failed,
}

/// The server side of the time-travel RPC, from the client's perspective.
/// `request_time_travel` starts a request; `poll_time_travel` is polled
/// cooperatively until it resolves, mirroring how the coordinator polls
/// `ExecutionManagerInterface`.
pub trait RpcClient: Send {
    /// The known peer addresses to try, in preference order.
    fn peers(&self) -> Vec<String>;

    /// Start a time-travel request against `peer`, walking forward from
    /// `from_hash`.
    fn request_time_travel(&mut self, peer: &str, from_hash: Hash);

    /// Poll the most recently started request.
    fn poll_time_travel(&mut self) -> RpcPoll;
}

/// A trivial [`RpcClient`] reporting no peers, for single-node wiring
/// where the actual p2p transport hasn't been plugged in. The sync
/// service simply stays in [`crate::SyncState::Synchronising`], ingesting
/// gossip only.
#[derive(Debug, Default)]
pub struct NoPeersRpcClient;

impl RpcClient for NoPeersRpcClient {
    fn peers(&self) -> Vec<String> {
        Vec::new()
    }

    fn request_time_travel(&mut self, _peer: &str, _from_hash: Hash) {}

    fn poll_time_travel(&mut self) -> RpcPoll {
        RpcPoll::Failed
    }
}
