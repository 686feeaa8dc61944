//! Chain sync error types.

use thiserror::Error;

/// Errors surfaced by the chain sync service's RPC boundary.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Every known peer has been abandoned after repeated failures.
    #[error("no peers left to sync with")]
    NoPeersAvailable,

    /// A peer returned a malformed or empty time-travel reply.
    #[error("peer {peer} returned a malformed reply")]
    MalformedReply {
        /// The peer that sent the reply.
        peer: String,
    },
}
