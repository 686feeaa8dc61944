//! Block coordinator error types.

use thiserror::Error;

/// Errors surfaced by the block coordinator's interfaces.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The execution manager reported a hard failure executing a block.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// The block packer failed to produce a candidate block.
    #[error("block packing failed: {0}")]
    PackingFailed(String),

    /// The common-ancestor walk exceeded `COMMON_PATH_TO_ANCESTOR_LENGTH_LIMIT`
    /// without finding the last executed block.
    #[error("no common ancestor found within the search limit")]
    AncestorLimitExceeded,
}
