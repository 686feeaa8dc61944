//! # Ledger Coordinator
//!
//! The block coordinator (C5): a fifteen-state cooperative machine that
//! replays inbound blocks onto the execution engine to catch the node up
//! with the chain head, then mines and transmits new blocks once caught
//! up. Implements [`ledger_reactor::Runnable`] so the node's reactor can
//! drive it alongside the chain sync service.

#![warn(missing_docs)]

mod coordinator;
mod errors;
mod ports;

pub use coordinator::{
    BlockCoordinator, BlockCoordinatorConfig, CoordinatorState, COMMON_PATH_TO_ANCESTOR_LENGTH_LIMIT,
    WAIT_FOR_TRANSACTIONS_TIMEOUT_MS,
};
pub use errors::CoordinatorError;
pub use ports::{
    AlwaysPresentStorageUnit, BlockPackerInterface, BlockSinkInterface, ExecutionManagerInterface, ExecutionStatus,
    ImmediateExecutionManager, NullBlockSink, NullTransactionRequester, PassthroughBlockPacker, StorageUnitInterface,
    TransactionRequestPort,
};
