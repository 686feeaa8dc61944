#![warn(missing_docs)]
//! Wires the block execution and chain synchronization core into a
//! running node: reads a genesis file, builds the main chain, the
//! stake-weighted consensus contract, the block coordinator, and the
//! chain sync service, and drives them with one cooperative reactor.

pub mod container;
pub mod genesis;

pub use container::{NodeContainer, NodeError};
pub use genesis::{GenesisAccount, GenesisConsensus, GenesisError, GenesisFile, GenesisStaker};
