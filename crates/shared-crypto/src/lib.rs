//! # Shared Crypto
//!
//! The node's identity primitive: Ed25519 keypairs, used both to sign
//! produced blocks (miner identity) and to verify the blocks and gossip
//! messages of other identities in the cabinet.
//!
//! ## Security Properties
//!
//! - **Ed25519**: Deterministic nonces, no RNG dependency for signing.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod errors;
pub mod signatures;

pub use errors::CryptoError;
pub use signatures::{Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
