//! Genesis file contract (JSON v4). Parsing a file from disk and
//! reporting validation errors belongs to the out-of-scope genesis-loading
//! subsystem; this module only defines the `serde`-deserializable shape
//! the rest of the node agrees on, plus the issuance assertion a loader
//! is required to make before handing a [`GenesisFile`] to this core.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Genesis format version this node accepts. Anything else is rejected.
pub const GENESIS_VERSION: u32 = 4;

/// Total token issuance, a protocol constant every genesis file must
/// respect: `Σ balances + Σ stakes ≤ TOTAL_SUPPLY`.
pub const TOTAL_SUPPLY: u128 = 11_529_975_000_000_000_000;

/// Errors raised while validating an already-parsed genesis file.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GenesisError {
    /// `version` did not match [`GENESIS_VERSION`].
    #[error("unsupported genesis version {found}, expected {GENESIS_VERSION}")]
    UnsupportedVersion {
        /// The version actually present in the file.
        found: u32,
    },
    /// `Σ balances + Σ stakes` exceeded [`TOTAL_SUPPLY`].
    #[error("genesis issuance {total} exceeds total supply {TOTAL_SUPPLY}")]
    IssuanceExceeded {
        /// The sum of every account balance and stake.
        total: u128,
    },
}

/// A single funded account in the genesis accounts table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisAccount {
    /// Account address, hex or base64-encoded per the loader's convention.
    pub address: String,
    /// Opening balance, in the smallest denomination.
    pub balance: u128,
    /// Opening stake, in the smallest denomination.
    pub stake: u128,
    /// Opaque deed payload (e.g. a synergetic contract deployment); only
    /// round-tripped by this core, never interpreted.
    #[serde(default)]
    pub deed: Option<serde_json::Value>,
}

/// A single staker entry in the genesis consensus table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisStaker {
    /// Base64-encoded identity public key.
    pub identity: String,
    /// Opening stake amount for this identity.
    pub amount: u128,
}

/// Genesis consensus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisConsensus {
    /// Maximum cabinet size for stake-weighted block production.
    #[serde(rename = "cabinetSize")]
    pub cabinet_size: usize,
    /// Chain start time, Unix seconds.
    #[serde(rename = "startTime")]
    pub start_time: u64,
    /// Initial stakers.
    pub stakers: Vec<GenesisStaker>,
}

/// The JSON v4 genesis file shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisFile {
    /// Must equal [`GENESIS_VERSION`].
    pub version: u32,
    /// Funded accounts.
    pub accounts: Vec<GenesisAccount>,
    /// Initial consensus configuration.
    pub consensus: GenesisConsensus,
}

impl GenesisFile {
    /// Check the version tag and the total-issuance bound. Does not
    /// touch the filesystem or interpret `deed` payloads.
    pub fn validate(&self) -> Result<(), GenesisError> {
        if self.version != GENESIS_VERSION {
            return Err(GenesisError::UnsupportedVersion { found: self.version });
        }

        let total: u128 = self
            .accounts
            .iter()
            .map(|a| a.balance + a.stake)
            .sum();
        if total > TOTAL_SUPPLY {
            return Err(GenesisError::IssuanceExceeded { total });
        }

        Ok(())
    }
}
