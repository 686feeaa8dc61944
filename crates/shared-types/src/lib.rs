//! # Shared Types
//!
//! The domain entities shared by every crate in the workspace: [`Block`] and
//! its constituents, the stake record, and the chain-sync wire format. This
//! is the single source of truth for cross-crate types, matching the role
//! `shared-types` plays for the rest of the node.

pub mod entities;
pub mod errors;

pub use entities::*;
pub use errors::*;
