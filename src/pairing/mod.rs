//! # Pairing
//!
//! Partitions eligible assets into disjoint top/bottom pairs and tracks which
//! assets have been consumed.

pub mod generator;
pub mod ledger;

pub use generator::{identity_hash, PairGenerator, PairingOutcome, SortKey};
pub use ledger::AssetUsageLedger;
