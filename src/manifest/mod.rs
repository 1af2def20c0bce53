//! # Combination Manifest
//!
//! The persisted record of pairs, their resolved composition parameters and
//! their render status. It also holds the asset usage ledger so both change in
//! one atomic write.

pub mod store;
pub mod types;

pub use store::ManifestStore;
pub use types::{
    output_path_for, AssetRef, CellRole, CellSizes, CombinationManifest, CombinationPair, EntryFailure,
    EntryStatus, FailureKind, ManifestEntry, ReframeAssignment, ReframeStrategy,
    MANIFEST_VERSION,
};
