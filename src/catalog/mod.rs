//! # Asset Catalog
//!
//! Read-only view of the normalized clips that may be paired. Catalogs come
//! either from a JSON file or from a directory scan probed with `ffprobe`.

pub mod loader;
pub mod types;

pub use loader::CatalogLoader;
pub use types::{AssetCatalog, AssetFlags, VideoAsset};
