//! # Split-Compositor
//!
//! Pair normalized clips into vertical split-screen shorts, reframe each clip
//! into its half of the canvas and deliver a loudness-normalized audio mix.
//!
//! The workflow has two stages that hand off through a persisted manifest:
//! pairing consumes catalog assets exactly once, and rendering drives every
//! manifest entry to a finished file, safely across restarts.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use split_compositor::{
//!     catalog::CatalogLoader,
//!     composition::CompositionPlanner,
//!     config::Config,
//!     manifest::ManifestStore,
//!     pairing::PairGenerator,
//!     render::{FfmpegEngine, RenderInvoker, RenderPipeline},
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let config = Config::default();
//! let catalog = CatalogLoader::new().load("clips/").await?;
//! let store = Arc::new(ManifestStore::open("manifest.json", config.render.max_retries).await?);
//!
//! let planner = CompositionPlanner::from_config(&config)?;
//! let generator = PairGenerator::new(config.pairing.sort_key);
//! store
//!     .pair_catalog(&catalog, &generator, &planner, &config.render.output_dir)
//!     .await?;
//!
//! let engine = Arc::new(FfmpegEngine::new(&config.render.ffmpeg_path));
//! let invoker = RenderInvoker::new(engine, &config)?;
//! let summary = RenderPipeline::new(invoker, config.render.concurrency)
//!     .run(store)
//!     .await?;
//! println!("{} rendered, {} failed", summary.rendered, summary.failed.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`catalog`] - Asset metadata from JSON or an ffprobe directory scan
//! - [`pairing`] - Deterministic pairing and the asset usage ledger
//! - [`manifest`] - The persisted, locked combination manifest
//! - [`composition`] - Canvas layout, reframe decisions and render plans
//! - [`audio`] - BS.1770 loudness measurement and gain planning
//! - [`render`] - Engine abstraction, FFmpeg engine and the render pipeline
//! - [`config`] - Configuration management
//!
//! ## Custom Engines
//!
//! Any backend can render jobs by implementing [`RenderEngine`](render::RenderEngine):
//!
//! ```rust,no_run
//! use std::path::Path;
//! use async_trait::async_trait;
//! use split_compositor::error::EngineError;
//! use split_compositor::render::{RenderEngine, RenderJob};
//!
//! struct MyEngine;
//!
//! #[async_trait]
//! impl RenderEngine for MyEngine {
//!     fn name(&self) -> &str {
//!         "my_engine"
//!     }
//!
//!     async fn render(&self, job: &RenderJob, output: &Path) -> Result<(), EngineError> {
//!         // Write the composite for `job` to `output`
//!         Ok(())
//!     }
//! }
//! ```

pub mod audio;
pub mod catalog;
pub mod composition;
pub mod config;
pub mod error;
pub mod manifest;
pub mod pairing;
pub mod render;

// Re-export commonly used types for convenience
pub use crate::{
    catalog::{AssetCatalog, VideoAsset},
    composition::CompositionPlanner,
    config::Config,
    error::{CompositorError, Result},
    manifest::ManifestStore,
    render::{RenderEngine, RenderInvoker, RenderPipeline},
};
