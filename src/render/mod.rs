//! # Render Module
//!
//! Turns manifest entries into finished composites. The [`RenderInvoker`]
//! owns the entry lifecycle (claim, normalize, render to a hidden temp file,
//! publish with a rename) and the [`RenderPipeline`] fans it out over the
//! manifest with bounded concurrency.
//!
//! Engines sit behind the [`RenderEngine`] trait; [`FfmpegEngine`] is the default.

pub mod engine;
pub mod ffmpeg;
pub mod invoker;
pub mod job;
pub mod pipeline;

pub use engine::RenderEngine;
pub use ffmpeg::FfmpegEngine;
pub use invoker::{output_is_valid, temp_output_path, EntryOutcome, OneOffOutcome, RenderInvoker};
pub use job::{AudioInput, AudioMix, CellGraph, EncodeSettings, RenderJob, VideoOp};
pub use pipeline::{FailedEntry, RenderPipeline, RunSummary};
