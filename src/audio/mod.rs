//! # Audio Loudness Module
//!
//! Decodes the audio tracks of paired clips, measures them per ITU-R BS.1770
//! and derives the gains that bring the mixdown to the loudness target.
//!
//! ## Core Features
//!
//! - **Decoding**: hound for WAV, Symphonia for compressed audio and video containers
//! - **Metering**: K-weighted, gated integrated loudness and 4x oversampled true peak
//! - **Normalization**: per-track gain, mix re-measurement and a peak-safe output gain
//!
//! ## Usage
//!
//! ```rust,no_run
//! use split_compositor::audio::{AudioLoader, LoudnessMeter};
//!
//! # fn main() -> anyhow::Result<()> {
//! let audio = AudioLoader::load("clip.mp4")?;
//! let measurement = LoudnessMeter::new().measure(&audio)?;
//!
//! println!("Integrated: {:?} LUFS", measurement.integrated_lufs);
//! println!("True peak: {:.1} dBTP", measurement.true_peak_dbtp);
//! # Ok(())
//! # }
//! ```

pub mod loader;
pub mod meter;
pub mod normalizer;
pub mod types;

pub use loader::AudioLoader;
pub use meter::LoudnessMeter;
pub use normalizer::LoudnessNormalizer;
pub use types::{
    AudioData, AudioFormat, GainPlan, LoudnessMeasurement, LoudnessReport, TrackGain,
    SILENCE_FLOOR_DB,
};
