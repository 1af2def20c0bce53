use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::manifest::CellRole;

/// Level reported for digital silence (dB)
pub const SILENCE_FLOOR_DB: f64 = -144.0;

/// Raw audio data with metadata
#[derive(Debug, Clone)]
pub struct AudioData {
    /// Audio samples (interleaved for stereo, mono for single channel)
    pub samples: Vec<f32>,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Number of channels (1 = mono, 2 = stereo)
    pub channels: u16,

    /// Duration in seconds
    pub duration: f64,

    /// Original file path
    pub file_path: PathBuf,

    /// Audio format information
    pub format: AudioFormat,
}

impl AudioData {
    /// Build from interleaved samples that did not come from a file
    pub fn from_samples(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        let frames = samples.len() / channels.max(1) as usize;
        Self {
            duration: frames as f64 / sample_rate as f64,
            samples,
            sample_rate,
            channels,
            file_path: PathBuf::new(),
            format: AudioFormat {
                extension: "raw".to_string(),
                bit_depth: Some(32),
                compression: None,
            },
        }
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Mono is duplicated, extra channels are folded into left/right
    pub fn to_stereo(&self) -> AudioData {
        let samples = match self.channels {
            2 => self.samples.clone(),
            1 => self.samples.iter().flat_map(|&s| [s, s]).collect(),
            n => {
                let n = n as usize;
                let mut out = Vec::with_capacity(self.frames() * 2);
                for frame in self.samples.chunks_exact(n) {
                    let (mut left, mut right) = (0.0f32, 0.0f32);
                    for (i, &s) in frame.iter().enumerate() {
                        if i % 2 == 0 {
                            left += s;
                        } else {
                            right += s;
                        }
                    }
                    let per_side = (n as f32 / 2.0).max(1.0);
                    out.push(left / per_side);
                    out.push(right / per_side);
                }
                out
            }
        };

        AudioData {
            samples,
            channels: 2,
            ..self.clone()
        }
    }

    /// Linear-interpolation resample to `target_rate`
    pub fn resample(&self, target_rate: u32) -> AudioData {
        if target_rate == self.sample_rate || self.samples.is_empty() {
            return AudioData {
                sample_rate: target_rate,
                ..self.clone()
            };
        }

        let channels = self.channels.max(1) as usize;
        let in_frames = self.frames();
        let ratio = self.sample_rate as f64 / target_rate as f64;
        let out_frames = ((in_frames as f64) / ratio).floor() as usize;

        let mut samples = Vec::with_capacity(out_frames * channels);
        for i in 0..out_frames {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            let frac = (pos - idx as f64) as f32;
            let next = (idx + 1).min(in_frames - 1);
            for ch in 0..channels {
                let a = self.samples[idx * channels + ch];
                let b = self.samples[next * channels + ch];
                samples.push(a + (b - a) * frac);
            }
        }

        AudioData {
            samples,
            sample_rate: target_rate,
            duration: out_frames as f64 / target_rate as f64,
            ..self.clone()
        }
    }
}

/// Audio file format information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioFormat {
    /// File extension (wav, mp4, flac, etc.)
    pub extension: String,

    /// Bit depth (16, 24, 32, etc.)
    pub bit_depth: Option<u16>,

    /// Compression type (if any)
    pub compression: Option<String>,
}

/// BS.1770 measurement of one signal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoudnessMeasurement {
    /// Gated integrated loudness; `None` when every block falls below the absolute gate
    pub integrated_lufs: Option<f64>,

    /// 4x oversampled peak (dBTP)
    pub true_peak_dbtp: f64,
}

impl LoudnessMeasurement {
    pub fn silent() -> Self {
        Self {
            integrated_lufs: None,
            true_peak_dbtp: SILENCE_FLOOR_DB,
        }
    }

    pub fn is_silent(&self) -> bool {
        self.integrated_lufs.is_none()
    }
}

/// Gain applied to one source track before mixing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackGain {
    pub role: CellRole,
    pub measured: LoudnessMeasurement,
    pub gain_db: f64,
}

/// Output of the measure-then-apply pass
#[derive(Debug, Clone, PartialEq)]
pub struct GainPlan {
    pub target_lufs: f64,
    pub tracks: Vec<TrackGain>,
    /// Mix of the gained tracks before the output gain
    pub mixed: LoudnessMeasurement,
    pub output_gain_db: f64,
    /// Output gain was reduced to respect the true-peak ceiling
    pub peak_limited: bool,
}

impl GainPlan {
    pub fn track_gain(&self, role: CellRole) -> Option<f64> {
        self.tracks.iter().find(|t| t.role == role).map(|t| t.gain_db)
    }

    /// Expected loudness of the rendered audio
    pub fn predicted_lufs(&self) -> Option<f64> {
        self.mixed.integrated_lufs.map(|l| l + self.output_gain_db)
    }

    pub fn predicted_true_peak_dbtp(&self) -> f64 {
        self.mixed.true_peak_dbtp + self.output_gain_db
    }

    pub fn report(&self) -> LoudnessReport {
        LoudnessReport {
            target_lufs: self.target_lufs,
            output_gain_db: self.output_gain_db,
            predicted_lufs: self.predicted_lufs(),
            predicted_true_peak_dbtp: self.predicted_true_peak_dbtp(),
            peak_limited: self.peak_limited,
            tracks: self.tracks.clone(),
        }
    }
}

/// Loudness summary recorded on a rendered manifest entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoudnessReport {
    pub target_lufs: f64,
    pub output_gain_db: f64,
    pub predicted_lufs: Option<f64>,
    pub predicted_true_peak_dbtp: f64,
    pub peak_limited: bool,
    pub tracks: Vec<TrackGain>,
}
