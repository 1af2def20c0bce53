use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

use crate::{
    composition::DurationMode,
    error::{ConfigError, Result},
    pairing::SortKey,
};

/// Main configuration for split-compositor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Output canvas and cell split
    #[serde(default)]
    pub canvas: CanvasConfig,

    /// Reframe decision thresholds
    #[serde(default)]
    pub reframe: ReframeConfig,

    /// Loudness target and peak ceiling
    #[serde(default)]
    pub loudness: LoudnessConfig,

    /// Render execution settings
    #[serde(default)]
    pub render: RenderConfig,

    /// Pairing settings
    #[serde(default)]
    pub pairing: PairingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound { path: path.display().to_string() })?;

        let config: Config = toml::from_str(&content)
            .map_err(|_| ConfigError::ParseFailed { path: path.display().to_string() })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::InvalidValue {
                key: "config".to_string(),
                value: e.to_string()
            })?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.canvas.validate()?;
        self.reframe.validate()?;
        self.loudness.validate()?;
        self.render.validate()?;
        self.pairing.validate()?;
        Ok(())
    }
}

fn invalid(key: &str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// Output canvas configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasConfig {
    /// Canvas width in pixels
    pub width: u32,

    /// Canvas height in pixels
    pub height: u32,

    /// Output frame rate
    pub fps: u32,

    /// Share of the canvas height given to the top cell (0.0-1.0)
    pub split_ratio: f64,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1920,
            fps: 30,
            split_ratio: 0.5,
        }
    }
}

impl CanvasConfig {
    fn validate(&self) -> Result<()> {
        if self.width == 0 || self.width % 2 != 0 {
            return Err(invalid("canvas.width", self.width).into());
        }

        if self.height < 4 || self.height % 2 != 0 {
            return Err(invalid("canvas.height", self.height).into());
        }

        if self.fps == 0 {
            return Err(invalid("canvas.fps", self.fps).into());
        }

        if !(self.split_ratio > 0.0 && self.split_ratio < 1.0) {
            return Err(invalid("canvas.split_ratio", self.split_ratio).into());
        }

        Ok(())
    }
}

/// Reframe decision configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReframeConfig {
    /// Relative aspect deviation accepted for crop-fill (0.05 = 5%)
    pub tolerance: f64,

    /// Largest share of either dimension a zoom may crop away
    pub zoom_limit: f64,

    /// Extra magnification applied by the zoom strategy
    pub zoom_factor: f64,

    /// Box blur radius for the blur-pad background
    pub blur_radius: u32,

    /// Box blur iterations for the blur-pad background
    pub blur_power: u32,
}

impl Default for ReframeConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.05,
            zoom_limit: 0.35,
            zoom_factor: 1.0,
            blur_radius: 20,
            blur_power: 10,
        }
    }
}

impl ReframeConfig {
    fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.tolerance) {
            return Err(invalid("reframe.tolerance", self.tolerance).into());
        }

        if !(0.0..1.0).contains(&self.zoom_limit) || self.zoom_limit < self.tolerance {
            return Err(invalid("reframe.zoom_limit", self.zoom_limit).into());
        }

        if !(1.0..=4.0).contains(&self.zoom_factor) {
            return Err(invalid("reframe.zoom_factor", self.zoom_factor).into());
        }

        if self.blur_radius == 0 {
            return Err(invalid("reframe.blur_radius", self.blur_radius).into());
        }

        Ok(())
    }
}

/// Loudness normalization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoudnessConfig {
    /// Integrated loudness target (LUFS)
    pub target_lufs: f64,

    /// True-peak ceiling (dBTP)
    pub peak_ceiling_dbtp: f64,

    /// Largest boost or cut applied to a single source track (dB)
    pub max_track_gain_db: f64,

    /// Sample rate the mix is measured and rendered at (Hz)
    pub mix_sample_rate: u32,
}

impl Default for LoudnessConfig {
    fn default() -> Self {
        Self {
            target_lufs: -14.0,
            peak_ceiling_dbtp: -1.0,
            max_track_gain_db: 20.0,
            mix_sample_rate: 48000,
        }
    }
}

impl LoudnessConfig {
    fn validate(&self) -> Result<()> {
        if !(-70.0..=0.0).contains(&self.target_lufs) {
            return Err(invalid("loudness.target_lufs", self.target_lufs).into());
        }

        if !(-20.0..=0.0).contains(&self.peak_ceiling_dbtp) {
            return Err(invalid("loudness.peak_ceiling_dbtp", self.peak_ceiling_dbtp).into());
        }

        if self.max_track_gain_db <= 0.0 {
            return Err(invalid("loudness.max_track_gain_db", self.max_track_gain_db).into());
        }

        if !(8000..=192000).contains(&self.mix_sample_rate) {
            return Err(invalid("loudness.mix_sample_rate", self.mix_sample_rate).into());
        }

        Ok(())
    }
}

/// Render execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Retryable failures tolerated per entry before it becomes permanent
    pub max_retries: u32,

    /// Number of entries rendered in parallel
    pub concurrency: usize,

    /// Per-render timeout in seconds
    pub timeout_secs: u64,

    /// Re-render entries that are already rendered
    pub force: bool,

    /// Directory that receives `{pair_id}.mp4` outputs
    pub output_dir: PathBuf,

    /// How the composite duration is derived from the two clips
    pub duration_mode: DurationMode,

    /// Video encoder passed to the engine
    pub video_codec: String,

    /// Audio encoder passed to the engine
    pub audio_codec: String,

    /// Audio bitrate passed to the engine
    pub audio_bitrate: String,

    /// Constant rate factor (0-51, lower is better)
    pub crf: u8,

    /// FFmpeg binary used by the default engine
    pub ffmpeg_path: PathBuf,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            concurrency: num_cpus::get(),
            timeout_secs: 600,
            force: false,
            output_dir: PathBuf::from("output"),
            duration_mode: DurationMode::default(),
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            audio_bitrate: "192k".to_string(),
            crf: 20,
            ffmpeg_path: PathBuf::from("ffmpeg"),
        }
    }
}

impl RenderConfig {
    fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(invalid("render.max_retries", self.max_retries).into());
        }

        if self.concurrency == 0 {
            return Err(invalid("render.concurrency", self.concurrency).into());
        }

        if self.timeout_secs == 0 {
            return Err(invalid("render.timeout_secs", self.timeout_secs).into());
        }

        if self.crf > 51 {
            return Err(invalid("render.crf", self.crf).into());
        }

        Ok(())
    }
}

/// Pairing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    /// Stable key eligible assets are sorted by before pairing
    pub sort_key: SortKey,

    /// Layout template recorded on new manifest entries
    pub layout_template: String,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            sort_key: SortKey::default(),
            layout_template: crate::composition::VERTICAL_SPLIT.to_string(),
        }
    }
}

impl PairingConfig {
    fn validate(&self) -> Result<()> {
        if self.layout_template != crate::composition::VERTICAL_SPLIT {
            return Err(invalid("pairing.layout_template", &self.layout_template).into());
        }
        Ok(())
    }
}
