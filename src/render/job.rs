use std::path::PathBuf;

use crate::audio::GainPlan;
use crate::composition::{BlurSettings, Point, Rect, ReframeGeometry, RenderPlan, Size};
use crate::config::{CanvasConfig, RenderConfig};
use crate::manifest::CellRole;

/// A single video filter step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoOp {
    Crop(Rect),
    Scale(Size),
    BoxBlur { radius: u32, power: u32 },
}

/// Filter chain for one cell, fed by one input
#[derive(Debug, Clone, PartialEq)]
pub struct CellGraph {
    pub role: CellRole,
    pub input_index: usize,
    pub source: PathBuf,
    pub cell_size: Size,
    /// Cell origin on the canvas
    pub placement: Point,
    /// Blurred backdrop filling the whole cell (blur-pad only)
    pub background: Option<Vec<VideoOp>>,
    pub foreground: Vec<VideoOp>,
    /// Foreground position inside the cell
    pub foreground_offset: Point,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioInput {
    pub role: CellRole,
    pub input_index: usize,
    pub gain_db: f64,
}

/// Gains applied per input and after the mix
#[derive(Debug, Clone, PartialEq)]
pub struct AudioMix {
    pub inputs: Vec<AudioInput>,
    pub output_gain_db: f64,
    pub sample_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSettings {
    pub video_codec: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub crf: u8,
    pub fps: u32,
}

impl EncodeSettings {
    pub fn from_config(canvas: &CanvasConfig, render: &RenderConfig) -> Self {
        Self {
            video_codec: render.video_codec.clone(),
            audio_codec: render.audio_codec.clone(),
            audio_bitrate: render.audio_bitrate.clone(),
            crf: render.crf,
            fps: canvas.fps,
        }
    }
}

/// Engine-agnostic description of one composite render
#[derive(Debug, Clone, PartialEq)]
pub struct RenderJob {
    pub pair_id: String,
    pub canvas: Size,
    pub duration: f64,
    /// Top cell first
    pub cells: Vec<CellGraph>,
    /// `None` renders without an audio stream
    pub audio: Option<AudioMix>,
    pub encode: EncodeSettings,
}

impl RenderJob {
    pub fn build(
        plan: &RenderPlan,
        gains: Option<&GainPlan>,
        mix_sample_rate: u32,
        encode: EncodeSettings,
    ) -> Self {
        let cells = plan
            .cells
            .iter()
            .enumerate()
            .map(|(input_index, cell)| {
                let (background, foreground, foreground_offset) =
                    cell_ops(&cell.geometry, plan.blur);
                CellGraph {
                    role: cell.role,
                    input_index,
                    source: cell.source.path.clone(),
                    cell_size: cell.cell.rect.size(),
                    placement: cell.cell.rect.origin(),
                    background,
                    foreground,
                    foreground_offset,
                }
            })
            .collect::<Vec<_>>();

        // Only tracks that made it into the gain plan are mixed
        let audio = gains.filter(|g| !g.tracks.is_empty()).map(|gains| AudioMix {
            inputs: gains
                .tracks
                .iter()
                .filter_map(|track| {
                    cells.iter().find(|c| c.role == track.role).map(|c| AudioInput {
                        role: track.role,
                        input_index: c.input_index,
                        gain_db: track.gain_db,
                    })
                })
                .collect(),
            output_gain_db: gains.output_gain_db,
            sample_rate: mix_sample_rate,
        });

        Self {
            pair_id: plan.pair_id.clone(),
            canvas: plan.layout.canvas,
            duration: plan.duration,
            cells,
            audio,
            encode,
        }
    }
}

fn cell_ops(
    geometry: &ReframeGeometry,
    blur: BlurSettings,
) -> (Option<Vec<VideoOp>>, Vec<VideoOp>, Point) {
    match *geometry {
        ReframeGeometry::CropFill { crop, scale } => {
            (None, vec![VideoOp::Crop(crop), VideoOp::Scale(scale)], Point::default())
        }
        ReframeGeometry::Zoom { scale, crop } => {
            (None, vec![VideoOp::Scale(scale), VideoOp::Crop(crop)], Point::default())
        }
        ReframeGeometry::BlurPad {
            background_scale,
            background_crop,
            foreground_scale,
            offset,
        } => (
            Some(vec![
                VideoOp::Scale(background_scale),
                VideoOp::Crop(background_crop),
                VideoOp::BoxBlur {
                    radius: blur.radius,
                    power: blur.power,
                },
            ]),
            vec![VideoOp::Scale(foreground_scale)],
            offset,
        ),
    }
}
