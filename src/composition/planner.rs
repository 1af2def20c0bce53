use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::VideoAsset;
use crate::composition::geometry::{
    center_crop_to_aspect, centered, cover_scale, fit_scale, CanvasLayout, Cell, Point,
    ReframeGeometry, Size,
};
use crate::composition::VERTICAL_SPLIT;
use crate::config::Config;
use crate::error::{InputError, Result};
use crate::manifest::{
    AssetRef, CellRole, CellSizes, CombinationPair, EntryStatus, ManifestEntry, ReframeAssignment,
    ReframeStrategy,
};

/// How the composite duration is derived from the two clips
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationMode {
    /// Stop at the end of the shorter clip
    #[default]
    Shortest,
    /// Follow the top clip; the bottom cell holds its last frame
    Top,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlurSettings {
    pub radius: u32,
    pub power: u32,
}

/// One clip fitted into one cell
#[derive(Debug, Clone, PartialEq)]
pub struct CellPlan {
    pub role: CellRole,
    pub source: AssetRef,
    pub cell: Cell,
    pub strategy: ReframeStrategy,
    pub geometry: ReframeGeometry,
}

/// A track that contributes to the mixdown
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSource {
    pub role: CellRole,
    pub path: PathBuf,
}

/// Audio instructions: which tracks are mixed and the loudness they aim for
#[derive(Debug, Clone, PartialEq)]
pub struct AudioMixPlan {
    pub target_lufs: f64,
    pub sources: Vec<AudioSource>,
}

impl AudioMixPlan {
    pub fn is_silent(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Fully resolved composition for one entry. Recomputed on demand, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPlan {
    pub pair_id: String,
    pub layout: CanvasLayout,
    /// Top cell first
    pub cells: Vec<CellPlan>,
    pub duration: f64,
    pub blur: BlurSettings,
    pub audio: AudioMixPlan,
}

/// Resolves layout geometry, reframe strategy and loudness target for pairs
#[derive(Debug, Clone)]
pub struct CompositionPlanner {
    layout: CanvasLayout,
    tolerance_bp: u64,
    zoom_limit_bp: u64,
    zoom_factor: f64,
    blur: BlurSettings,
    target_lufs: f64,
    duration_mode: DurationMode,
    layout_template: String,
}

fn basis_points(fraction: f64) -> u64 {
    (fraction * 10_000.0).round().max(0.0) as u64
}

impl CompositionPlanner {
    pub fn from_config(config: &Config) -> Result<Self> {
        let layout = CanvasLayout::vertical_split(
            Size::new(config.canvas.width, config.canvas.height),
            config.canvas.fps,
            config.canvas.split_ratio,
        )?;

        Ok(Self {
            layout,
            tolerance_bp: basis_points(config.reframe.tolerance),
            zoom_limit_bp: basis_points(config.reframe.zoom_limit),
            zoom_factor: config.reframe.zoom_factor,
            blur: BlurSettings {
                radius: config.reframe.blur_radius,
                power: config.reframe.blur_power,
            },
            target_lufs: config.loudness.target_lufs,
            duration_mode: config.render.duration_mode,
            layout_template: config.pairing.layout_template.clone(),
        })
    }

    pub fn layout(&self) -> &CanvasLayout {
        &self.layout
    }

    pub fn target_lufs(&self) -> f64 {
        self.target_lufs
    }

    pub fn cell_sizes(&self) -> CellSizes {
        CellSizes {
            top: self.layout.cell(CellRole::Top).rect.size(),
            bottom: self.layout.cell(CellRole::Bottom).rect.size(),
        }
    }

    /// Pick a reframe strategy by exact integer comparison of the two aspects.
    ///
    /// With `a = sw*ch` and `b = cw*sh`, the relative aspect deviation is
    /// `|a-b| / b` and the share lost by a centre crop is `(max-min) / max`.
    /// Both thresholds are inclusive.
    pub fn decide(&self, source: Size, cell: Size) -> ReframeStrategy {
        let a = source.width as u64 * cell.height as u64;
        let b = cell.width as u64 * source.height as u64;
        let diff = a.abs_diff(b);

        if diff * 10_000 <= self.tolerance_bp * b {
            return ReframeStrategy::CropFill;
        }

        let larger = a.max(b);
        if diff * 10_000 <= self.zoom_limit_bp * larger {
            return ReframeStrategy::Zoom;
        }

        ReframeStrategy::BlurPad
    }

    /// Transform that realises `strategy` for a source inside a cell
    pub fn geometry(&self, strategy: ReframeStrategy, source: Size, cell: Size) -> ReframeGeometry {
        match strategy {
            ReframeStrategy::CropFill => ReframeGeometry::CropFill {
                crop: center_crop_to_aspect(source, cell),
                scale: cell,
            },
            ReframeStrategy::Zoom => {
                let scale = cover_scale(source, cell, self.zoom_factor);
                ReframeGeometry::Zoom {
                    scale,
                    crop: centered(scale, cell),
                }
            }
            ReframeStrategy::BlurPad => {
                let background_scale = cover_scale(source, cell, 1.0);
                let foreground_scale = fit_scale(source, cell);
                let inset = centered(cell, foreground_scale);
                ReframeGeometry::BlurPad {
                    background_scale,
                    background_crop: centered(background_scale, cell),
                    foreground_scale,
                    offset: Point { x: inset.x, y: inset.y },
                }
            }
        }
    }

    fn strategy_for(&self, asset: &AssetRef, role: CellRole) -> ReframeStrategy {
        let cell = self.layout.cell(role).rect.size();
        self.decide(Size::new(asset.width, asset.height), cell)
    }

    /// Resolve the persisted composition parameters for a new pair
    pub fn resolve_entry(
        &self,
        pair: CombinationPair,
        top: &VideoAsset,
        bottom: &VideoAsset,
        output_dir: &Path,
    ) -> Result<ManifestEntry> {
        top.validate()?;
        bottom.validate()?;

        let top = AssetRef::from(top);
        let bottom = AssetRef::from(bottom);
        let reframe = ReframeAssignment {
            top: self.strategy_for(&top, CellRole::Top),
            bottom: self.strategy_for(&bottom, CellRole::Bottom),
        };
        debug!(
            "{}: top '{}' -> {}, bottom '{}' -> {}",
            pair.pair_id, top.id, reframe.top, bottom.id, reframe.bottom
        );

        let output_path = pair.output_path(output_dir);
        Ok(ManifestEntry {
            pair,
            top,
            bottom,
            layout: self.layout_template.clone(),
            reframe,
            cells: Some(self.cell_sizes()),
            target_lufs: self.target_lufs,
            output_path,
            status: EntryStatus::Pending,
            retry_count: 0,
            last_error: None,
            loudness: None,
            updated_at: Utc::now(),
        })
    }

    /// Recompute the render plan from a manifest entry
    pub fn plan(&self, entry: &ManifestEntry) -> Result<RenderPlan> {
        if entry.layout != VERTICAL_SPLIT {
            return Err(InputError::UnknownLayout {
                layout: entry.layout.clone(),
            }
            .into());
        }

        // Recorded strategies only hold for the cells they were decided against
        if let Some(recorded) = entry.cells {
            let current = self.cell_sizes();
            if recorded != current {
                return Err(InputError::LayoutMismatch {
                    pair_id: entry.pair_id().to_string(),
                    details: format!(
                        "cells were {}x{} / {}x{}, now {}x{} / {}x{}",
                        recorded.top.width,
                        recorded.top.height,
                        recorded.bottom.width,
                        recorded.bottom.height,
                        current.top.width,
                        current.top.height,
                        current.bottom.width,
                        current.bottom.height
                    ),
                }
                .into());
            }
        }

        self.plan_assets(
            entry.pair_id(),
            &entry.top,
            &entry.bottom,
            entry.reframe,
            entry.target_lufs,
        )
    }

    /// Plan a pair outside the manifest; `None` strategies are decided automatically
    pub fn plan_one_off(
        &self,
        pair_id: &str,
        top: &AssetRef,
        bottom: &AssetRef,
        top_reframe: Option<ReframeStrategy>,
        bottom_reframe: Option<ReframeStrategy>,
        target_lufs: f64,
    ) -> Result<RenderPlan> {
        let reframe = ReframeAssignment {
            top: top_reframe.unwrap_or_else(|| self.strategy_for(top, CellRole::Top)),
            bottom: bottom_reframe.unwrap_or_else(|| self.strategy_for(bottom, CellRole::Bottom)),
        };
        self.plan_assets(pair_id, top, bottom, reframe, target_lufs)
    }

    fn plan_assets(
        &self,
        pair_id: &str,
        top: &AssetRef,
        bottom: &AssetRef,
        reframe: ReframeAssignment,
        target_lufs: f64,
    ) -> Result<RenderPlan> {
        let mut cells = Vec::with_capacity(2);
        for (role, asset) in [(CellRole::Top, top), (CellRole::Bottom, bottom)] {
            if asset.width == 0 || asset.height == 0 {
                return Err(InputError::InvalidMetadata {
                    asset_id: asset.id.clone(),
                    details: "zero width or height".to_string(),
                }
                .into());
            }
            let cell = *self.layout.cell(role);
            let strategy = reframe.get(role);
            let geometry =
                self.geometry(strategy, Size::new(asset.width, asset.height), cell.rect.size());
            debug!("{} {:?}: {:?}", pair_id, role, geometry);
            cells.push(CellPlan {
                role,
                source: asset.clone(),
                cell,
                strategy,
                geometry,
            });
        }

        let duration = match self.duration_mode {
            DurationMode::Shortest => top.duration.min(bottom.duration),
            DurationMode::Top => top.duration,
        };

        let sources = [(CellRole::Top, top), (CellRole::Bottom, bottom)]
            .into_iter()
            .filter(|(_, asset)| asset.has_audio)
            .map(|(role, asset)| AudioSource {
                role,
                path: asset.path.clone(),
            })
            .collect();

        Ok(RenderPlan {
            pair_id: pair_id.to_string(),
            layout: self.layout.clone(),
            cells,
            duration,
            blur: self.blur,
            audio: AudioMixPlan {
                target_lufs,
                sources,
            },
        })
    }
}
