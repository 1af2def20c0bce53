//! Integer pixel geometry for the split canvas.
//!
//! Every produced dimension is even so the engine can encode yuv420p.

use serde::{Deserialize, Serialize};

use crate::error::InputError;
use crate::manifest::CellRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn origin(&self) -> Point {
        Point { x: self.x, y: self.y }
    }
}

/// A region of the canvas a single clip is fitted into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub role: CellRole,
    pub rect: Rect,
}

/// Canvas with two full-width cells stacked vertically
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasLayout {
    pub name: String,
    pub canvas: Size,
    pub fps: u32,
    pub top: Cell,
    pub bottom: Cell,
}

impl CanvasLayout {
    /// Top height is `round(height * split_ratio)` floored to even; bottom takes the rest
    pub fn vertical_split(canvas: Size, fps: u32, split_ratio: f64) -> Result<Self, InputError> {
        let invalid = |details: String| InputError::InvalidMetadata {
            asset_id: "canvas".to_string(),
            details,
        };

        if canvas.width < 2 || canvas.height < 4 || canvas.width % 2 != 0 || canvas.height % 2 != 0 {
            return Err(invalid(format!(
                "canvas must be even-sized, got {}x{}",
                canvas.width, canvas.height
            )));
        }

        let top_height = even_floor((canvas.height as f64 * split_ratio).round() as u32)
            .clamp(2, canvas.height - 2);
        let bottom_height = canvas.height - top_height;

        Ok(Self {
            name: super::VERTICAL_SPLIT.to_string(),
            canvas,
            fps,
            top: Cell {
                role: CellRole::Top,
                rect: Rect { x: 0, y: 0, width: canvas.width, height: top_height },
            },
            bottom: Cell {
                role: CellRole::Bottom,
                rect: Rect { x: 0, y: top_height, width: canvas.width, height: bottom_height },
            },
        })
    }

    pub fn cell(&self, role: CellRole) -> &Cell {
        match role {
            CellRole::Top => &self.top,
            CellRole::Bottom => &self.bottom,
        }
    }
}

/// Resolved per-clip transform, in the order the engine applies it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ReframeGeometry {
    /// Centre-crop the source to the cell aspect, then scale to the cell
    CropFill { crop: Rect, scale: Size },
    /// Cover-scale the source (times the zoom factor), then centre-crop to the cell
    Zoom { scale: Size, crop: Rect },
    /// Fit the source inside the cell over a blurred, cover-scaled copy of itself
    BlurPad {
        background_scale: Size,
        background_crop: Rect,
        foreground_scale: Size,
        offset: Point,
    },
}

pub fn even_floor(value: u32) -> u32 {
    value & !1
}

pub fn even_ceil(value: u32) -> u32 {
    value + (value & 1)
}

/// Largest centred window of `source` with the aspect of `target`
pub fn center_crop_to_aspect(source: Size, target: Size) -> Rect {
    let (sw, sh) = (source.width as u64, source.height as u64);
    let (tw, th) = (target.width as u64, target.height as u64);

    let (width, height) = if sw * th > tw * sh {
        // Source is wider: keep full height
        let w = div_round(sh * tw, th).min(sw) as u32;
        (even_floor(w), even_floor(source.height))
    } else {
        let h = div_round(sw * th, tw).min(sh) as u32;
        (even_floor(source.width), even_floor(h))
    };
    let (width, height) = (width.max(2), height.max(2));

    Rect {
        x: source.width.saturating_sub(width) / 2,
        y: source.height.saturating_sub(height) / 2,
        width,
        height,
    }
}

/// Smallest even size that covers `target` while keeping the source aspect
pub fn cover_scale(source: Size, target: Size, factor: f64) -> Size {
    let (sw, sh) = (source.width as u64, source.height as u64);
    let (tw, th) = (target.width as u64, target.height as u64);

    let (mut width, mut height) = if sw * th >= tw * sh {
        (div_ceil(sw * th, sh), th)
    } else {
        (tw, div_ceil(sh * tw, sw))
    };
    if factor > 1.0 {
        width = (width as f64 * factor).ceil() as u64;
        height = (height as f64 * factor).ceil() as u64;
    }

    Size::new(even_ceil(width as u32), even_ceil(height as u32))
}

/// Largest even size that fits inside `target` while keeping the source aspect
pub fn fit_scale(source: Size, target: Size) -> Size {
    let (sw, sh) = (source.width as u64, source.height as u64);
    let (tw, th) = (target.width as u64, target.height as u64);

    let (width, height) = if sw * th >= tw * sh {
        (tw, div_round(sh * tw, sw))
    } else {
        (div_round(sw * th, sh), th)
    };

    Size::new(
        even_floor(width as u32).clamp(2, target.width),
        even_floor(height as u32).clamp(2, target.height),
    )
}

fn div_ceil(num: u64, den: u64) -> u64 {
    (num + den - 1) / den
}

fn div_round(num: u64, den: u64) -> u64 {
    (num * 2 + den) / (den * 2)
}

/// Window of size `inner` centred in `outer`
pub fn centered(outer: Size, inner: Size) -> Rect {
    Rect {
        x: outer.width.saturating_sub(inner.width) / 2,
        y: outer.height.saturating_sub(inner.height) / 2,
        width: inner.width,
        height: inner.height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertical_split_default() {
        let layout = CanvasLayout::vertical_split(Size::new(1080, 1920), 30, 0.5).unwrap();
        assert_eq!(layout.top.rect, Rect { x: 0, y: 0, width: 1080, height: 960 });
        assert_eq!(layout.bottom.rect, Rect { x: 0, y: 960, width: 1080, height: 960 });
    }

    #[test]
    fn test_vertical_split_uneven_ratio_stays_even() {
        let layout = CanvasLayout::vertical_split(Size::new(1080, 1920), 30, 0.6).unwrap();
        assert_eq!(layout.top.rect.height, 1152);
        assert_eq!(layout.bottom.rect.height, 768);

        let layout = CanvasLayout::vertical_split(Size::new(720, 1280), 30, 0.333).unwrap();
        assert_eq!(layout.top.rect.height % 2, 0);
        assert_eq!(layout.top.rect.height + layout.bottom.rect.height, 1280);
    }

    #[test]
    fn test_odd_canvas_rejected() {
        assert!(CanvasLayout::vertical_split(Size::new(1081, 1920), 30, 0.5).is_err());
    }

    #[test]
    fn test_center_crop_wide_source() {
        let crop = center_crop_to_aspect(Size::new(1920, 1080), Size::new(1080, 960));
        assert_eq!(crop.height, 1080);
        assert_eq!(crop.width, 1214); // round(1215) floored to even
        assert_eq!(crop.x, (1920 - 1214) / 2);
        assert_eq!(crop.y, 0);
    }

    #[test]
    fn test_center_crop_tall_source() {
        let crop = center_crop_to_aspect(Size::new(1080, 1920), Size::new(1080, 960));
        assert_eq!((crop.width, crop.height), (1080, 960));
        assert_eq!((crop.x, crop.y), (0, 480));
    }

    #[test]
    fn test_cover_and_fit_scale() {
        let cover = cover_scale(Size::new(1920, 1080), Size::new(1080, 960), 1.0);
        assert!(cover.width >= 1080 && cover.height >= 960);
        assert_eq!(cover, Size::new(1708, 960));

        let fit = fit_scale(Size::new(1920, 1080), Size::new(1080, 960));
        assert_eq!(fit.width, 1080);
        assert_eq!(fit.height, 608);

        let zoomed = cover_scale(Size::new(1920, 1080), Size::new(1080, 960), 1.5);
        assert_eq!(zoomed.height, 1440);
    }
}
