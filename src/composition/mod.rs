//! # Composition Planning
//!
//! Turns a manifest entry into a concrete render plan: cell geometry on the
//! split canvas, a reframe strategy per clip and the audio mix instructions.

pub mod geometry;
pub mod planner;

/// The only layout template currently supported
pub const VERTICAL_SPLIT: &str = "vertical_split";

// Re-exports for convenience
pub use geometry::{CanvasLayout, Cell, Point, Rect, ReframeGeometry, Size};
pub use planner::{
    AudioMixPlan, AudioSource, BlurSettings, CellPlan, CompositionPlanner, DurationMode,
    RenderPlan,
};
