use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{InputError, Result};
use crate::pairing::AssetUsageLedger;

/// Processing flags set by the upstream normalization stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetFlags {
    /// Clip has been through the normalization stage
    pub normalized: bool,

    /// Clip carries an audio stream
    pub has_audio: bool,
}

impl Default for AssetFlags {
    fn default() -> Self {
        Self {
            normalized: true,
            has_audio: true,
        }
    }
}

/// A normalized clip with the technical metadata needed for planning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoAsset {
    /// Stable identifier (the file stem for scanned directories)
    pub id: String,

    /// Path to the clip
    pub path: PathBuf,

    /// Duration in seconds
    pub duration: f64,

    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    /// Upstream source identifier (channel, video id...)
    #[serde(default)]
    pub source: Option<String>,

    #[serde(default)]
    pub flags: AssetFlags,
}

impl VideoAsset {
    pub fn new<S: Into<String>, P: Into<PathBuf>>(
        id: S,
        path: P,
        duration: f64,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            duration,
            width,
            height,
            source: None,
            flags: AssetFlags::default(),
        }
    }

    /// Width over height
    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            return 0.0;
        }
        self.width as f64 / self.height as f64
    }

    /// Check that the metadata is usable for planning
    pub fn validate(&self) -> std::result::Result<(), InputError> {
        let invalid = |details: &str| InputError::InvalidMetadata {
            asset_id: self.id.clone(),
            details: details.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("empty id"));
        }
        if self.width == 0 || self.height == 0 {
            return Err(invalid("zero width or height"));
        }
        if !self.duration.is_finite() || self.duration <= 0.0 {
            return Err(invalid("duration must be positive"));
        }
        Ok(())
    }
}

/// Read-only snapshot of the clips available for pairing
#[derive(Debug, Clone, Default)]
pub struct AssetCatalog {
    assets: BTreeMap<String, VideoAsset>,
}

impl AssetCatalog {
    /// Build a catalog, rejecting duplicate ids
    pub fn new(assets: Vec<VideoAsset>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for asset in assets {
            if map.contains_key(&asset.id) {
                return Err(InputError::DuplicateAsset { asset_id: asset.id }.into());
            }
            map.insert(asset.id.clone(), asset);
        }
        Ok(Self { assets: map })
    }

    /// Load a catalog from a JSON array of assets
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|_| InputError::AssetNotFound {
            path: path.display().to_string(),
        })?;
        let assets: Vec<VideoAsset> = serde_json::from_str(&content)?;
        Self::new(assets)
    }

    pub fn get(&self, id: &str) -> Option<&VideoAsset> {
        self.assets.get(id)
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Assets ordered by id
    pub fn iter(&self) -> impl Iterator<Item = &VideoAsset> {
        self.assets.values()
    }

    /// Assets that may be paired: normalized, valid metadata, not yet in the ledger
    pub fn eligible(&self, ledger: &AssetUsageLedger) -> Vec<&VideoAsset> {
        self.assets
            .values()
            .filter(|asset| {
                if ledger.contains(&asset.id) {
                    return false;
                }
                if !asset.flags.normalized {
                    debug!("Skipping '{}': not normalized", asset.id);
                    return false;
                }
                if let Err(e) = asset.validate() {
                    warn!("Skipping ineligible asset: {}", e);
                    return false;
                }
                true
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_aspect_ratio() {
        let asset = VideoAsset::new("a", "a.mp4", 10.0, 1920, 1080);
        assert!((asset.aspect_ratio() - 16.0 / 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = AssetCatalog::new(vec![
            VideoAsset::new("a", "a.mp4", 10.0, 1920, 1080),
            VideoAsset::new("a", "other/a.mp4", 12.0, 1080, 1920),
        ]);
        assert!(matches!(
            result,
            Err(crate::error::CompositorError::Input(InputError::DuplicateAsset { .. }))
        ));
    }

    #[test]
    fn test_eligible_filters_ledger_and_invalid() {
        let mut unnormalized = VideoAsset::new("c", "c.mp4", 8.0, 1080, 1080);
        unnormalized.flags.normalized = false;

        let catalog = AssetCatalog::new(vec![
            VideoAsset::new("a", "a.mp4", 10.0, 1920, 1080),
            VideoAsset::new("b", "b.mp4", 0.0, 1080, 1920),
            unnormalized,
            VideoAsset::new("d", "d.mp4", 5.0, 720, 1280),
            VideoAsset::new("e", "e.mp4", 5.0, 720, 1280),
        ])
        .unwrap();

        let mut ledger = AssetUsageLedger::new();
        ledger.insert_all(["e".to_string()]).unwrap();

        let ids: Vec<&str> = catalog.eligible(&ledger).iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "d"]);
    }

    #[test]
    fn test_catalog_from_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"[
                {"id": "A", "path": "clips/A.mp4", "duration": 10.0, "width": 1920, "height": 1080},
                {"id": "B", "path": "clips/B.mp4", "duration": 12.0, "width": 1080, "height": 1920,
                 "source": "channel-1", "flags": {"has_audio": false}}
            ]"#,
        )
        .unwrap();

        let catalog = AssetCatalog::from_json_file(&path).unwrap();
        assert_eq!(catalog.len(), 2);
        let b = catalog.get("B").unwrap();
        assert!(b.flags.normalized);
        assert!(!b.flags.has_audio);
        assert_eq!(b.source.as_deref(), Some("channel-1"));
    }
}
