use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::audio::LoudnessReport;
use crate::catalog::VideoAsset;
use crate::composition::Size;
use crate::error::ManifestError;
use crate::pairing::AssetUsageLedger;

pub const MANIFEST_VERSION: u32 = 1;

/// Two disjoint assets assigned to the top and bottom cells
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinationPair {
    pub pair_id: String,
    pub top: String,
    pub bottom: String,
    pub created_at: DateTime<Utc>,
}

impl CombinationPair {
    pub fn new(top: &str, bottom: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            pair_id: Self::pair_id_for(top, bottom),
            top: top.to_string(),
            bottom: bottom.to_string(),
            created_at,
        }
    }

    /// `pair_{top}{bottom}` with file-system-unsafe characters replaced
    pub fn pair_id_for(top: &str, bottom: &str) -> String {
        let sanitize = |id: &str| -> String {
            id.chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
                .collect()
        };
        format!("pair_{}{}", sanitize(top), sanitize(bottom))
    }

    /// The plain id plus a short hash of both asset ids, for when the plain id is taken.
    ///
    /// Plain ids are not unique: `("1", "23")` and `("12", "3")` both give `pair_123`.
    pub fn disambiguated_id_for(top: &str, bottom: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(top.as_bytes());
        hasher.update([0u8]);
        hasher.update(bottom.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        format!("{}_{}", Self::pair_id_for(top, bottom), &digest[..8])
    }

    pub fn disambiguate(&mut self) {
        self.pair_id = Self::disambiguated_id_for(&self.top, &self.bottom);
    }

    /// Canonical render target, derived only from the pair id
    pub fn output_path(&self, output_dir: &Path) -> PathBuf {
        output_path_for(&self.pair_id, output_dir)
    }
}

pub fn output_path_for(pair_id: &str, output_dir: &Path) -> PathBuf {
    output_dir.join(format!("{}.mp4", pair_id))
}

/// How a clip is fitted into its cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReframeStrategy {
    CropFill,
    Zoom,
    BlurPad,
}

impl ReframeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReframeStrategy::CropFill => "crop_fill",
            ReframeStrategy::Zoom => "zoom",
            ReframeStrategy::BlurPad => "blur_pad",
        }
    }
}

impl fmt::Display for ReframeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which cell of the split layout a clip occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellRole {
    Top,
    Bottom,
}

/// Per-cell reframe decision recorded on an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReframeAssignment {
    pub top: ReframeStrategy,
    pub bottom: ReframeStrategy,
}

impl ReframeAssignment {
    pub fn get(&self, role: CellRole) -> ReframeStrategy {
        match role {
            CellRole::Top => self.top,
            CellRole::Bottom => self.bottom,
        }
    }
}

/// The metadata of an asset that planning needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRef {
    pub id: String,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub duration: f64,
    #[serde(default = "default_true")]
    pub has_audio: bool,
}

fn default_true() -> bool {
    true
}

impl From<&VideoAsset> for AssetRef {
    fn from(asset: &VideoAsset) -> Self {
        Self {
            id: asset.id.clone(),
            path: asset.path.clone(),
            width: asset.width,
            height: asset.height,
            duration: asset.duration,
            has_audio: asset.flags.has_audio,
        }
    }
}

/// Render lifecycle of a manifest entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    #[default]
    Pending,
    Rendering,
    Rendered,
    FailedRetryable,
    FailedPermanent,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Rendering => "rendering",
            EntryStatus::Rendered => "rendered",
            EntryStatus::FailedRetryable => "failed_retryable",
            EntryStatus::FailedPermanent => "failed_permanent",
        }
    }

    /// No further transitions without a force directive
    pub fn is_terminal(&self) -> bool {
        matches!(self, EntryStatus::Rendered | EntryStatus::FailedPermanent)
    }

    pub fn can_transition_to(&self, next: EntryStatus) -> bool {
        use EntryStatus::*;
        matches!(
            (self, next),
            (Pending, Rendering)
                | (FailedRetryable, Rendering)
                | (Rendering, Rendered)
                | (Rendering, FailedRetryable)
                | (Rendering, FailedPermanent)
        )
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a failed render attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Transient,
    Permanent,
    Input,
    Normalization,
    Interrupted,
}

impl FailureKind {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::Timeout
                | FailureKind::Transient
                | FailureKind::Normalization
                | FailureKind::Interrupted
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryFailure {
    pub kind: FailureKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Cell sizes the reframe strategies were decided against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellSizes {
    pub top: Size,
    pub bottom: Size,
}

impl CellSizes {
    pub fn get(&self, role: CellRole) -> Size {
        match role {
            CellRole::Top => self.top,
            CellRole::Bottom => self.bottom,
        }
    }
}

/// One pair plus its resolved composition parameters and render state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub pair: CombinationPair,
    pub top: AssetRef,
    pub bottom: AssetRef,
    pub layout: String,
    pub reframe: ReframeAssignment,
    /// Absent in manifests written before cell sizes were recorded
    #[serde(default)]
    pub cells: Option<CellSizes>,
    pub target_lufs: f64,
    pub output_path: PathBuf,
    #[serde(default)]
    pub status: EntryStatus,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub last_error: Option<EntryFailure>,
    #[serde(default)]
    pub loudness: Option<LoudnessReport>,
    pub updated_at: DateTime<Utc>,
}

impl ManifestEntry {
    pub fn pair_id(&self) -> &str {
        &self.pair.pair_id
    }

    pub fn asset(&self, role: CellRole) -> &AssetRef {
        match role {
            CellRole::Top => &self.top,
            CellRole::Bottom => &self.bottom,
        }
    }

    /// Pending entries, and retryable failures that still have budget, may be claimed
    pub fn is_claimable(&self, max_retries: u32) -> bool {
        match self.status {
            EntryStatus::Pending => true,
            EntryStatus::FailedRetryable => self.retry_count < max_retries,
            _ => false,
        }
    }

    fn transition(&mut self, next: EntryStatus) -> Result<(), ManifestError> {
        if !self.status.can_transition_to(next) {
            return Err(ManifestError::InvalidTransition {
                pair_id: self.pair.pair_id.clone(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Move to `rendering` before any work starts
    pub fn claim(&mut self, max_retries: u32) -> Result<(), ManifestError> {
        if !self.is_claimable(max_retries) {
            return Err(ManifestError::InvalidTransition {
                pair_id: self.pair.pair_id.clone(),
                from: self.status.to_string(),
                to: EntryStatus::Rendering.to_string(),
            });
        }
        self.transition(EntryStatus::Rendering)
    }

    pub fn mark_rendered(&mut self, loudness: Option<LoudnessReport>) -> Result<(), ManifestError> {
        self.transition(EntryStatus::Rendered)?;
        self.last_error = None;
        self.loudness = loudness;
        Ok(())
    }

    /// Record a failed attempt and return the resulting status.
    ///
    /// A normalization failure is retried once; a second consecutive one is permanent.
    pub fn mark_failed(
        &mut self,
        kind: FailureKind,
        message: impl Into<String>,
        max_retries: u32,
    ) -> Result<EntryStatus, ManifestError> {
        let repeated_normalization = kind == FailureKind::Normalization
            && matches!(
                self.last_error,
                Some(EntryFailure { kind: FailureKind::Normalization, .. })
            );

        let next = if kind.is_retryable() && !repeated_normalization {
            self.retry_count += 1;
            if self.retry_count >= max_retries {
                EntryStatus::FailedPermanent
            } else {
                EntryStatus::FailedRetryable
            }
        } else {
            EntryStatus::FailedPermanent
        };

        self.transition(next)?;
        self.last_error = Some(EntryFailure {
            kind,
            message: message.into(),
            at: Utc::now(),
        });
        Ok(next)
    }

    /// Explicit force directive: the only way out of a terminal state
    pub fn reopen(&mut self) {
        self.status = EntryStatus::Pending;
        self.retry_count = 0;
        self.last_error = None;
        self.loudness = None;
        self.updated_at = Utc::now();
    }
}

/// The persisted hand-off document between pairing and rendering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinationManifest {
    pub version: u32,
    #[serde(default)]
    pub used_assets: AssetUsageLedger,
    #[serde(default)]
    pub entries: Vec<ManifestEntry>,
}

impl Default for CombinationManifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            used_assets: AssetUsageLedger::new(),
            entries: Vec::new(),
        }
    }
}

impl CombinationManifest {
    pub fn entry(&self, pair_id: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.pair.pair_id == pair_id)
    }

    pub fn entry_mut(&mut self, pair_id: &str) -> Option<&mut ManifestEntry> {
        self.entries.iter_mut().find(|e| e.pair.pair_id == pair_id)
    }

    /// Count of entries per status, in lifecycle order
    pub fn status_counts(&self) -> Vec<(EntryStatus, usize)> {
        [
            EntryStatus::Pending,
            EntryStatus::Rendering,
            EntryStatus::Rendered,
            EntryStatus::FailedRetryable,
            EntryStatus::FailedPermanent,
        ]
        .into_iter()
        .map(|status| (status, self.entries.iter().filter(|e| e.status == status).count()))
        .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_entry(top: &str, bottom: &str) -> ManifestEntry {
        let pair = CombinationPair::new(top, bottom, Utc::now());
        let output_path = pair.output_path(Path::new("output"));
        ManifestEntry {
            top: AssetRef {
                id: top.to_string(),
                path: PathBuf::from(format!("clips/{}.mp4", top)),
                width: 1920,
                height: 1080,
                duration: 10.0,
                has_audio: true,
            },
            bottom: AssetRef {
                id: bottom.to_string(),
                path: PathBuf::from(format!("clips/{}.mp4", bottom)),
                width: 1080,
                height: 1920,
                duration: 12.0,
                has_audio: true,
            },
            pair,
            layout: "vertical_split".to_string(),
            reframe: ReframeAssignment {
                top: ReframeStrategy::BlurPad,
                bottom: ReframeStrategy::CropFill,
            },
            cells: None,
            target_lufs: -14.0,
            output_path,
            status: EntryStatus::Pending,
            retry_count: 0,
            last_error: None,
            loudness: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_pair_id_and_output_path() {
        let pair = CombinationPair::new("A", "B", Utc::now());
        assert_eq!(pair.pair_id, "pair_AB");
        assert_eq!(pair.output_path(Path::new("output")), PathBuf::from("output/pair_AB.mp4"));

        assert_eq!(CombinationPair::pair_id_for("a b", "c/d"), "pair_a_bc_d");
    }

    #[test]
    fn test_disambiguated_ids_separate_concatenation_collisions() {
        assert_eq!(
            CombinationPair::pair_id_for("1", "23"),
            CombinationPair::pair_id_for("12", "3")
        );
        let a = CombinationPair::disambiguated_id_for("1", "23");
        let b = CombinationPair::disambiguated_id_for("12", "3");
        assert_ne!(a, b);
        assert_eq!(a, CombinationPair::disambiguated_id_for("1", "23"));
        assert_eq!(a.len(), "pair_123_".len() + 8);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&EntryStatus::FailedRetryable).unwrap();
        assert_eq!(json, "\"failed_retryable\"");
        let json = serde_json::to_string(&ReframeStrategy::BlurPad).unwrap();
        assert_eq!(json, "\"blur_pad\"");
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut entry = sample_entry("A", "B");
        entry.claim(2).unwrap();
        assert_eq!(entry.status, EntryStatus::Rendering);
        entry.mark_rendered(None).unwrap();
        assert_eq!(entry.status, EntryStatus::Rendered);
        assert!(entry.status.is_terminal());

        // Rendered entries cannot be claimed again
        assert!(entry.claim(2).is_err());
    }

    #[test]
    fn test_retry_budget_exhaustion() {
        let mut entry = sample_entry("A", "B");

        entry.claim(2).unwrap();
        let status = entry.mark_failed(FailureKind::Timeout, "timed out", 2).unwrap();
        assert_eq!(status, EntryStatus::FailedRetryable);
        assert_eq!(entry.retry_count, 1);
        assert!(entry.is_claimable(2));

        entry.claim(2).unwrap();
        let status = entry.mark_failed(FailureKind::Transient, "io", 2).unwrap();
        assert_eq!(status, EntryStatus::FailedPermanent);
        assert_eq!(entry.retry_count, 2);
        assert!(!entry.is_claimable(2));
    }

    #[test]
    fn test_permanent_failure_does_not_retry() {
        let mut entry = sample_entry("A", "B");
        entry.claim(2).unwrap();
        let status = entry.mark_failed(FailureKind::Permanent, "invalid data", 2).unwrap();
        assert_eq!(status, EntryStatus::FailedPermanent);
        assert_eq!(entry.retry_count, 0);
    }

    #[test]
    fn test_normalization_failure_retried_once() {
        let mut entry = sample_entry("A", "B");
        entry.claim(5).unwrap();
        assert_eq!(
            entry.mark_failed(FailureKind::Normalization, "decode", 5).unwrap(),
            EntryStatus::FailedRetryable
        );
        entry.claim(5).unwrap();
        assert_eq!(
            entry.mark_failed(FailureKind::Normalization, "decode", 5).unwrap(),
            EntryStatus::FailedPermanent
        );
    }

    #[test]
    fn test_reopen_resets_terminal_entry() {
        let mut entry = sample_entry("A", "B");
        entry.claim(2).unwrap();
        entry.mark_failed(FailureKind::Input, "missing", 2).unwrap();
        entry.reopen();
        assert_eq!(entry.status, EntryStatus::Pending);
        assert_eq!(entry.retry_count, 0);
        assert!(entry.last_error.is_none());
    }

    #[test]
    fn test_mark_rendered_requires_rendering() {
        let mut entry = sample_entry("A", "B");
        assert!(entry.mark_rendered(None).is_err());
        assert_eq!(entry.status, EntryStatus::Pending);
    }
}
