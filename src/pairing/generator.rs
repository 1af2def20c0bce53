use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::catalog::VideoAsset;
use crate::manifest::CombinationPair;

/// Stable key eligible assets are ordered by before pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    /// Lexicographic asset id
    #[default]
    AssetId,
    /// SHA-256 over id, path, resolution and duration
    IdentityHash,
}

impl SortKey {
    pub fn key_for(&self, asset: &VideoAsset) -> String {
        match self {
            SortKey::AssetId => asset.id.clone(),
            SortKey::IdentityHash => identity_hash(asset),
        }
    }
}

/// Hex digest identifying an asset snapshot
pub fn identity_hash(asset: &VideoAsset) -> String {
    let mut hasher = Sha256::new();
    hasher.update(asset.id.as_bytes());
    hasher.update([0u8]);
    hasher.update(asset.path.to_string_lossy().as_bytes());
    hasher.update([0u8]);
    hasher.update(format!("{}x{}", asset.width, asset.height).as_bytes());
    hasher.update([0u8]);
    hasher.update(format!("{:.6}", asset.duration).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Result of a pairing pass
#[derive(Debug, Clone, PartialEq)]
pub enum PairingOutcome {
    Paired {
        pairs: Vec<CombinationPair>,
        /// Odd asset left over; stays eligible for a later run
        deferred: Option<String>,
    },
    /// Fewer than two eligible assets
    ConstraintUnavailable { eligible: usize },
}

impl PairingOutcome {
    pub fn pairs(&self) -> &[CombinationPair] {
        match self {
            PairingOutcome::Paired { pairs, .. } => pairs,
            PairingOutcome::ConstraintUnavailable { .. } => &[],
        }
    }

    pub fn pairs_mut(&mut self) -> &mut [CombinationPair] {
        match self {
            PairingOutcome::Paired { pairs, .. } => pairs,
            PairingOutcome::ConstraintUnavailable { .. } => &mut [],
        }
    }
}

/// Deterministic adjacent pairing over a sorted eligible set
#[derive(Debug, Clone, Default)]
pub struct PairGenerator {
    sort_key: SortKey,
}

impl PairGenerator {
    pub fn new(sort_key: SortKey) -> Self {
        Self { sort_key }
    }

    pub fn sort_key(&self) -> SortKey {
        self.sort_key
    }

    /// Sort by the configured key (ties by id) and pair index 2k with 2k+1.
    ///
    /// Pure: the ledger is not touched here.
    pub fn pair(&self, eligible: &[&VideoAsset], created_at: DateTime<Utc>) -> PairingOutcome {
        if eligible.len() < 2 {
            info!("Not enough eligible clips to pair ({})", eligible.len());
            return PairingOutcome::ConstraintUnavailable {
                eligible: eligible.len(),
            };
        }

        let mut keyed: Vec<(String, &VideoAsset)> = eligible
            .iter()
            .map(|asset| (self.sort_key.key_for(asset), *asset))
            .collect();
        keyed.sort_by(|(ka, a), (kb, b)| ka.cmp(kb).then_with(|| a.id.cmp(&b.id)));

        let mut pairs = Vec::with_capacity(keyed.len() / 2);
        let mut chunks = keyed.chunks_exact(2);
        for chunk in &mut chunks {
            let (top, bottom) = (chunk[0].1, chunk[1].1);
            debug!("Pairing top='{}' bottom='{}'", top.id, bottom.id);
            pairs.push(CombinationPair::new(&top.id, &bottom.id, created_at));
        }

        let deferred = chunks.remainder().first().map(|(_, asset)| asset.id.clone());
        if let Some(id) = &deferred {
            info!("   Deferring unpaired clip '{}'", id);
        }

        PairingOutcome::Paired { pairs, deferred }
    }
}
