use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::ManifestError;
use crate::manifest::CombinationPair;

/// Append-only set of asset ids already consumed by a pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetUsageLedger {
    used: BTreeSet<String>,
}

impl AssetUsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, asset_id: &str) -> bool {
        self.used.contains(asset_id)
    }

    pub fn len(&self) -> usize {
        self.used.len()
    }

    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.used.iter().map(String::as_str)
    }

    /// Record every id or none of them.
    ///
    /// Fails if any id is already present or appears twice in `ids`.
    pub fn insert_all<I>(&mut self, ids: I) -> Result<(), ManifestError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut staged = BTreeSet::new();
        for id in ids {
            if self.used.contains(&id) || staged.contains(&id) {
                return Err(ManifestError::AssetAlreadyUsed { asset_id: id });
            }
            staged.insert(id);
        }
        self.used.extend(staged);
        Ok(())
    }

    /// Record both assets of every pair
    pub fn record_pairs(&mut self, pairs: &[CombinationPair]) -> Result<(), ManifestError> {
        self.insert_all(
            pairs
                .iter()
                .flat_map(|p| [p.top.clone(), p.bottom.clone()]),
        )
    }
}
