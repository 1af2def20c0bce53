use std::collections::HashSet;
use std::fs::{File, OpenOptions, TryLockError};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::catalog::AssetCatalog;
use crate::composition::CompositionPlanner;
use crate::error::{ManifestError, Result};
use crate::manifest::types::{
    CombinationManifest, EntryStatus, FailureKind, ManifestEntry,
};
use crate::pairing::{PairGenerator, PairingOutcome};

/// Exclusive advisory lock on `{manifest}.lock`.
///
/// The OS drops the lock when the holding process exits, crashed or not, so a
/// leftover lock file never blocks the next run. The file itself stays in place.
#[derive(Debug)]
struct ManifestLock {
    _file: File,
}

impl ManifestLock {
    fn acquire(manifest_path: &Path) -> Result<Self> {
        let path = lock_path_for(manifest_path);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(ManifestError::Locked {
                    path: manifest_path.display().to_string(),
                }
                .into())
            }
            Err(TryLockError::Error(e)) => return Err(e.into()),
        }

        // Owner pid, for whoever inspects a busy lock
        file.set_len(0)?;
        write!(file, "{}", std::process::id())?;
        debug!("Acquired manifest lock {}", path.display());
        Ok(Self { _file: file })
    }
}

pub fn lock_path_for(manifest_path: &Path) -> PathBuf {
    let mut name = manifest_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    manifest_path.with_file_name(name)
}

fn temp_path_for(manifest_path: &Path) -> PathBuf {
    let mut name = manifest_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    manifest_path.with_file_name(name)
}

/// Single writer over a manifest file.
///
/// Every mutation is applied to a copy, persisted with temp + rename, and only
/// then swapped into memory, so a failed write leaves the store unchanged.
#[derive(Debug)]
pub struct ManifestStore {
    path: PathBuf,
    state: Mutex<CombinationManifest>,
    _lock: ManifestLock,
}

impl ManifestStore {
    /// Take the lock and load the manifest (empty if the file does not exist).
    ///
    /// Entries left in `rendering` by an interrupted run are recovered as retryable failures.
    pub async fn open<P: AsRef<Path>>(path: P, max_retries: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let lock = ManifestLock::acquire(&path)?;

        let mut manifest = if path.exists() {
            Self::load(&path).await?
        } else {
            CombinationManifest::default()
        };

        let mut recovered = 0;
        for entry in manifest
            .entries
            .iter_mut()
            .filter(|e| e.status == EntryStatus::Rendering)
        {
            let status = entry.mark_failed(
                FailureKind::Interrupted,
                "render interrupted before completion",
                max_retries,
            )?;
            warn!("Recovered interrupted entry {} as {}", entry.pair_id(), status);
            recovered += 1;
        }
        if recovered > 0 {
            write_atomic(&path, &manifest).await?;
        }

        Ok(Self {
            path,
            state: Mutex::new(manifest),
            _lock: lock,
        })
    }

    /// Read a manifest without taking the lock
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<CombinationManifest> {
        let path = path.as_ref();
        let parse_failed = |reason: String| ManifestError::ParseFailed {
            path: path.display().to_string(),
            reason,
        };

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| parse_failed(e.to_string()))?;
        let manifest: CombinationManifest =
            serde_json::from_str(&content).map_err(|e| parse_failed(e.to_string()))?;
        Ok(manifest)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn snapshot(&self) -> CombinationManifest {
        self.state.lock().await.clone()
    }

    pub async fn entry(&self, pair_id: &str) -> Option<ManifestEntry> {
        self.state.lock().await.entry(pair_id).cloned()
    }

    /// Append entries and record their assets in the ledger as one transaction
    pub async fn commit_entries(&self, entries: Vec<ManifestEntry>) -> Result<()> {
        let mut state = self.state.lock().await;
        let next = staged_commit(&state, entries)?;
        write_atomic(&self.path, &next).await?;
        *state = next;
        Ok(())
    }

    /// Pair the eligible assets of `catalog` and commit the resulting entries.
    ///
    /// The mutex is held throughout so eligibility and commit see the same ledger.
    pub async fn pair_catalog(
        &self,
        catalog: &AssetCatalog,
        generator: &PairGenerator,
        planner: &CompositionPlanner,
        output_dir: &Path,
    ) -> Result<PairingOutcome> {
        let mut state = self.state.lock().await;

        let eligible = catalog.eligible(&state.used_assets);
        info!("🔗 Pairing {} eligible clips", eligible.len());

        let mut outcome = generator.pair(&eligible, Utc::now());
        if outcome.pairs().is_empty() {
            return Ok(outcome);
        }

        let mut taken: HashSet<String> =
            state.entries.iter().map(|e| e.pair_id().to_string()).collect();
        for pair in outcome.pairs_mut() {
            if taken.contains(&pair.pair_id) {
                let plain = pair.pair_id.clone();
                pair.disambiguate();
                warn!("Pair id {} is already taken, using {}", plain, pair.pair_id);
            }
            taken.insert(pair.pair_id.clone());
        }
        let pairs = outcome.pairs();

        let mut entries = Vec::with_capacity(pairs.len());
        for pair in pairs {
            let top = catalog.get(&pair.top).ok_or_else(|| ManifestError::EntryNotFound {
                pair_id: pair.pair_id.clone(),
            })?;
            let bottom = catalog.get(&pair.bottom).ok_or_else(|| ManifestError::EntryNotFound {
                pair_id: pair.pair_id.clone(),
            })?;
            entries.push(planner.resolve_entry(pair.clone(), top, bottom, output_dir)?);
        }

        let next = staged_commit(&state, entries)?;
        write_atomic(&self.path, &next).await?;
        *state = next;

        info!("   Recorded {} pairs in {}", pairs.len(), self.path.display());
        Ok(outcome)
    }

    /// Apply `f` to one entry and persist the result before it becomes visible
    pub async fn update<F, T>(&self, pair_id: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut ManifestEntry) -> std::result::Result<T, ManifestError>,
    {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let entry = next
            .entry_mut(pair_id)
            .ok_or_else(|| ManifestError::EntryNotFound {
                pair_id: pair_id.to_string(),
            })?;
        let value = f(entry)?;
        write_atomic(&self.path, &next).await?;
        *state = next;
        Ok(value)
    }
}

fn staged_commit(
    current: &CombinationManifest,
    entries: Vec<ManifestEntry>,
) -> Result<CombinationManifest> {
    let mut next = current.clone();

    let mut ids: HashSet<String> = next.entries.iter().map(|e| e.pair_id().to_string()).collect();
    for entry in &entries {
        if !ids.insert(entry.pair_id().to_string()) {
            return Err(ManifestError::DuplicatePair {
                pair_id: entry.pair_id().to_string(),
            }
            .into());
        }
    }

    let pairs: Vec<_> = entries.iter().map(|e| e.pair.clone()).collect();
    next.used_assets.record_pairs(&pairs)?;
    next.entries.extend(entries);
    Ok(next)
}

async fn write_atomic(path: &Path, manifest: &CombinationManifest) -> Result<()> {
    let write_failed = |e: std::io::Error| ManifestError::WriteFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    };

    let content = serde_json::to_vec_pretty(manifest)?;
    let tmp = temp_path_for(path);
    tokio::fs::write(&tmp, &content).await.map_err(write_failed)?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(write_failed(e).into());
    }
    debug!("Persisted manifest ({} entries)", manifest.entries.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::VideoAsset;
    use crate::config::Config;
    use crate::error::CompositorError;
    use crate::manifest::types::tests::sample_entry;
    use crate::manifest::types::CombinationPair;
    use tempfile::tempdir;

    fn catalog(ids: &[&str]) -> AssetCatalog {
        AssetCatalog::new(
            ids.iter()
                .map(|id| VideoAsset::new(*id, format!("clips/{}.mp4", id), 10.0, 1920, 1080))
                .collect(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("manifest.json");

        let store = ManifestStore::open(&path, 2).await.unwrap();
        let second = ManifestStore::open(&path, 2).await;
        assert!(matches!(
            second,
            Err(CompositorError::Manifest(ManifestError::Locked { .. }))
        ));

        drop(store);
        assert!(ManifestStore::open(&path, 2).await.is_ok());
    }

    #[tokio::test]
    async fn test_lock_file_left_by_crashed_run_does_not_block_resume() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.json");
        {
            let store = ManifestStore::open(&path, 2).await.unwrap();
            store.commit_entries(vec![sample_entry("A", "B")]).await.unwrap();
            store.update("pair_AB", |e| e.claim(2)).await.unwrap();
        }
        // What a killed process leaves behind: its lock file and a claimed entry
        std::fs::write(lock_path_for(&path), "4194303").unwrap();
        assert_eq!(
            ManifestStore::load(&path).await.unwrap().entries[0].status,
            EntryStatus::Rendering
        );

        let store = ManifestStore::open(&path, 2).await.unwrap();
        let entry = store.entry("pair_AB").await.unwrap();
        assert_eq!(entry.status, EntryStatus::FailedRetryable);
        assert_eq!(entry.last_error.unwrap().kind, FailureKind::Interrupted);

        let owner = std::fs::read_to_string(lock_path_for(&path)).unwrap();
        assert_eq!(owner, std::process::id().to_string());
    }

    #[tokio::test]
    async fn test_commit_persists_entries_and_ledger() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("manifest.json");

        {
            let store = ManifestStore::open(&path, 2).await.unwrap();
            store
                .commit_entries(vec![sample_entry("A", "B"), sample_entry("C", "D")])
                .await
                .unwrap();
        }

        let manifest = ManifestStore::load(&path).await.unwrap();
        assert_eq!(manifest.version, 1);
        assert_eq!(manifest.entries.len(), 2);
        assert!(manifest.used_assets.contains("A"));
        assert!(manifest.used_assets.contains("D"));
        assert!(!temp_path_for(&path).exists());
    }

    #[tokio::test]
    async fn test_duplicate_pair_aborts_transaction() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::open(dir.path().join("m.json"), 2).await.unwrap();
        store.commit_entries(vec![sample_entry("A", "B")]).await.unwrap();

        let result = store.commit_entries(vec![sample_entry("E", "F"), sample_entry("A", "B")]).await;
        assert!(matches!(
            result,
            Err(CompositorError::Manifest(ManifestError::DuplicatePair { .. }))
        ));

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.entries.len(), 1);
        assert!(!snapshot.used_assets.contains("E"));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_state_unchanged() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("state");
        std::fs::create_dir(&sub).unwrap();
        let store = ManifestStore::open(sub.join("m.json"), 2).await.unwrap();

        std::fs::remove_dir_all(&sub).unwrap();
        let result = store.commit_entries(vec![sample_entry("A", "B")]).await;
        assert!(matches!(
            result,
            Err(CompositorError::Manifest(ManifestError::WriteFailed { .. }))
        ));

        let snapshot = store.snapshot().await;
        assert!(snapshot.entries.is_empty());
        assert!(snapshot.used_assets.is_empty());
    }

    #[tokio::test]
    async fn test_update_persists_transition() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.json");
        let store = ManifestStore::open(&path, 2).await.unwrap();
        store.commit_entries(vec![sample_entry("A", "B")]).await.unwrap();

        store.update("pair_AB", |e| e.claim(2)).await.unwrap();
        let on_disk = ManifestStore::load(&path).await.unwrap();
        assert_eq!(on_disk.entries[0].status, EntryStatus::Rendering);

        let missing = store.update("pair_ZZ", |e| e.claim(2)).await;
        assert!(matches!(
            missing,
            Err(CompositorError::Manifest(ManifestError::EntryNotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_interrupted_render_recovered_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.json");
        {
            let store = ManifestStore::open(&path, 2).await.unwrap();
            store.commit_entries(vec![sample_entry("A", "B")]).await.unwrap();
            store.update("pair_AB", |e| e.claim(2)).await.unwrap();
        }

        let store = ManifestStore::open(&path, 2).await.unwrap();
        let entry = store.entry("pair_AB").await.unwrap();
        assert_eq!(entry.status, EntryStatus::FailedRetryable);
        assert_eq!(entry.retry_count, 1);
        assert_eq!(entry.last_error.unwrap().kind, FailureKind::Interrupted);
    }

    #[tokio::test]
    async fn test_pair_catalog_across_runs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.json");
        let config = Config::default();
        let planner = CompositionPlanner::from_config(&config).unwrap();
        let generator = PairGenerator::default();
        let output_dir = dir.path().join("out");

        let store = ManifestStore::open(&path, 2).await.unwrap();
        let outcome = store
            .pair_catalog(&catalog(&["a", "b", "c"]), &generator, &planner, &output_dir)
            .await
            .unwrap();
        assert_eq!(outcome.pairs().len(), 1);

        // The deferred clip pairs with a newcomer on the next run
        let outcome = store
            .pair_catalog(&catalog(&["a", "b", "c", "d"]), &generator, &planner, &output_dir)
            .await
            .unwrap();
        assert_eq!(outcome.pairs().len(), 1);
        assert_eq!(outcome.pairs()[0].pair_id, "pair_cd");

        // Nothing left to pair
        let outcome = store
            .pair_catalog(&catalog(&["a", "b", "c", "d"]), &generator, &planner, &output_dir)
            .await
            .unwrap();
        assert!(matches!(outcome, PairingOutcome::ConstraintUnavailable { eligible: 0 }));

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.entries.len(), 2);
        assert_eq!(snapshot.used_assets.len(), 4);
        assert_eq!(snapshot.entries[1].output_path, output_dir.join("pair_cd.mp4"));
    }

    #[tokio::test]
    async fn test_colliding_pair_ids_are_disambiguated() {
        let dir = tempdir().unwrap();
        let planner = CompositionPlanner::from_config(&Config::default()).unwrap();
        let generator = PairGenerator::default();
        let output_dir = dir.path().join("out");
        let store = ManifestStore::open(dir.path().join("m.json"), 2).await.unwrap();

        let outcome = store
            .pair_catalog(&catalog(&["1", "23"]), &generator, &planner, &output_dir)
            .await
            .unwrap();
        assert_eq!(outcome.pairs()[0].pair_id, "pair_123");

        // ("12", "3") concatenates to the same plain id
        let outcome = store
            .pair_catalog(&catalog(&["1", "23", "12", "3"]), &generator, &planner, &output_dir)
            .await
            .unwrap();
        let pair = &outcome.pairs()[0];
        assert_eq!((pair.top.as_str(), pair.bottom.as_str()), ("12", "3"));
        assert_eq!(pair.pair_id, CombinationPair::disambiguated_id_for("12", "3"));
        assert!(pair.pair_id.starts_with("pair_123_"));

        let outcome = store
            .pair_catalog(&catalog(&["1", "23", "12", "3"]), &generator, &planner, &output_dir)
            .await
            .unwrap();
        assert!(matches!(outcome, PairingOutcome::ConstraintUnavailable { eligible: 0 }));

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.entries.len(), 2);
        assert_eq!(snapshot.used_assets.len(), 4);
        assert_ne!(snapshot.entries[0].output_path, snapshot.entries[1].output_path);
    }
}
