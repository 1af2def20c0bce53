use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::error::{CompositorError, Result};
use crate::manifest::{EntryStatus, ManifestStore};
use crate::render::invoker::{EntryOutcome, RenderInvoker};

/// An entry that did not reach `rendered` in this run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedEntry {
    pub pair_id: String,
    pub status: EntryStatus,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub rendered: usize,
    pub skipped: usize,
    pub failed: Vec<FailedEntry>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, outcome: EntryOutcome) {
        match outcome {
            EntryOutcome::Rendered { .. } => self.rendered += 1,
            EntryOutcome::Skipped { .. } => self.skipped += 1,
            EntryOutcome::Failed {
                pair_id,
                status,
                reason,
            } => self.failed.push(FailedEntry {
                pair_id,
                status,
                reason,
            }),
        }
    }
}

/// Renders every manifest entry with bounded concurrency
pub struct RenderPipeline {
    invoker: Arc<RenderInvoker>,
    concurrency: usize,
}

impl RenderPipeline {
    pub fn new(invoker: RenderInvoker, concurrency: usize) -> Self {
        Self {
            invoker: Arc::new(invoker),
            concurrency: concurrency.max(1),
        }
    }

    pub async fn run(&self, store: Arc<ManifestStore>) -> Result<RunSummary> {
        let pair_ids: Vec<String> = store
            .snapshot()
            .await
            .entries
            .iter()
            .map(|e| e.pair_id().to_string())
            .collect();

        info!(
            "🎞️  Rendering {} entries with {} workers",
            pair_ids.len(),
            self.concurrency
        );

        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for pair_id in pair_ids {
            let permits = permits.clone();
            let invoker = self.invoker.clone();
            let store = store.clone();
            tasks.spawn(async move {
                // The semaphore is never closed
                let _permit = permits.acquire_owned().await;
                match invoker.process(&store, &pair_id).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        // Persistence failures abort the entry, not the run
                        error!("{}: {}", pair_id, e);
                        let status = store.entry(&pair_id).await.map(|e| e.status).unwrap_or_default();
                        EntryOutcome::Failed {
                            pair_id,
                            status,
                            reason: e.to_string(),
                        }
                    }
                }
            });
        }

        let mut summary = RunSummary::default();
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined
                .map_err(|e| CompositorError::generic(format!("render task panicked: {}", e)))?;
            summary.record(outcome);
        }
        summary.failed.sort_by(|a, b| a.pair_id.cmp(&b.pair_id));

        info!(
            "📊 Rendered {}, skipped {}, failed {}",
            summary.rendered,
            summary.skipped,
            summary.failed.len()
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::EngineError;
    use crate::manifest::types::tests::sample_entry;
    use crate::render::engine::testing::FakeEngine;
    use tempfile::tempdir;

    async fn store_with(dir: &std::path::Path, ids: &[(&str, &str)]) -> Arc<ManifestStore> {
        let mut entries = Vec::new();
        for (top, bottom) in ids {
            let mut entry = sample_entry(top, bottom);
            for asset in [&mut entry.top, &mut entry.bottom] {
                let path = dir.join(format!("{}.mp4", asset.id));
                std::fs::write(&path, b"clip").unwrap();
                asset.path = path;
                asset.has_audio = false;
            }
            entry.output_path = dir.join("output").join(format!("{}.mp4", entry.pair_id()));
            entries.push(entry);
        }
        let store = ManifestStore::open(dir.join("manifest.json"), 2).await.unwrap();
        store.commit_entries(entries).await.unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_run_renders_all_then_skips() {
        let dir = tempdir().unwrap();
        let store = store_with(dir.path(), &[("A", "B"), ("C", "D"), ("E", "F")]).await;
        let engine = Arc::new(FakeEngine::new());
        let invoker = RenderInvoker::new(engine.clone(), &Config::default()).unwrap();
        let pipeline = RenderPipeline::new(invoker, 2);

        let summary = pipeline.run(store.clone()).await.unwrap();
        assert_eq!(summary.rendered, 3);
        assert!(summary.is_success());

        let summary = pipeline.run(store.clone()).await.unwrap();
        assert_eq!(summary.skipped, 3);
        assert_eq!(engine.calls(), 3);
    }

    #[tokio::test]
    async fn test_failure_does_not_block_other_entries() {
        let dir = tempdir().unwrap();
        let store = store_with(dir.path(), &[("A", "B"), ("C", "D")]).await;
        let engine = Arc::new(FakeEngine::failing(vec![EngineError::permanent("bad stream")]));
        let invoker = RenderInvoker::new(engine.clone(), &Config::default()).unwrap();

        let summary = RenderPipeline::new(invoker, 1).run(store.clone()).await.unwrap();
        assert_eq!(summary.rendered, 1);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].status, EntryStatus::FailedPermanent);
        assert!(!summary.is_success());
    }
}
