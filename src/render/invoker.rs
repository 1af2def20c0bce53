use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::audio::{LoudnessNormalizer, LoudnessReport};
use crate::composition::{CompositionPlanner, RenderPlan};
use crate::config::Config;
use crate::error::{
    AudioError, CompositorError, EngineError, InputError, ManifestError, Result,
};
use crate::manifest::{AssetRef, EntryStatus, FailureKind, ManifestEntry, ManifestStore, ReframeStrategy};
use crate::render::engine::RenderEngine;
use crate::render::job::{EncodeSettings, RenderJob};

/// A classified failed attempt
#[derive(Debug, Clone, PartialEq)]
pub struct RenderFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl RenderFailure {
    fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    fn from_engine(error: &EngineError) -> Self {
        let kind = match error {
            EngineError::Timeout { .. } => FailureKind::Timeout,
            EngineError::Retryable { .. } => FailureKind::Transient,
            EngineError::Permanent { .. } | EngineError::NotAvailable { .. } => FailureKind::Permanent,
        };
        Self::new(kind, error.to_string())
    }

    fn from_error(error: &CompositorError) -> Self {
        let kind = match error {
            CompositorError::Normalization(_) => FailureKind::Normalization,
            CompositorError::Input(_) => FailureKind::Input,
            CompositorError::Audio(AudioError::UnsupportedFormat { .. })
            | CompositorError::Audio(AudioError::InvalidParameters { .. }) => FailureKind::Permanent,
            CompositorError::Engine(e) => return Self::from_engine(e),
            e if e.is_recoverable() => FailureKind::Transient,
            _ => FailureKind::Permanent,
        };
        Self::new(kind, error.to_string())
    }
}

impl fmt::Display for RenderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Result of processing one manifest entry
#[derive(Debug, Clone, PartialEq)]
pub enum EntryOutcome {
    Rendered { pair_id: String, output: PathBuf },
    /// Already rendered with a valid output; the engine was not called
    Skipped { pair_id: String },
    Failed {
        pair_id: String,
        status: EntryStatus,
        reason: String,
    },
}

impl EntryOutcome {
    pub fn pair_id(&self) -> &str {
        match self {
            EntryOutcome::Rendered { pair_id, .. }
            | EntryOutcome::Skipped { pair_id }
            | EntryOutcome::Failed { pair_id, .. } => pair_id,
        }
    }
}

/// Result of a render that bypasses the manifest
#[derive(Debug, Clone, PartialEq)]
pub enum OneOffOutcome {
    Rendered {
        output: PathBuf,
        loudness: Option<LoudnessReport>,
    },
    Skipped {
        output: PathBuf,
    },
}

/// Hidden sibling the engine writes to before the output is published
pub fn temp_output_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    output.with_file_name(format!(".{}.rendering.mp4", stem))
}

/// Present and non-empty
pub async fn output_is_valid(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

/// Turns render plans into engine invocations and manifest transitions
pub struct RenderInvoker {
    engine: Arc<dyn RenderEngine>,
    planner: CompositionPlanner,
    normalizer: LoudnessNormalizer,
    encode: EncodeSettings,
    mix_sample_rate: u32,
    timeout: Duration,
    max_retries: u32,
    force: bool,
}

impl RenderInvoker {
    pub fn new(engine: Arc<dyn RenderEngine>, config: &Config) -> Result<Self> {
        Ok(Self {
            engine,
            planner: CompositionPlanner::from_config(config)?,
            normalizer: LoudnessNormalizer::from_config(&config.loudness),
            encode: EncodeSettings::from_config(&config.canvas, &config.render),
            mix_sample_rate: config.loudness.mix_sample_rate,
            timeout: Duration::from_secs(config.render.timeout_secs),
            max_retries: config.render.max_retries,
            force: config.render.force,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn planner(&self) -> &CompositionPlanner {
        &self.planner
    }

    /// Drive one entry to a terminal outcome for this run.
    ///
    /// Retryable failures are retried here until the entry renders or its
    /// retry budget is spent. Every transition is persisted before the next step.
    pub async fn process(&self, store: &ManifestStore, pair_id: &str) -> Result<EntryOutcome> {
        let mut reopened = false;

        loop {
            let entry = store
                .entry(pair_id)
                .await
                .ok_or_else(|| ManifestError::EntryNotFound {
                    pair_id: pair_id.to_string(),
                })?;

            match entry.status {
                EntryStatus::Rendered | EntryStatus::FailedPermanent if self.force && !reopened => {
                    info!("♻️  Reopening {} ({})", pair_id, entry.status);
                    store.update(pair_id, |e| {
                        e.reopen();
                        Ok(())
                    })
                    .await?;
                    reopened = true;
                    continue;
                }
                EntryStatus::Rendered => {
                    if output_is_valid(&entry.output_path).await {
                        debug!("{} already rendered, skipping", pair_id);
                        return Ok(EntryOutcome::Skipped {
                            pair_id: pair_id.to_string(),
                        });
                    }
                    return Ok(EntryOutcome::Failed {
                        pair_id: pair_id.to_string(),
                        status: entry.status,
                        reason: format!(
                            "output {} is missing or empty; re-run with --force",
                            entry.output_path.display()
                        ),
                    });
                }
                _ if !entry.is_claimable(self.max_retries) => {
                    let reason = entry
                        .last_error
                        .as_ref()
                        .map(|f| f.message.clone())
                        .unwrap_or_else(|| "retry budget exhausted".to_string());
                    return Ok(EntryOutcome::Failed {
                        pair_id: pair_id.to_string(),
                        status: entry.status,
                        reason,
                    });
                }
                _ => {}
            }

            let max_retries = self.max_retries;
            store.update(pair_id, |e| e.claim(max_retries)).await?;
            info!("🎬 Rendering {} (attempt {})", pair_id, entry.retry_count + 1);

            match self.attempt(&entry).await {
                Ok(report) => {
                    store.update(pair_id, |e| e.mark_rendered(report)).await?;
                    info!("   ✅ {} -> {}", pair_id, entry.output_path.display());
                    return Ok(EntryOutcome::Rendered {
                        pair_id: pair_id.to_string(),
                        output: entry.output_path.clone(),
                    });
                }
                Err(failure) => {
                    let message = failure.message.clone();
                    let status = store
                        .update(pair_id, |e| e.mark_failed(failure.kind, message, max_retries))
                        .await?;
                    warn!("   ❌ {} failed ({}): {}", pair_id, status, failure.message);

                    if status == EntryStatus::FailedRetryable {
                        continue;
                    }
                    return Ok(EntryOutcome::Failed {
                        pair_id: pair_id.to_string(),
                        status,
                        reason: failure.message,
                    });
                }
            }
        }
    }

    async fn attempt(&self, entry: &ManifestEntry) -> std::result::Result<Option<LoudnessReport>, RenderFailure> {
        for asset in [&entry.top, &entry.bottom] {
            check_input(asset).await?;
        }
        let plan = self
            .planner
            .plan(entry)
            .map_err(|e| RenderFailure::from_error(&e))?;
        self.render_plan(&plan, &entry.output_path).await
    }

    /// Normalize, render into the temp path and publish with a rename
    async fn render_plan(
        &self,
        plan: &RenderPlan,
        output: &Path,
    ) -> std::result::Result<Option<LoudnessReport>, RenderFailure> {
        let gains = self
            .normalizer
            .normalize(&plan.audio, plan.duration)
            .await
            .map_err(|e| RenderFailure::from_error(&e))?;

        let job = RenderJob::build(plan, gains.as_ref(), self.mix_sample_rate, self.encode.clone());

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RenderFailure::new(FailureKind::Transient, e.to_string()))?;
        }
        let temp = temp_output_path(output);
        discard(&temp).await;

        debug!("{} engine={} temp={}", plan.pair_id, self.engine.name(), temp.display());
        let rendered = tokio::time::timeout(self.timeout, self.engine.render(&job, &temp)).await;

        let failure = match rendered {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(RenderFailure::from_engine(&e)),
            Err(_) => Some(RenderFailure::from_engine(&EngineError::Timeout {
                seconds: self.timeout.as_secs(),
            })),
        };
        if let Some(failure) = failure {
            discard(&temp).await;
            return Err(failure);
        }

        if !output_is_valid(&temp).await {
            discard(&temp).await;
            return Err(RenderFailure::new(
                FailureKind::Permanent,
                format!("{} reported success but produced no output", self.engine.name()),
            ));
        }

        if let Err(e) = tokio::fs::rename(&temp, output).await {
            discard(&temp).await;
            return Err(RenderFailure::new(
                FailureKind::Transient,
                format!("failed to publish {}: {}", output.display(), e),
            ));
        }

        Ok(gains.map(|g| g.report()))
    }

    /// Render two clips directly to `output` without touching a manifest
    pub async fn render_one(
        &self,
        top: &AssetRef,
        bottom: &AssetRef,
        top_reframe: Option<ReframeStrategy>,
        bottom_reframe: Option<ReframeStrategy>,
        target_lufs: f64,
        output: &Path,
    ) -> Result<OneOffOutcome> {
        if !self.force && output_is_valid(output).await {
            info!("{} already exists, skipping", output.display());
            return Ok(OneOffOutcome::Skipped {
                output: output.to_path_buf(),
            });
        }

        let pair_id = output
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "one_off".to_string());
        let plan = self.planner.plan_one_off(
            &pair_id,
            top,
            bottom,
            top_reframe,
            bottom_reframe,
            target_lufs,
        )?;

        let mut attempts = 0;
        loop {
            attempts += 1;
            info!("🎬 Rendering {} (attempt {})", output.display(), attempts);
            match self.render_plan(&plan, output).await {
                Ok(loudness) => {
                    return Ok(OneOffOutcome::Rendered {
                        output: output.to_path_buf(),
                        loudness,
                    })
                }
                Err(failure) if failure.kind.is_retryable() && attempts < self.max_retries => {
                    warn!("   Retrying after failure: {}", failure);
                }
                Err(failure) => return Err(failure_to_error(failure)),
            }
        }
    }
}

async fn check_input(asset: &AssetRef) -> std::result::Result<(), RenderFailure> {
    if tokio::fs::metadata(&asset.path).await.is_err() {
        return Err(RenderFailure::new(
            FailureKind::Input,
            InputError::AssetNotFound {
                path: asset.path.display().to_string(),
            }
            .to_string(),
        ));
    }
    Ok(())
}

fn failure_to_error(failure: RenderFailure) -> CompositorError {
    match failure.kind {
        FailureKind::Timeout | FailureKind::Transient | FailureKind::Interrupted => {
            EngineError::retryable(failure.message).into()
        }
        _ => EngineError::permanent(failure.message).into(),
    }
}
