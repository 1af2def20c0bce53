use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use split_compositor::{
    catalog::CatalogLoader,
    composition::{CompositionPlanner, VERTICAL_SPLIT},
    config::Config,
    manifest::{AssetRef, EntryStatus, ManifestStore, ReframeStrategy},
    pairing::{PairGenerator, PairingOutcome},
    render::{FfmpegEngine, OneOffOutcome, RenderInvoker, RenderPipeline},
};

#[derive(Parser)]
#[command(
    name = "split-compositor",
    version,
    about = "Pair clips into vertical split-screen shorts",
    long_about = "Split-Compositor pairs normalized clips without reuse, records the pairs in a manifest, and renders each pair as a 9:16 split-screen video with reframed cells and loudness-normalized audio."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Configuration file (optional)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Pair eligible clips and record them in the manifest
    Pair {
        /// Catalog JSON file or directory of clips
        #[arg(long)]
        catalog: PathBuf,

        #[arg(long)]
        manifest: PathBuf,

        /// Directory rendered outputs will be written to
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Render every manifest entry that is not terminal
    Render {
        #[arg(long)]
        manifest: PathBuf,

        /// Re-render rendered and permanently failed entries
        #[arg(long)]
        force: bool,

        #[arg(long)]
        concurrency: Option<usize>,

        #[arg(long)]
        max_retries: Option<u32>,
    },

    /// Render two clips directly, without a manifest
    RenderOne {
        #[arg(long)]
        top: PathBuf,

        #[arg(long)]
        bottom: PathBuf,

        #[arg(long)]
        output: PathBuf,

        #[arg(long, value_enum, default_value_t = ReframeArg::Auto)]
        top_reframe: ReframeArg,

        #[arg(long, value_enum, default_value_t = ReframeArg::Auto)]
        bottom_reframe: ReframeArg,

        #[arg(long, default_value = VERTICAL_SPLIT)]
        layout: String,

        #[arg(long, allow_hyphen_values = true)]
        target_lufs: Option<f64>,

        /// Overwrite an existing output
        #[arg(long)]
        force: bool,
    },

    /// Print a status report for a manifest
    Status {
        #[arg(long)]
        manifest: PathBuf,
    },

    /// Write the default configuration as TOML
    InitConfig {
        #[arg(long, default_value = "split-compositor.toml")]
        output: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReframeArg {
    Auto,
    #[value(name = "crop_fill")]
    CropFill,
    Zoom,
    #[value(name = "blur_pad")]
    BlurPad,
}

impl ReframeArg {
    fn strategy(self) -> Option<ReframeStrategy> {
        match self {
            ReframeArg::Auto => None,
            ReframeArg::CropFill => Some(ReframeStrategy::CropFill),
            ReframeArg::Zoom => Some(ReframeStrategy::Zoom),
            ReframeArg::BlurPad => Some(ReframeStrategy::BlurPad),
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    info!("Starting Split-Compositor v{}", env!("CARGO_PKG_VERSION"));

    let config = match &cli.config {
        Some(config_path) => {
            info!("Loading configuration from {:?}", config_path);
            Config::from_file(config_path)
                .map_err(|e| anyhow::anyhow!(e.user_message()))?
        }
        None => Config::default(),
    };

    match cli.command {
        Command::Pair {
            catalog,
            manifest,
            output_dir,
        } => pair(config, &catalog, &manifest, output_dir).await,
        Command::Render {
            manifest,
            force,
            concurrency,
            max_retries,
        } => render(config, &manifest, force, concurrency, max_retries).await,
        Command::RenderOne {
            top,
            bottom,
            output,
            top_reframe,
            bottom_reframe,
            layout,
            target_lufs,
            force,
        } => {
            if layout != VERTICAL_SPLIT {
                bail!("Unknown layout template: {}", layout);
            }
            render_one(
                config,
                &top,
                &bottom,
                &output,
                (top_reframe.strategy(), bottom_reframe.strategy()),
                target_lufs,
                force,
            )
            .await
        }
        Command::Status { manifest } => status(&manifest).await,
        Command::InitConfig { output } => {
            config.save_to_file(&output)?;
            println!("Wrote default configuration to {}", output.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn pair(
    mut config: Config,
    catalog_path: &Path,
    manifest_path: &Path,
    output_dir: Option<PathBuf>,
) -> Result<ExitCode> {
    if let Some(dir) = output_dir {
        config.render.output_dir = dir;
    }
    config.validate()?;

    info!("📂 Step 1: Loading catalog from {:?}", catalog_path);
    let catalog = CatalogLoader::new()
        .load(catalog_path)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;
    info!("   Found {} clips", catalog.len());

    info!("🔗 Step 2: Pairing into {:?}", manifest_path);
    let store = ManifestStore::open(manifest_path, config.render.max_retries)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;
    let planner = CompositionPlanner::from_config(&config)?;
    let generator = PairGenerator::new(config.pairing.sort_key);

    let outcome = store
        .pair_catalog(&catalog, &generator, &planner, &config.render.output_dir)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    match outcome {
        PairingOutcome::Paired { pairs, deferred } => {
            println!("Recorded {} new pairs", pairs.len());
            for pair in &pairs {
                println!("  {}  top={} bottom={}", pair.pair_id, pair.top, pair.bottom);
            }
            if let Some(id) = deferred {
                println!("Deferred unpaired clip: {}", id);
            }
        }
        PairingOutcome::ConstraintUnavailable { eligible } => {
            println!("Not enough eligible clips to pair ({} available)", eligible);
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn render(
    mut config: Config,
    manifest_path: &Path,
    force: bool,
    concurrency: Option<usize>,
    max_retries: Option<u32>,
) -> Result<ExitCode> {
    config.render.force |= force;
    if let Some(n) = concurrency {
        config.render.concurrency = n;
    }
    if let Some(n) = max_retries {
        config.render.max_retries = n;
    }
    config.validate()?;

    let engine = FfmpegEngine::new(&config.render.ffmpeg_path);
    if !engine.check_available().await {
        bail!(
            "Render engine '{}' is not installed or not on PATH.",
            config.render.ffmpeg_path.display()
        );
    }

    let store = ManifestStore::open(manifest_path, config.render.max_retries)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;
    let invoker = RenderInvoker::new(Arc::new(engine), &config)?;
    let summary = RenderPipeline::new(invoker, config.render.concurrency)
        .run(Arc::new(store))
        .await?;

    println!(
        "Rendered {}, skipped {}, failed {}",
        summary.rendered,
        summary.skipped,
        summary.failed.len()
    );
    if summary.is_success() {
        return Ok(ExitCode::SUCCESS);
    }

    println!("{} entries failed:", summary.failed.len());
    for failed in &summary.failed {
        println!("  {}  {}  {}", failed.pair_id, failed.status, failed.reason);
    }
    Ok(ExitCode::FAILURE)
}

async fn render_one(
    mut config: Config,
    top: &Path,
    bottom: &Path,
    output: &Path,
    reframe: (Option<ReframeStrategy>, Option<ReframeStrategy>),
    target_lufs: Option<f64>,
    force: bool,
) -> Result<ExitCode> {
    config.render.force |= force;
    if let Some(target) = target_lufs {
        config.loudness.target_lufs = target;
    }
    config.validate()?;

    let loader = CatalogLoader::new();
    let top = AssetRef::from(
        &loader
            .probe(top)
            .await
            .with_context(|| format!("probing {}", top.display()))?,
    );
    let bottom = AssetRef::from(
        &loader
            .probe(bottom)
            .await
            .with_context(|| format!("probing {}", bottom.display()))?,
    );

    let engine = Arc::new(FfmpegEngine::new(&config.render.ffmpeg_path));
    let invoker = RenderInvoker::new(engine, &config)?;
    let outcome = invoker
        .render_one(
            &top,
            &bottom,
            reframe.0,
            reframe.1,
            config.loudness.target_lufs,
            output,
        )
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    match outcome {
        OneOffOutcome::Rendered { output, loudness } => {
            println!("Rendered {}", output.display());
            if let Some(report) = loudness {
                println!(
                    "  output gain {:+.2} dB, predicted {} LUFS, {:.2} dBTP{}",
                    report.output_gain_db,
                    report
                        .predicted_lufs
                        .map(|l| format!("{:.2}", l))
                        .unwrap_or_else(|| "silent".to_string()),
                    report.predicted_true_peak_dbtp,
                    if report.peak_limited { " (peak limited)" } else { "" }
                );
            }
        }
        OneOffOutcome::Skipped { output } => {
            println!("{} already exists; use --force to re-render", output.display());
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn status(manifest_path: &Path) -> Result<ExitCode> {
    let manifest = ManifestStore::load(manifest_path)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    println!("📊 Manifest: {}", manifest_path.display());
    println!("  Entries: {}", manifest.entries.len());
    println!("  Assets used: {}", manifest.used_assets.len());
    for (status, count) in manifest.status_counts() {
        println!("  {:<18} {}", status.as_str(), count);
    }

    let problems: Vec<_> = manifest
        .entries
        .iter()
        .filter(|e| {
            matches!(
                e.status,
                EntryStatus::FailedRetryable | EntryStatus::FailedPermanent
            )
        })
        .collect();
    if !problems.is_empty() {
        println!("\nFailed entries:");
        for entry in problems {
            let reason = entry
                .last_error
                .as_ref()
                .map(|f| f.message.as_str())
                .unwrap_or("");
            println!(
                "  {}  {}  retries={}  {}",
                entry.pair_id(),
                entry.status,
                entry.retry_count,
                reason
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}
