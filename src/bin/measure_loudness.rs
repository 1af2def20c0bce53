// Diagnostic binary: report BS.1770 loudness and true peak for audio or video files

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use split_compositor::{
    audio::{AudioLoader, LoudnessMeter, LoudnessNormalizer},
    config::Config,
};

#[derive(Parser)]
#[command(name = "measure-loudness", version, about = "Measure integrated loudness and true peak")]
struct Args {
    /// Files to measure (WAV, MP3, FLAC, MP4, ...)
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Also print the gain needed to reach this target
    #[arg(long, allow_hyphen_values = true)]
    target_lufs: Option<f64>,

    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    println!("🎵 Loudness report");

    let config = Config::default();
    let normalizer = LoudnessNormalizer::from_config(&config.loudness);
    let meter = LoudnessMeter::new();
    let mut failures = 0;

    for path in &args.files {
        let audio = match AudioLoader::load(path) {
            Ok(audio) => audio,
            Err(e) => {
                println!("\n{}\n   ❌ {}", path.display(), e.user_message());
                failures += 1;
                continue;
            }
        };

        let measurement = meter.measure(&audio)?;
        println!("\n{}", path.display());
        println!(
            "   {:.1}s, {} Hz, {} ch",
            audio.duration, audio.sample_rate, audio.channels
        );
        match measurement.integrated_lufs {
            Some(lufs) => println!("   Integrated: {:.2} LUFS", lufs),
            None => println!("   Integrated: silent (below gate)"),
        }
        println!("   True peak:  {:.2} dBTP", measurement.true_peak_dbtp);

        if let Some(target) = args.target_lufs {
            println!(
                "   Track gain to {:.1} LUFS: {:+.2} dB",
                target,
                normalizer.track_gain_db(target, &measurement)
            );
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} files could not be decoded", failures, args.files.len());
    }
    Ok(())
}
