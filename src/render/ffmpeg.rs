use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::EngineError;
use crate::render::engine::RenderEngine;
use crate::render::job::{CellGraph, RenderJob, VideoOp};

/// stderr fragments that mean the same invocation will never succeed
const PERMANENT_MARKERS: &[&str] = &[
    "no such file or directory",
    "invalid data found when processing input",
    "moov atom not found",
    "does not contain any stream",
    "unknown encoder",
    "decoder not found",
    "error parsing",
    "invalid argument",
    "matches no streams",
];

/// stderr fragments of conditions that may clear up on a later attempt
const TRANSIENT_MARKERS: &[&str] = &[
    "cannot allocate memory",
    "no space left on device",
    "resource temporarily unavailable",
    "device or resource busy",
    "broken pipe",
    "input/output error",
];

/// Default engine: a single FFmpeg `-filter_complex` invocation per job
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    ffmpeg_path: PathBuf,
}

impl Default for FfmpegEngine {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegEngine {
    pub fn new<P: Into<PathBuf>>(ffmpeg_path: P) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    /// Check that the binary can be executed
    pub async fn check_available(&self) -> bool {
        Command::new(&self.ffmpeg_path)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Full argument list for a job
    pub fn build_args(&self, job: &RenderJob, output: &Path) -> Vec<String> {
        let mut args: Vec<String> = vec!["-y".into(), "-v".into(), "error".into()];

        for cell in &job.cells {
            args.push("-i".into());
            args.push(cell.source.to_string_lossy().into_owned());
        }

        args.push("-filter_complex".into());
        args.push(filter_graph(job));
        args.push("-map".into());
        args.push("[vout]".into());

        match &job.audio {
            Some(_) => {
                args.extend(["-map".into(), "[aout]".into()]);
                args.extend(["-c:a".into(), job.encode.audio_codec.clone()]);
                args.extend(["-b:a".into(), job.encode.audio_bitrate.clone()]);
            }
            None => args.push("-an".into()),
        }

        args.extend([
            "-c:v".into(),
            job.encode.video_codec.clone(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-crf".into(),
            job.encode.crf.to_string(),
            "-r".into(),
            job.encode.fps.to_string(),
            "-t".into(),
            format!("{:.3}", job.duration),
            "-movflags".into(),
            "+faststart".into(),
            "-f".into(),
            "mp4".into(),
        ]);
        args.push(output.to_string_lossy().into_owned());
        args
    }
}

fn write_ops(graph: &mut String, ops: &[VideoOp]) {
    for op in ops {
        match op {
            VideoOp::Crop(r) => {
                let _ = write!(graph, ",crop={}:{}:{}:{}", r.width, r.height, r.x, r.y);
            }
            VideoOp::Scale(s) => {
                let _ = write!(graph, ",scale={}:{}", s.width, s.height);
            }
            VideoOp::BoxBlur { radius, power } => {
                let _ = write!(graph, ",boxblur={}:{}", radius, power);
            }
        }
    }
}

fn cell_chain(graph: &mut String, cell: &CellGraph, fps: u32) {
    let i = cell.input_index;
    let input = format!("[{}:v]setpts=PTS-STARTPTS,fps={}", i, fps);

    match &cell.background {
        Some(background) => {
            let _ = write!(graph, "{},split=2[bg{i}in][fg{i}in];", input);
            let _ = write!(graph, "[bg{i}in]null");
            write_ops(graph, background);
            let _ = write!(graph, ",setsar=1[bg{i}];");
            let _ = write!(graph, "[fg{i}in]null");
            write_ops(graph, &cell.foreground);
            let _ = write!(graph, ",setsar=1[fg{i}];");
            let _ = write!(
                graph,
                "[bg{i}][fg{i}]overlay={}:{}[cell{i}];",
                cell.foreground_offset.x, cell.foreground_offset.y
            );
        }
        None => {
            graph.push_str(&input);
            write_ops(graph, &cell.foreground);
            let _ = write!(graph, ",setsar=1[cell{i}];");
        }
    }
}

/// Black canvas with each cell overlaid at its placement, plus the audio mix
pub fn filter_graph(job: &RenderJob) -> String {
    let mut graph = String::new();
    let _ = write!(
        graph,
        "color=c=black:s={}x{}:r={}:d={:.3}[base];",
        job.canvas.width, job.canvas.height, job.encode.fps, job.duration
    );

    for cell in &job.cells {
        cell_chain(&mut graph, cell, job.encode.fps);
    }

    let mut previous = "base".to_string();
    for (n, cell) in job.cells.iter().enumerate() {
        let label = if n + 1 == job.cells.len() {
            "vout".to_string()
        } else {
            format!("stage{}", n)
        };
        let _ = write!(
            graph,
            "[{}][cell{}]overlay={}:{}[{}];",
            previous, cell.input_index, cell.placement.x, cell.placement.y, label
        );
        previous = label;
    }

    if let Some(audio) = &job.audio {
        for input in &audio.inputs {
            let _ = write!(
                graph,
                "[{i}:a]aresample={rate},aformat=sample_fmts=fltp:channel_layouts=stereo,volume={gain:.3}dB[a{i}];",
                i = input.input_index,
                rate = audio.sample_rate,
                gain = input.gain_db
            );
        }
        for input in &audio.inputs {
            let _ = write!(graph, "[a{}]", input.input_index);
        }
        if audio.inputs.len() > 1 {
            let _ = write!(
                graph,
                "amix=inputs={}:duration=longest:normalize=0,",
                audio.inputs.len()
            );
        } else {
            graph.push_str("anull,");
        }
        let _ = write!(graph, "volume={:.3}dB[aout]", audio.output_gain_db);
    }

    graph.trim_end_matches(';').to_string()
}

/// Map a failed invocation to a retryable or permanent engine error
pub fn classify_failure(exit_code: Option<i32>, stderr: &str) -> EngineError {
    let lowered = stderr.to_lowercase();
    let summary = stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("no diagnostic output")
        .trim()
        .to_string();

    // Killed by a signal
    let Some(code) = exit_code else {
        return EngineError::retryable(format!("ffmpeg terminated by signal: {}", summary));
    };

    // Input problems win over incidental I/O noise in the same log
    let message = format!("ffmpeg exited with {}: {}", code, summary);
    if PERMANENT_MARKERS.iter().any(|m| lowered.contains(m)) {
        return EngineError::permanent(message);
    }
    if TRANSIENT_MARKERS.iter().any(|m| lowered.contains(m)) {
        return EngineError::retryable(message);
    }
    EngineError::permanent(message)
}

#[async_trait]
impl RenderEngine for FfmpegEngine {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn render(&self, job: &RenderJob, output: &Path) -> Result<(), EngineError> {
        let args = self.build_args(job, output);
        debug!("ffmpeg {}", args.join(" "));

        let result = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(EngineError::NotAvailable {
                    engine: self.ffmpeg_path.display().to_string(),
                });
            }
            Err(e) => return Err(EngineError::retryable(format!("failed to spawn ffmpeg: {}", e))),
        };

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(classify_failure(output.status.code(), &stderr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::VideoAsset;
    use crate::composition::CompositionPlanner;
    use crate::config::Config;
    use crate::manifest::AssetRef;
    use crate::render::job::{AudioInput, AudioMix, EncodeSettings};

    fn job() -> RenderJob {
        let config = Config::default();
        let planner = CompositionPlanner::from_config(&config).unwrap();
        let a = AssetRef::from(&VideoAsset::new("A", "clips/A.mp4", 10.0, 1920, 1080));
        let b = AssetRef::from(&VideoAsset::new("B", "clips/B.mp4", 12.0, 1080, 960));
        let plan = planner.plan_one_off("pair_AB", &a, &b, None, None, -14.0).unwrap();
        RenderJob::build(
            &plan,
            None,
            48000,
            EncodeSettings::from_config(&config.canvas, &config.render),
        )
    }

    #[test]
    fn test_filter_graph_layout() {
        let graph = filter_graph(&job());
        assert!(graph.starts_with("color=c=black:s=1080x1920:r=30:d=10.000[base];"));
        assert!(graph.contains("boxblur=20:10"));
        assert!(graph.contains("[bg0][fg0]overlay=0:176[cell0]"));
        assert!(graph.contains("[base][cell0]overlay=0:0[stage0]"));
        assert!(graph.contains("[stage0][cell1]overlay=0:960[vout]"));
        assert!(!graph.contains("[aout]"));
        assert!(!graph.ends_with(';'));
    }

    #[test]
    fn test_args_without_audio() {
        let args = FfmpegEngine::default().build_args(&job(), Path::new("out/.pair_AB.rendering.mp4"));
        assert!(args.contains(&"-an".to_string()));
        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 2);
        assert_eq!(args.last().unwrap(), "out/.pair_AB.rendering.mp4");
        assert!(args.windows(2).any(|w| w[0] == "-t" && w[1] == "10.000"));
    }

    #[test]
    fn test_audio_mix_graph() {
        let mut job = job();
        job.audio = Some(AudioMix {
            inputs: vec![
                AudioInput {
                    role: crate::manifest::CellRole::Top,
                    input_index: 0,
                    gain_db: 2.5,
                },
                AudioInput {
                    role: crate::manifest::CellRole::Bottom,
                    input_index: 1,
                    gain_db: -1.0,
                },
            ],
            output_gain_db: -3.0,
            sample_rate: 48000,
        });
        let graph = filter_graph(&job);
        assert!(graph.contains("volume=2.500dB[a0]"));
        assert!(graph.contains("[a0][a1]amix=inputs=2:duration=longest:normalize=0,volume=-3.000dB[aout]"));

        let args = FfmpegEngine::default().build_args(&job, Path::new("o.mp4"));
        assert!(args.windows(2).any(|w| w[0] == "-map" && w[1] == "[aout]"));
        assert!(!args.contains(&"-an".to_string()));
    }

    #[test]
    fn test_failure_classification() {
        assert!(classify_failure(None, "").is_retryable());
        assert!(classify_failure(Some(1), "Error: No space left on device").is_retryable());
        assert!(!classify_failure(Some(1), "clips/A.mp4: Invalid data found when processing input").is_retryable());
        assert!(!classify_failure(Some(1), "something odd").is_retryable());
        assert!(!classify_failure(
            Some(1),
            "A.mp4: No such file or directory\nInput/output error"
        )
        .is_retryable());
    }

    #[tokio::test]
    async fn test_missing_binary_is_not_available() {
        let engine = FfmpegEngine::new("/nonexistent/ffmpeg");
        let dir = tempfile::tempdir().unwrap();
        let result = engine.render(&job(), &dir.path().join("o.mp4")).await;
        assert!(matches!(result, Err(EngineError::NotAvailable { .. })));
        assert!(!engine.check_available().await);
    }
}
