use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::catalog::types::{AssetCatalog, AssetFlags, VideoAsset};
use crate::error::{InputError, Result};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "mkv", "webm", "m4v"];

/// FFprobe JSON output format
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

/// Builds catalogs by scanning clip directories with ffprobe
pub struct CatalogLoader {
    ffprobe: PathBuf,
}

impl Default for CatalogLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogLoader {
    pub fn new() -> Self {
        Self {
            ffprobe: PathBuf::from("ffprobe"),
        }
    }

    pub fn with_ffprobe<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.ffprobe = path.into();
        self
    }

    /// Load a catalog from a JSON file or by scanning a directory
    pub async fn load<P: AsRef<Path>>(&self, source: P) -> Result<AssetCatalog> {
        let source = source.as_ref();
        if source.is_dir() {
            self.scan_directory(source).await
        } else {
            AssetCatalog::from_json_file(source)
        }
    }

    /// Recursively scan a directory for video files and probe each one
    pub async fn scan_directory<P: AsRef<Path>>(&self, dir: P) -> Result<AssetCatalog> {
        let dir = dir.as_ref();
        info!("📂 Scanning clips in {:?}", dir);

        let mut files = Vec::new();
        collect_video_files(dir, &mut files)?;
        files.sort();
        let files = unique_stems(files);

        let mut assets = Vec::with_capacity(files.len());
        for path in files {
            match self.probe(&path).await {
                Ok(asset) => assets.push(asset),
                Err(e) => warn!("Skipping {}: {}", path.display(), e),
            }
        }

        info!("   Found {} usable clips", assets.len());
        AssetCatalog::new(assets)
    }

    /// Probe a single clip and build its asset record (id = file stem)
    pub async fn probe<P: AsRef<Path>>(&self, path: P) -> Result<VideoAsset> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(InputError::AssetNotFound {
                path: path.display().to_string(),
            }
            .into());
        }

        let probe_failed = |reason: String| InputError::ProbeFailed {
            path: path.display().to_string(),
            reason,
        };

        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| probe_failed(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(probe_failed(stderr.trim().to_string()).into());
        }

        let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| probe_failed(format!("invalid ffprobe output: {}", e)))?;

        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| probe_failed("file name is not valid UTF-8".to_string()))?
            .to_string();

        let asset = asset_from_probe(id, path, &parsed)?;
        debug!(
            "Probed {}: {}x{} {:.2}s audio={}",
            asset.id, asset.width, asset.height, asset.duration, asset.flags.has_audio
        );
        Ok(asset)
    }
}

fn asset_from_probe(id: String, path: &Path, probe: &FfprobeOutput) -> Result<VideoAsset> {
    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| InputError::InvalidMetadata {
            asset_id: id.clone(),
            details: "no video stream".to_string(),
        })?;

    let has_audio = probe.streams.iter().any(|s| s.codec_type == "audio");

    // Stream duration is missing for some containers, fall back to the format duration
    let duration = video
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| *d > 0.0)
        .or_else(|| {
            probe
                .format
                .as_ref()
                .and_then(|f| f.duration.as_deref())
                .and_then(|d| d.parse::<f64>().ok())
        })
        .unwrap_or(0.0);

    let asset = VideoAsset {
        id,
        path: path.to_path_buf(),
        duration,
        width: video.width.unwrap_or(0),
        height: video.height.unwrap_or(0),
        source: None,
        flags: AssetFlags {
            normalized: true,
            has_audio,
        },
    };
    asset.validate()?;
    Ok(asset)
}

fn collect_video_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_video_files(&path, files)?;
        } else if is_video_file(&path) {
            files.push(path);
        }
    }
    Ok(())
}

/// Keep the first file per stem; ids come from stems and must be unique
fn unique_stems(files: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen: HashMap<String, PathBuf> = HashMap::new();
    let mut unique = Vec::with_capacity(files.len());
    for path in files {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        match seen.get(&stem) {
            Some(first) => warn!(
                "Skipping {}: id '{}' already taken by {}",
                path.display(),
                stem,
                first.display()
            ),
            None => {
                seen.insert(stem, path.clone());
                unique.push(path);
            }
        }
    }
    unique
}

/// Check the extension against the supported container list
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_video_extension_detection() {
        assert!(is_video_file(Path::new("clip.mp4")));
        assert!(is_video_file(Path::new("clip.MOV")));
        assert!(!is_video_file(Path::new("clip.wav")));
        assert!(!is_video_file(Path::new("clip")));
    }

    #[test]
    fn test_collect_nested_video_files() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("viral");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(dir.path().join("a.mp4"), b"x").unwrap();
        std::fs::write(nested.join("b.mkv"), b"x").unwrap();
        std::fs::write(nested.join("notes.txt"), b"x").unwrap();

        let mut files = Vec::new();
        collect_video_files(dir.path(), &mut files).unwrap();
        files.sort();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_duplicate_stems_keep_first_path() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("viral");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(dir.path().join("a.mp4"), b"x").unwrap();
        std::fs::write(dir.path().join("b.mp4"), b"x").unwrap();
        std::fs::write(nested.join("a.mov"), b"x").unwrap();

        let mut files = Vec::new();
        collect_video_files(dir.path(), &mut files).unwrap();
        files.sort();
        let files = unique_stems(files);

        assert_eq!(files, vec![dir.path().join("a.mp4"), dir.path().join("b.mp4")]);
    }

    #[test]
    fn test_asset_from_ffprobe_falls_back_to_format_duration() {
        let probe: FfprobeOutput = serde_json::from_str(
            r#"{
                "format": {"duration": "12.480000"},
                "streams": [
                    {"codec_type": "video", "width": 1080, "height": 1920},
                    {"codec_type": "audio"}
                ]
            }"#,
        )
        .unwrap();

        let asset = asset_from_probe("B".into(), Path::new("B.mp4"), &probe).unwrap();
        assert_eq!(asset.width, 1080);
        assert_eq!(asset.height, 1920);
        assert!((asset.duration - 12.48).abs() < 1e-9);
        assert!(asset.flags.has_audio);
    }

    #[test]
    fn test_asset_from_ffprobe_without_video_stream() {
        let probe: FfprobeOutput =
            serde_json::from_str(r#"{"streams": [{"codec_type": "audio"}]}"#).unwrap();
        assert!(asset_from_probe("x".into(), Path::new("x.mp4"), &probe).is_err());
    }

    #[tokio::test]
    async fn test_inspect_missing_file() {
        let loader = CatalogLoader::new();
        let result = loader.probe("/nonexistent/clip.mp4").await;
        assert!(matches!(
            result,
            Err(crate::error::CompositorError::Input(InputError::AssetNotFound { .. }))
        ));
    }
}
