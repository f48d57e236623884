//! Video frame extraction through ffmpeg.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use photoscribe_types::{ConversionSettings, ItemKind, WorkItem};

use crate::{ConvertError, DerivedFile, MediaConverter, run_tool, tool_available};

const TOOL: &str = "ffmpeg";
const TIMEOUT: Duration = Duration::from_secs(300);

/// Extracts a bounded, evenly spaced frame sequence from a video.
pub struct FrameExtractor {
    settings: ConversionSettings,
}

impl FrameExtractor {
    pub fn new(settings: ConversionSettings) -> Self {
        Self { settings }
    }
}

fn frame_args(
    source: &Path,
    out_pattern: &Path,
    interval_secs: u64,
    max_frames: u32,
) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        source.display().to_string(),
        "-vf".into(),
        format!("fps=1/{}", interval_secs.max(1)),
        "-frames:v".into(),
        max_frames.to_string(),
        "-q:v".into(),
        "2".into(),
        out_pattern.display().to_string(),
    ]
}

#[async_trait]
impl MediaConverter for FrameExtractor {
    fn id(&self) -> &str {
        "frame-extractor"
    }

    fn applies_to(&self, kind: ItemKind) -> bool {
        kind == ItemKind::Video
    }

    async fn produce(
        &self,
        source: &WorkItem,
        out_dir: &Path,
    ) -> Result<Vec<DerivedFile>, ConvertError> {
        if !tool_available(TOOL, "-version") {
            return Err(ConvertError::ToolMissing(TOOL.to_string()));
        }

        let frame_dir = out_dir.join(&source.id);
        std::fs::create_dir_all(&frame_dir)?;
        let pattern = frame_dir.join("frame_%04d.jpg");

        let args = frame_args(
            &source.source_path,
            &pattern,
            self.settings.frame_interval_secs,
            self.settings.max_frames,
        );
        run_tool(TOOL, &args, TIMEOUT).await?;

        let frames = collect_frames(&frame_dir)?;
        if frames.is_empty() {
            return Err(ConvertError::NoOutput {
                tool: TOOL.to_string(),
                path: frame_dir,
            });
        }

        tracing::info!(
            source = %source.relative_path,
            frames = frames.len(),
            "Extracted video frames"
        );

        Ok(frames
            .into_iter()
            .map(|path| DerivedFile {
                path,
                kind: ItemKind::VideoFrame,
                source_id: source.id.clone(),
            })
            .collect())
    }
}

/// Sorted frame files under the output directory. Sorting keeps the frame
/// order stable across re-discovery.
fn collect_frames(dir: &Path) -> Result<Vec<PathBuf>, ConvertError> {
    let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("frame_") && n.ends_with(".jpg"))
                .unwrap_or(false)
        })
        .collect();
    frames.sort();
    Ok(frames)
}
