//! HEIC→JPEG conversion through heif-convert, with ffmpeg fallback.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use photoscribe_types::{ItemKind, WorkItem};

use crate::{ConvertError, DerivedFile, MediaConverter, run_tool, tool_available};

const TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Default)]
pub struct HeicConverter;

impl HeicConverter {
    pub fn new() -> Self {
        Self
    }
}

/// Deterministic JPEG target path for a HEIC source.
fn jpeg_target(out_dir: &Path, source: &WorkItem) -> PathBuf {
    let stem = source
        .source_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| source.id.clone());
    out_dir.join(&source.id).join(format!("{stem}.jpg"))
}

#[async_trait]
impl MediaConverter for HeicConverter {
    fn id(&self) -> &str {
        "heic-converter"
    }

    fn applies_to(&self, kind: ItemKind) -> bool {
        kind == ItemKind::Heic
    }

    async fn produce(
        &self,
        source: &WorkItem,
        out_dir: &Path,
    ) -> Result<Vec<DerivedFile>, ConvertError> {
        let target = jpeg_target(out_dir, source);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let src = source.source_path.display().to_string();
        let dst = target.display().to_string();

        if tool_available("heif-convert", "--version") {
            run_tool("heif-convert", &[src, dst], TIMEOUT).await?;
        } else if tool_available("ffmpeg", "-version") {
            let args = vec![
                "-hide_banner".to_string(),
                "-loglevel".to_string(),
                "error".to_string(),
                "-y".to_string(),
                "-i".to_string(),
                src,
                dst,
            ];
            run_tool("ffmpeg", &args, TIMEOUT).await?;
        } else {
            return Err(ConvertError::ToolMissing("heif-convert".to_string()));
        }

        if !target.exists() {
            return Err(ConvertError::NoOutput {
                tool: "heif-convert".to_string(),
                path: target,
            });
        }

        tracing::info!(source = %source.relative_path, "Converted HEIC to JPEG");

        Ok(vec![DerivedFile {
            path: target,
            kind: ItemKind::Image,
            source_id: source.id.clone(),
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use photoscribe_types::ItemStatus;

    fn heic_item(rel: &str) -> WorkItem {
        WorkItem {
            id: "sourceid".into(),
            relative_path: rel.into(),
            source_path: format!("/photos/{rel}").into(),
            kind: ItemKind::Heic,
            derived_from: None,
            status: ItemStatus::Pending,
            descriptions: vec![],
            error: None,
            location: None,
            capture: None,
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_target_naming_is_deterministic() {
        let item = heic_item("IMG_0042.HEIC");
        let a = jpeg_target(Path::new("/ws/derived"), &item);
        let b = jpeg_target(Path::new("/ws/derived"), &item);
        assert_eq!(a, b);
        assert_eq!(a, PathBuf::from("/ws/derived/sourceid/IMG_0042.jpg"));
    }

    #[test]
    fn test_applies_to_heic_only() {
        let converter = HeicConverter::new();
        assert!(converter.applies_to(ItemKind::Heic));
        assert!(!converter.applies_to(ItemKind::Image));
        assert!(!converter.applies_to(ItemKind::Video));
    }
}
