//! Per-item describe worker: retry loop, attempt records, terminal status.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use photoscribe_providers::{DescribeRequest, DescribeResult, FailureKind, VisionProvider};
use photoscribe_types::{DescriptionRecord, ItemStatus, RunConfiguration, WorkItem};
use photoscribe_workspace::WorkspaceStore;

/// Terminal outcome of one item, fed into the run report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ItemOutcome {
    Completed { empty_text: bool },
    Failed,
}

/// MIME type for a describable file, from its extension.
pub(crate) fn mime_for(path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        _ => "application/octet-stream",
    }
    .to_string()
}

/// Drive one item already marked `processing` to a terminal status.
///
/// Each provider attempt is appended to the item's history and persisted
/// before the next one starts; failed attempts are retained alongside an
/// eventual success. Retryable failures consume the retry budget with
/// exponential backoff; permanent failures stop immediately.
pub(crate) async fn process_item(
    store: Arc<WorkspaceStore>,
    provider: Arc<dyn VisionProvider>,
    config: RunConfiguration,
    item: WorkItem,
) -> ItemOutcome {
    let key = item.relative_path.clone();

    let image = match tokio::fs::read(&item.source_path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            // Local I/O failure: fatal for this item, never for the run.
            tracing::warn!(item = %key, "Failed to read source file: {e}");
            finish(&store, &key, ItemStatus::Failed, Some(format!("Failed to read file: {e}"))).await;
            return ItemOutcome::Failed;
        }
    };

    let mime_type = mime_for(&item.source_path);
    let timeout = Duration::from_secs(
        config
            .options
            .timeout_secs
            .unwrap_or(config.timeout_secs)
            .max(1),
    );

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let request = DescribeRequest {
            image: image.clone(),
            mime_type: mime_type.clone(),
            model: config.model.clone(),
            prompt: config.prompt.clone(),
            options: config.options.clone(),
        };

        let started = Instant::now();
        let result = match tokio::time::timeout(timeout, provider.describe(request)).await {
            Ok(result) => result,
            Err(_) => DescribeResult::failed(
                FailureKind::Timeout,
                format!("Call exceeded {}s deadline", timeout.as_secs()),
            ),
        };
        let processing_time_ms = started.elapsed().as_millis() as u64;

        let record = DescriptionRecord {
            provider: provider.id().to_string(),
            model: config.model.clone(),
            prompt_style: Some(config.prompt_style.clone()),
            text: result.text.clone(),
            created_at: Utc::now(),
            processing_time_ms,
            error: result.failure.as_ref().map(|f| f.to_string()),
            token_usage: result.token_usage,
        };
        if let Err(e) = store.append_record(&key, record).await {
            tracing::error!(item = %key, "Failed to persist attempt record: {e}");
        }

        match result.failure {
            None => {
                let empty_text = result.text.is_empty();
                if empty_text {
                    tracing::info!(item = %key, "Provider returned empty content (counted as empty-text success)");
                }
                finish(&store, &key, ItemStatus::Completed, None).await;
                return ItemOutcome::Completed { empty_text };
            }
            Some(failure) if failure.kind.is_retryable() && attempt < config.retry.max_attempts => {
                let delay = config.retry.delay_before_retry(attempt);
                tracing::warn!(
                    item = %key,
                    attempt,
                    max_attempts = config.retry.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Retryable provider failure, backing off: {failure}"
                );
                tokio::time::sleep(delay).await;
            }
            Some(failure) => {
                if !failure.kind.is_retryable() {
                    tracing::error!(item = %key, "Permanent provider failure: {failure}");
                }
                finish(&store, &key, ItemStatus::Failed, Some(failure.to_string())).await;
                return ItemOutcome::Failed;
            }
        }
    }
}

async fn finish(store: &WorkspaceStore, key: &str, status: ItemStatus, error: Option<String>) {
    if let Err(e) = store.finish(key, status, error).await {
        tracing::error!(item = %key, "Failed to persist terminal status: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_for_common_extensions() {
        assert_eq!(mime_for(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(mime_for(Path::new("b.png")), "image/png");
        assert_eq!(mime_for(Path::new("frame_0001.jpg")), "image/jpeg");
        assert_eq!(mime_for(Path::new("odd.xyz")), "application/octet-stream");
    }
}
