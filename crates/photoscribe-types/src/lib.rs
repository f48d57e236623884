use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

// ──────────────────── Item Types ────────────────────

/// Kind of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// Directly describable raster image (JPEG, PNG, ...).
    Image,
    /// HEIC/HEIF source; described through a converted JPEG.
    Heic,
    /// Video source; described through extracted frames.
    Video,
    /// Frame extracted from a video item.
    VideoFrame,
}

impl ItemKind {
    /// Whether items of this kind are sent to a vision provider directly.
    pub fn is_describable(self) -> bool {
        matches!(self, ItemKind::Image | ItemKind::VideoFrame)
    }

    /// Whether items of this kind produce derived items instead of being
    /// described themselves.
    pub fn needs_conversion(self) -> bool {
        matches!(self, ItemKind::Heic | ItemKind::Video)
    }
}

/// Processing status of a work item.
///
/// Transitions are monotone within a run: `pending → processing →
/// {completed, failed}`. A `processing` status must never survive a program
/// exit; loaders normalize it back to `pending`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl ItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ItemStatus::Completed | ItemStatus::Failed | ItemStatus::Skipped
        )
    }
}

/// Token accounting for one provider call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// One provider attempt. Retained permanently once appended to an item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptionRecord {
    /// Provider id that produced this attempt.
    pub provider: String,
    /// Model identifier used for the call.
    pub model: String,
    /// Named prompt style from the run configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_style: Option<String>,
    /// Description text. An empty string with no error is a valid terminal
    /// outcome: the provider returned successfully but produced no content.
    #[serde(default)]
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub processing_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
}

impl DescriptionRecord {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Provider succeeded but returned no content. Counted separately from
    /// failures in summaries.
    pub fn is_empty_success(&self) -> bool {
        self.error.is_none() && self.text.is_empty()
    }
}

/// GPS coordinates extracted from EXIF data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsCoordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Capture metadata attached by the enrichment step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureMetadata {
    /// EXIF capture time. Naive because EXIF carries no timezone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taken_at: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_make: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gps: Option<GpsCoordinates>,
}

/// One discovered or derived file tracked in the workspace document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Stable id: hex SHA-256 of the normalized relative path.
    pub id: String,
    /// Normalized (forward-slash) path relative to the scan root. Also the
    /// document map key.
    pub relative_path: String,
    /// Absolute path on disk.
    pub source_path: PathBuf,
    pub kind: ItemKind,
    /// Provenance link to the item this one was derived from (video →
    /// frame, HEIC → converted JPEG). Never used for lifecycle control.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived_from: Option<String>,
    #[serde(default)]
    pub status: ItemStatus,
    /// Insertion-ordered provider attempts; never reordered or deduplicated.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub descriptions: Vec<DescriptionRecord>,
    /// Item-level error (unreadable file, conversion failure).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Place name resolved from GPS coordinates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture: Option<CaptureMetadata>,
    /// Fields written by newer schema versions, preserved on round-trip.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ──────────────────── Run Configuration ────────────────────

/// Recognized provider call options. Unsupported names for a given provider
/// are ignored, not errors; unrecognized names flow into `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderOptions {
    /// Sampling randomness.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Response length cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Per-call deadline override in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Provider-specific knobs.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Retry budget and backoff shape for provider calls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per item per run, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff delay before the given retry, capped at
    /// `max_delay_ms`. `attempt` is 1-based; the delay precedes attempt
    /// `attempt + 1`.
    pub fn delay_before_retry(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

/// Settings for HEIC conversion and video frame extraction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConversionSettings {
    /// Seconds between extracted video frames.
    #[serde(default = "default_frame_interval")]
    pub frame_interval_secs: u64,
    /// Upper bound on frames extracted per video.
    #[serde(default = "default_max_frames")]
    pub max_frames: u32,
}

fn default_frame_interval() -> u64 {
    10
}

fn default_max_frames() -> u32 {
    8
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self {
            frame_interval_secs: default_frame_interval(),
            max_frames: default_max_frames(),
        }
    }
}

/// Immutable snapshot of a run's settings, captured when the workspace
/// document is created. A resumed run re-uses this snapshot so semantics
/// cannot silently change mid-job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfiguration {
    /// Media root this workspace was created over. Resumed runs re-scan
    /// this root, not whatever the CLI was pointed at.
    pub root: PathBuf,
    /// Provider id to dispatch to.
    pub provider: String,
    /// Model identifier.
    pub model: String,
    #[serde(default = "default_prompt_style")]
    pub prompt_style: String,
    /// Prompt text sent with every image.
    pub prompt: String,
    /// Bounded worker pool size.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub recursive: bool,
    /// Per-call wall-clock deadline in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub conversion: ConversionSettings,
    #[serde(default)]
    pub options: ProviderOptions,
}

fn default_prompt_style() -> String {
    "detailed".to_string()
}

fn default_workers() -> usize {
    2
}

fn default_timeout_secs() -> u64 {
    120
}
