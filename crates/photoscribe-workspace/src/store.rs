//! Serialized writer around the workspace document file.
//!
//! The engine exclusively owns write access through this store. Every
//! mutation takes the single writer lock, applies one state transition, and
//! persists with a write-to-temp-then-atomic-rename so a crash during write
//! never corrupts the previous valid document.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::sync::Mutex;

use photoscribe_discovery::Candidate;
use photoscribe_types::{CaptureMetadata, DescriptionRecord, ItemStatus, RunConfiguration, WorkItem};

use crate::document::{DocumentSummary, SCHEMA_VERSION, WorkspaceDocument};

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Workspace document at {path} is corrupt: {source}. Refusing to overwrite; move the file aside to start fresh")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Workspace document version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },
    #[error("Workspace document not found: {0}")]
    NotFound(PathBuf),
    #[error("Workspace document already exists: {0}")]
    AlreadyExists(PathBuf),
    #[error("Unknown item: {0}")]
    ItemNotFound(String),
    #[error("Invalid status transition {from:?} → {to:?} for item {key}")]
    InvalidTransition {
        key: String,
        from: ItemStatus,
        to: ItemStatus,
    },
}

/// Outcome of merging discovery candidates into the document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Newly appended items.
    pub added: usize,
    /// Of those, items recorded as failed on entry (zero-byte, unreadable).
    pub failed_on_entry: usize,
}

/// Single-writer handle over a workspace document file.
#[derive(Debug)]
pub struct WorkspaceStore {
    path: PathBuf,
    inner: Mutex<WorkspaceDocument>,
}

impl WorkspaceStore {
    /// Create a new workspace document at `path`. Fails if one exists.
    pub fn create(path: &Path, configuration: RunConfiguration) -> Result<Self, WorkspaceError> {
        if path.exists() {
            return Err(WorkspaceError::AlreadyExists(path.to_path_buf()));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let document = WorkspaceDocument::new(configuration);
        persist(path, &document)?;
        tracing::info!(path = %path.display(), "Created workspace document");
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(document),
        })
    }

    /// Load an existing workspace document, applying crash recovery: any
    /// item found `processing` is reset to `pending` and the normalized
    /// state is persisted.
    pub fn load(path: &Path) -> Result<Self, WorkspaceError> {
        let mut document = read_document(path)?;
        let recovered = document.recover_interrupted();
        if recovered > 0 {
            tracing::info!(
                path = %path.display(),
                recovered,
                "Recovered interrupted items from previous run"
            );
            persist(path, &document)?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(document),
        })
    }

    /// Load if present, otherwise create. A corrupt existing document is a
    /// loud error, never silently replaced: starting fresh would duplicate
    /// already-billed provider calls.
    pub fn load_or_create(
        path: &Path,
        configuration: RunConfiguration,
    ) -> Result<Self, WorkspaceError> {
        if path.exists() {
            Self::load(path)
        } else {
            Self::create(path, configuration)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read-only snapshot of the document.
    pub async fn document(&self) -> WorkspaceDocument {
        self.inner.lock().await.clone()
    }

    pub async fn summary(&self) -> DocumentSummary {
        self.inner.lock().await.summary()
    }

    /// The run configuration snapshot.
    pub async fn configuration(&self) -> RunConfiguration {
        self.inner.lock().await.configuration.clone()
    }

    /// Append newly discovered candidates. Existing items are never
    /// removed or mutated, even if their source file has disappeared;
    /// historical descriptions are preserved. Zero-byte and unreadable
    /// candidates enter as `failed` with a descriptive error.
    pub async fn merge_candidates(
        &self,
        candidates: &[Candidate],
    ) -> Result<MergeReport, WorkspaceError> {
        let mut doc = self.inner.lock().await;
        let mut report = MergeReport::default();

        for candidate in candidates {
            if doc.items.contains_key(&candidate.relative_path) {
                continue;
            }

            let (status, error) = if let Some(err) = &candidate.read_error {
                (ItemStatus::Failed, Some(err.clone()))
            } else if candidate.size == 0 {
                (
                    ItemStatus::Failed,
                    Some("Zero-byte file, nothing to describe".to_string()),
                )
            } else {
                (ItemStatus::Pending, None)
            };
            if status == ItemStatus::Failed {
                report.failed_on_entry += 1;
            }

            let item = WorkItem {
                id: candidate.id.clone(),
                relative_path: candidate.relative_path.clone(),
                source_path: candidate.source_path.clone(),
                kind: candidate.kind,
                derived_from: candidate.derived_from.clone(),
                status,
                descriptions: Vec::new(),
                error,
                location: None,
                capture: None,
                extra: serde_json::Map::new(),
            };
            doc.items.insert(candidate.relative_path.clone(), item);
            report.added += 1;
        }

        if report.added > 0 {
            persist(&self.path, &doc)?;
        }
        tracing::debug!(
            added = report.added,
            failed_on_entry = report.failed_on_entry,
            "Merged discovery candidates"
        );
        Ok(report)
    }

    /// Transition an item `pending → processing` and persist the marker
    /// BEFORE the provider call, so a crash mid-call leaves a recoverable
    /// marker instead of silent loss. Rejects any other starting status,
    /// which also enforces at-most-one-in-flight per item.
    pub async fn begin_processing(&self, key: &str) -> Result<WorkItem, WorkspaceError> {
        let mut doc = self.inner.lock().await;
        let item = doc
            .items
            .get_mut(key)
            .ok_or_else(|| WorkspaceError::ItemNotFound(key.to_string()))?;
        if item.status != ItemStatus::Pending {
            return Err(WorkspaceError::InvalidTransition {
                key: key.to_string(),
                from: item.status,
                to: ItemStatus::Processing,
            });
        }
        item.status = ItemStatus::Processing;
        let snapshot = item.clone();
        persist(&self.path, &doc)?;
        Ok(snapshot)
    }

    /// Append one provider attempt to an item's history and persist.
    /// Records are insertion-ordered and never deduplicated; failed
    /// attempts are retained alongside the eventual success.
    pub async fn append_record(
        &self,
        key: &str,
        record: DescriptionRecord,
    ) -> Result<(), WorkspaceError> {
        let mut doc = self.inner.lock().await;
        let item = doc
            .items
            .get_mut(key)
            .ok_or_else(|| WorkspaceError::ItemNotFound(key.to_string()))?;
        item.descriptions.push(record);
        persist(&self.path, &doc)?;
        Ok(())
    }

    /// Move an item to a terminal status and persist.
    ///
    /// Valid transitions: `processing → completed | failed`, and
    /// `pending → failed | skipped` for items that never reach a provider
    /// (conversion failures, video/HEIC sources).
    pub async fn finish(
        &self,
        key: &str,
        status: ItemStatus,
        error: Option<String>,
    ) -> Result<(), WorkspaceError> {
        let mut doc = self.inner.lock().await;
        let item = doc
            .items
            .get_mut(key)
            .ok_or_else(|| WorkspaceError::ItemNotFound(key.to_string()))?;

        let valid = matches!(
            (item.status, status),
            (ItemStatus::Processing, ItemStatus::Completed)
                | (ItemStatus::Processing, ItemStatus::Failed)
                | (ItemStatus::Pending, ItemStatus::Failed)
                | (ItemStatus::Pending, ItemStatus::Skipped)
        );
        if !valid {
            return Err(WorkspaceError::InvalidTransition {
                key: key.to_string(),
                from: item.status,
                to: status,
            });
        }

        item.status = status;
        if error.is_some() {
            item.error = error;
        }
        persist(&self.path, &doc)?;
        Ok(())
    }

    /// Re-enqueue failed items for an explicit retry pass. Returns how
    /// many were reset.
    pub async fn reset_failed(&self) -> Result<usize, WorkspaceError> {
        let mut doc = self.inner.lock().await;
        let mut reset = 0;
        for item in doc.items.values_mut() {
            if item.status == ItemStatus::Failed {
                item.status = ItemStatus::Pending;
                item.error = None;
                reset += 1;
            }
        }
        if reset > 0 {
            persist(&self.path, &doc)?;
        }
        tracing::info!(reset, "Re-enqueued failed items");
        Ok(reset)
    }

    /// Attach enrichment output to an item. Values already present are
    /// kept so the step stays idempotent.
    pub async fn set_enrichment(
        &self,
        key: &str,
        capture: Option<CaptureMetadata>,
        location: Option<String>,
    ) -> Result<(), WorkspaceError> {
        let mut doc = self.inner.lock().await;
        let item = doc
            .items
            .get_mut(key)
            .ok_or_else(|| WorkspaceError::ItemNotFound(key.to_string()))?;

        let mut changed = false;
        if item.capture.is_none() && capture.is_some() {
            item.capture = capture;
            changed = true;
        }
        if item.location.is_none() && location.is_some() {
            item.location = location;
            changed = true;
        }
        if changed {
            persist(&self.path, &doc)?;
        }
        Ok(())
    }
}

/// Read a workspace document without taking ownership of it. For report
/// generators and other read-only consumers; no crash-recovery
/// normalization is applied.
pub fn read_document(path: &Path) -> Result<WorkspaceDocument, WorkspaceError> {
    if !path.exists() {
        return Err(WorkspaceError::NotFound(path.to_path_buf()));
    }
    let content = fs::read_to_string(path)?;
    let document: WorkspaceDocument =
        serde_json::from_str(&content).map_err(|source| WorkspaceError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
    if document.version > SCHEMA_VERSION {
        return Err(WorkspaceError::UnsupportedVersion {
            found: document.version,
            supported: SCHEMA_VERSION,
        });
    }
    Ok(document)
}

/// Write the document to a temp sibling, fsync, then rename over the
/// target. The previous valid document survives a crash at any point.
fn persist(path: &Path, document: &WorkspaceDocument) -> Result<(), WorkspaceError> {
    let tmp = path.with_extension("json.tmp");
    let content = serde_json::to_string_pretty(document)
        .map_err(|e| WorkspaceError::Io(std::io::Error::other(e)))?;
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use photoscribe_types::ItemKind;

    fn config() -> RunConfiguration {
        serde_json::from_value(serde_json::json!({
            "root": "/data",
            "provider": "stub",
            "model": "test-model",
            "prompt": "Describe this image in detail."
        }))
        .unwrap()
    }

    fn candidate(rel: &str, size: u64) -> Candidate {
        Candidate::discovered(
            rel.to_string(),
            format!("/data/{rel}").into(),
            ItemKind::Image,
            size,
        )
    }

    fn record(text: &str, error: Option<&str>) -> DescriptionRecord {
        DescriptionRecord {
            provider: "stub".into(),
            model: "test-model".into(),
            prompt_style: None,
            text: text.into(),
            created_at: Utc::now(),
            processing_time_ms: 5,
            error: error.map(String::from),
            token_usage: None,
        }
    }

    #[tokio::test]
    async fn test_create_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workspace.json");

        let store = WorkspaceStore::create(&path, config()).unwrap();
        store
            .merge_candidates(&[candidate("a.jpg", 10), candidate("b.jpg", 10)])
            .await
            .unwrap();
        drop(store);

        let reloaded = WorkspaceStore::load(&path).unwrap();
        let doc = reloaded.document().await;
        assert_eq!(doc.items.len(), 2);
        assert_eq!(doc.configuration.provider, "stub");
    }

    #[tokio::test]
    async fn test_create_refuses_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workspace.json");
        WorkspaceStore::create(&path, config()).unwrap();
        let err = WorkspaceStore::create(&path, config()).unwrap_err();
        assert!(matches!(err, WorkspaceError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_corrupt_document_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workspace.json");
        fs::write(&path, "{not valid json").unwrap();

        let err = WorkspaceStore::load(&path).unwrap_err();
        assert!(matches!(err, WorkspaceError::Corrupt { .. }));
        let err = WorkspaceStore::load_or_create(&path, config()).unwrap_err();
        assert!(matches!(err, WorkspaceError::Corrupt { .. }));

        // The unparseable file must survive untouched.
        assert_eq!(fs::read_to_string(&path).unwrap(), "{not valid json");
    }

    #[tokio::test]
    async fn test_newer_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workspace.json");
        let store = WorkspaceStore::create(&path, config()).unwrap();
        drop(store);

        let mut raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        raw["version"] = serde_json::json!(99);
        fs::write(&path, serde_json::to_string(&raw).unwrap()).unwrap();

        let err = WorkspaceStore::load(&path).unwrap_err();
        assert!(matches!(
            err,
            WorkspaceError::UnsupportedVersion { found: 99, .. }
        ));
    }

    #[tokio::test]
    async fn test_processing_marker_recovered_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workspace.json");
        let store = WorkspaceStore::create(&path, config()).unwrap();
        store
            .merge_candidates(&[candidate("a.jpg", 10)])
            .await
            .unwrap();
        store.begin_processing("a.jpg").await.unwrap();
        // Simulate a crash: drop without finishing.
        drop(store);

        let reloaded = WorkspaceStore::load(&path).unwrap();
        let doc = reloaded.document().await;
        assert_eq!(doc.items["a.jpg"].status, ItemStatus::Pending);
    }

    #[tokio::test]
    async fn test_merge_is_append_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workspace.json");
        let store = WorkspaceStore::create(&path, config()).unwrap();
        store
            .merge_candidates(&[candidate("a.jpg", 10)])
            .await
            .unwrap();
        store.begin_processing("a.jpg").await.unwrap();
        store
            .append_record("a.jpg", record("a photo", None))
            .await
            .unwrap();
        store
            .finish("a.jpg", ItemStatus::Completed, None)
            .await
            .unwrap();

        // Re-merging the same candidate plus a new one leaves the
        // completed item untouched.
        let report = store
            .merge_candidates(&[candidate("a.jpg", 10), candidate("b.jpg", 10)])
            .await
            .unwrap();
        assert_eq!(report.added, 1);

        let doc = store.document().await;
        assert_eq!(doc.items["a.jpg"].status, ItemStatus::Completed);
        assert_eq!(doc.items["a.jpg"].descriptions.len(), 1);
        assert_eq!(doc.items["b.jpg"].status, ItemStatus::Pending);
    }

    #[tokio::test]
    async fn test_zero_byte_candidate_fails_on_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workspace.json");
        let store = WorkspaceStore::create(&path, config()).unwrap();

        let report = store
            .merge_candidates(&[candidate("empty.jpg", 0)])
            .await
            .unwrap();
        assert_eq!(report.failed_on_entry, 1);

        let doc = store.document().await;
        let item = &doc.items["empty.jpg"];
        assert_eq!(item.status, ItemStatus::Failed);
        assert!(item.error.as_deref().unwrap().contains("Zero-byte"));
    }

    #[tokio::test]
    async fn test_double_begin_processing_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workspace.json");
        let store = WorkspaceStore::create(&path, config()).unwrap();
        store
            .merge_candidates(&[candidate("a.jpg", 10)])
            .await
            .unwrap();

        store.begin_processing("a.jpg").await.unwrap();
        let err = store.begin_processing("a.jpg").await.unwrap_err();
        assert!(matches!(err, WorkspaceError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_completed_items_cannot_regress() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workspace.json");
        let store = WorkspaceStore::create(&path, config()).unwrap();
        store
            .merge_candidates(&[candidate("a.jpg", 10)])
            .await
            .unwrap();
        store.begin_processing("a.jpg").await.unwrap();
        store
            .finish("a.jpg", ItemStatus::Completed, None)
            .await
            .unwrap();

        let err = store
            .finish("a.jpg", ItemStatus::Failed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_reset_failed_reenqueues() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workspace.json");
        let store = WorkspaceStore::create(&path, config()).unwrap();
        store
            .merge_candidates(&[candidate("a.jpg", 10), candidate("b.jpg", 10)])
            .await
            .unwrap();
        store.begin_processing("a.jpg").await.unwrap();
        store
            .finish("a.jpg", ItemStatus::Failed, Some("timeout".into()))
            .await
            .unwrap();

        let reset = store.reset_failed().await.unwrap();
        assert_eq!(reset, 1);
        let doc = store.document().await;
        assert_eq!(doc.items["a.jpg"].status, ItemStatus::Pending);
        assert!(doc.items["a.jpg"].error.is_none());
    }

    #[tokio::test]
    async fn test_unknown_fields_survive_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workspace.json");
        let store = WorkspaceStore::create(&path, config()).unwrap();
        store
            .merge_candidates(&[candidate("a.jpg", 10)])
            .await
            .unwrap();
        drop(store);

        // A newer version writes fields this version does not know about.
        let mut raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        raw["report_theme"] = serde_json::json!("dark");
        raw["items"]["a.jpg"]["face_count"] = serde_json::json!(3);
        fs::write(&path, serde_json::to_string(&raw).unwrap()).unwrap();

        let store = WorkspaceStore::load(&path).unwrap();
        store
            .merge_candidates(&[candidate("b.jpg", 10)])
            .await
            .unwrap();
        drop(store);

        let reread: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(reread["report_theme"], "dark");
        assert_eq!(reread["items"]["a.jpg"]["face_count"], 3);
    }

    #[tokio::test]
    async fn test_enrichment_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workspace.json");
        let store = WorkspaceStore::create(&path, config()).unwrap();
        store
            .merge_candidates(&[candidate("a.jpg", 10)])
            .await
            .unwrap();

        store
            .set_enrichment("a.jpg", None, Some("Lisbon, Portugal".into()))
            .await
            .unwrap();
        store
            .set_enrichment("a.jpg", None, Some("Somewhere else".into()))
            .await
            .unwrap();

        let doc = store.document().await;
        assert_eq!(doc.items["a.jpg"].location.as_deref(), Some("Lisbon, Portugal"));
    }
}
