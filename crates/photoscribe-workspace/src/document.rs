//! The persisted workspace document: the durable aggregate root mapping
//! every discovered or derived item to its status and description history.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use photoscribe_types::{ItemStatus, RunConfiguration, WorkItem};

/// Current document schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Durable job state. Items are keyed by normalized relative path and kept
/// in insertion order: discovery order is the authoritative processing
/// order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceDocument {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    /// Immutable snapshot of the run's settings, captured at creation. A
    /// resumed run re-uses this so semantics cannot change mid-job.
    pub configuration: RunConfiguration,
    #[serde(default)]
    pub items: IndexMap<String, WorkItem>,
    /// Top-level fields from newer schema versions, preserved on
    /// round-trip.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl WorkspaceDocument {
    pub fn new(configuration: RunConfiguration) -> Self {
        Self {
            version: SCHEMA_VERSION,
            created_at: Utc::now(),
            configuration,
            items: IndexMap::new(),
            extra: serde_json::Map::new(),
        }
    }

    /// Reset any `processing` marker left behind by a crashed or killed
    /// process. Returns the number of recovered items.
    pub fn recover_interrupted(&mut self) -> usize {
        let mut recovered = 0;
        for item in self.items.values_mut() {
            if item.status == ItemStatus::Processing {
                item.status = ItemStatus::Pending;
                recovered += 1;
            }
        }
        recovered
    }

    pub fn summary(&self) -> DocumentSummary {
        let mut summary = DocumentSummary::default();
        for item in self.items.values() {
            summary.total += 1;
            match item.status {
                ItemStatus::Pending => summary.pending += 1,
                ItemStatus::Processing => summary.processing += 1,
                ItemStatus::Completed => summary.completed += 1,
                ItemStatus::Failed => summary.failed += 1,
                ItemStatus::Skipped => summary.skipped += 1,
            }
            if item
                .descriptions
                .iter()
                .any(|record| record.is_empty_success())
            {
                summary.empty_text += 1;
            }
        }
        summary
    }

    /// Keys of items derived from the given source item id.
    pub fn derived_of(&self, source_id: &str) -> Vec<&WorkItem> {
        self.items
            .values()
            .filter(|item| item.derived_from.as_deref() == Some(source_id))
            .collect()
    }
}

/// Per-status counts. Empty-text successes are surfaced separately so
/// silent content loss is visible, distinct from failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DocumentSummary {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub empty_text: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use photoscribe_types::{DescriptionRecord, ItemKind};

    fn config() -> RunConfiguration {
        serde_json::from_value(serde_json::json!({
            "root": "/data",
            "provider": "ollama",
            "model": "llava",
            "prompt": "Describe this image in detail."
        }))
        .unwrap()
    }

    fn item(rel: &str, status: ItemStatus) -> WorkItem {
        WorkItem {
            id: photoscribe_discovery::item_id(rel),
            relative_path: rel.to_string(),
            source_path: format!("/data/{rel}").into(),
            kind: ItemKind::Image,
            derived_from: None,
            status,
            descriptions: vec![],
            error: None,
            location: None,
            capture: None,
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_recover_interrupted_resets_processing_only() {
        let mut doc = WorkspaceDocument::new(config());
        doc.items
            .insert("a.jpg".into(), item("a.jpg", ItemStatus::Processing));
        doc.items
            .insert("b.jpg".into(), item("b.jpg", ItemStatus::Completed));
        doc.items
            .insert("c.jpg".into(), item("c.jpg", ItemStatus::Failed));

        let recovered = doc.recover_interrupted();
        assert_eq!(recovered, 1);
        assert_eq!(doc.items["a.jpg"].status, ItemStatus::Pending);
        assert_eq!(doc.items["b.jpg"].status, ItemStatus::Completed);
        assert_eq!(doc.items["c.jpg"].status, ItemStatus::Failed);
    }

    #[test]
    fn test_summary_counts_empty_text_separately() {
        let mut doc = WorkspaceDocument::new(config());
        let mut empty = item("a.jpg", ItemStatus::Completed);
        empty.descriptions.push(DescriptionRecord {
            provider: "stub".into(),
            model: "m".into(),
            prompt_style: None,
            text: String::new(),
            created_at: Utc::now(),
            processing_time_ms: 1,
            error: None,
            token_usage: None,
        });
        doc.items.insert("a.jpg".into(), empty);
        doc.items
            .insert("b.jpg".into(), item("b.jpg", ItemStatus::Failed));

        let summary = doc.summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.empty_text, 1);
    }

    #[test]
    fn test_items_preserve_insertion_order() {
        let mut doc = WorkspaceDocument::new(config());
        for rel in ["z.jpg", "a.jpg", "m.jpg"] {
            doc.items.insert(rel.into(), item(rel, ItemStatus::Pending));
        }
        let keys: Vec<&str> = doc.items.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["z.jpg", "a.jpg", "m.jpg"]);
    }
}
