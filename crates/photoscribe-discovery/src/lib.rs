//! Deterministic media file discovery.
//!
//! Walks a root directory once, classifies entries by extension
//! (case-insensitive), deduplicates normalized paths, and yields candidates
//! sorted by normalized relative path. Determinism matters: item ids and
//! processing order both derive from this ordering, and it must be stable
//! across runs on an unchanged tree.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use walkdir::WalkDir;

use photoscribe_types::ItemKind;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Root directory not found: {0}")]
    RootNotFound(PathBuf),
    #[error("Root path is not a directory: {0}")]
    RootNotDirectory(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A file found by discovery or produced by conversion, before it enters
/// the workspace document.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Stable item id (SHA-256 hex of `relative_path`).
    pub id: String,
    /// Normalized forward-slash path relative to the scan root; document
    /// map key.
    pub relative_path: String,
    pub source_path: PathBuf,
    pub kind: ItemKind,
    pub size: u64,
    /// Provenance id for derived candidates (video frames, converted HEIC).
    pub derived_from: Option<String>,
    /// Set when the file could not be read during discovery; such
    /// candidates are recorded as failed items rather than silently
    /// dropped.
    pub read_error: Option<String>,
}

impl Candidate {
    /// Candidate for a file found under the scan root.
    pub fn discovered(
        relative_path: String,
        source_path: PathBuf,
        kind: ItemKind,
        size: u64,
    ) -> Self {
        Self {
            id: item_id(&relative_path),
            relative_path,
            source_path,
            kind,
            size,
            derived_from: None,
            read_error: None,
        }
    }

    /// Candidate for a file produced by a converter, linked to its source
    /// item.
    pub fn derived(
        relative_path: String,
        source_path: PathBuf,
        kind: ItemKind,
        size: u64,
        source_id: String,
    ) -> Self {
        Self {
            id: item_id(&relative_path),
            relative_path,
            source_path,
            kind,
            size,
            derived_from: Some(source_id),
            read_error: None,
        }
    }
}

/// Stable item id: hex SHA-256 digest of the normalized relative path.
pub fn item_id(relative_path: &str) -> String {
    hex::encode(Sha256::digest(relative_path.as_bytes()))
}

/// Normalize a path relative to `root` into the canonical document key
/// form: forward slashes, no leading `./`.
pub fn normalize_relative(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    parts.join("/")
}

/// Classify a file extension into an item kind. Comparison is
/// case-insensitive: `.PNG` and `.png` are the same type.
pub fn classify_extension(ext: &str) -> Option<ItemKind> {
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" | "png" | "gif" | "webp" | "bmp" | "tif" | "tiff" => Some(ItemKind::Image),
        "heic" | "heif" => Some(ItemKind::Heic),
        "mp4" | "mov" | "avi" | "mkv" | "webm" | "m4v" => Some(ItemKind::Video),
        _ => None,
    }
}

fn classify_path(path: &Path) -> Option<ItemKind> {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(classify_extension)
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

/// Walk `root` and return candidates sorted by normalized relative path.
///
/// `kinds` filters the result; an empty slice means all kinds. Hidden
/// entries are skipped. Files whose metadata cannot be read are still
/// yielded, carrying a `read_error`, so operators can see exactly what was
/// excluded.
pub fn scan(
    root: &Path,
    recursive: bool,
    kinds: &[ItemKind],
) -> Result<Vec<Candidate>, DiscoveryError> {
    if !root.exists() {
        return Err(DiscoveryError::RootNotFound(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(DiscoveryError::RootNotDirectory(root.to_path_buf()));
    }

    let max_depth = if recursive { usize::MAX } else { 1 };

    // BTreeMap keyed by normalized path: dedup and deterministic order in
    // one structure.
    let mut found: BTreeMap<String, Candidate> = BTreeMap::new();

    let walker = WalkDir::new(root)
        .max_depth(max_depth)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping unreadable directory entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let Some(kind) = classify_path(entry.path()) else {
            continue;
        };
        if !kinds.is_empty() && !kinds.contains(&kind) {
            continue;
        }

        let relative = normalize_relative(root, entry.path());
        let candidate = match entry.metadata() {
            Ok(meta) => Candidate::discovered(
                relative.clone(),
                entry.path().to_path_buf(),
                kind,
                meta.len(),
            ),
            Err(e) => {
                let mut c =
                    Candidate::discovered(relative.clone(), entry.path().to_path_buf(), kind, 0);
                c.read_error = Some(format!("Failed to read file metadata: {e}"));
                c
            }
        };

        found.entry(relative).or_insert(candidate);
    }

    tracing::debug!(
        root = %root.display(),
        count = found.len(),
        recursive,
        "Discovery scan complete"
    );

    Ok(found.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path, bytes: &[u8]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_classification_is_case_insensitive() {
        assert_eq!(classify_extension("PNG"), Some(ItemKind::Image));
        assert_eq!(classify_extension("png"), Some(ItemKind::Image));
        assert_eq!(classify_extension("HeIc"), Some(ItemKind::Heic));
        assert_eq!(classify_extension("MOV"), Some(ItemKind::Video));
        assert_eq!(classify_extension("txt"), None);
    }

    #[test]
    fn test_scan_sorted_and_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("b.jpg"), b"jpg");
        touch(&dir.path().join("a.PNG"), b"png");
        touch(&dir.path().join("sub/c.mp4"), b"mp4");
        touch(&dir.path().join("notes.txt"), b"ignored");

        let first = scan(dir.path(), true, &[]).unwrap();
        let second = scan(dir.path(), true, &[]).unwrap();

        let paths: Vec<&str> = first.iter().map(|c| c.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["a.PNG", "b.jpg", "sub/c.mp4"]);

        let ids_first: Vec<&str> = first.iter().map(|c| c.id.as_str()).collect();
        let ids_second: Vec<&str> = second.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids_first, ids_second);
    }

    #[test]
    fn test_non_recursive_scan_stays_at_top_level() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("top.jpg"), b"jpg");
        touch(&dir.path().join("sub/nested.jpg"), b"jpg");

        let found = scan(dir.path(), false, &[]).unwrap();
        let paths: Vec<&str> = found.iter().map(|c| c.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["top.jpg"]);
    }

    #[test]
    fn test_hidden_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("visible.jpg"), b"jpg");
        touch(&dir.path().join(".photoscribe/derived.jpg"), b"jpg");
        touch(&dir.path().join(".hidden.png"), b"png");

        let found = scan(dir.path(), true, &[]).unwrap();
        let paths: Vec<&str> = found.iter().map(|c| c.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["visible.jpg"]);
    }

    #[test]
    fn test_kind_filter() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.jpg"), b"jpg");
        touch(&dir.path().join("b.mp4"), b"mp4");

        let found = scan(dir.path(), true, &[ItemKind::Video]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, ItemKind::Video);
    }

    #[test]
    fn test_zero_byte_files_are_yielded() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("empty.jpg"), b"");

        let found = scan(dir.path(), true, &[]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].size, 0);
    }

    #[test]
    fn test_item_id_is_stable() {
        let a = item_id("photos/2024/img_0001.jpg");
        let b = item_id("photos/2024/img_0001.jpg");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, item_id("photos/2024/img_0002.jpg"));
    }

    #[test]
    fn test_missing_root_errors() {
        let err = scan(Path::new("/no/such/root"), true, &[]).unwrap_err();
        assert!(matches!(err, DiscoveryError::RootNotFound(_)));
    }
}
