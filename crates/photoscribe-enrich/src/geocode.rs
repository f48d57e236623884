//! Reverse geocoding with a rounded-coordinate cache.
//!
//! The cache is keyed by coordinate rounded to 4 decimal places (~11 m),
//! never by item id, so nearby photos share one lookup. Entries do not
//! expire within a run; persistence across runs is an explicit opt-in
//! file, independent of any workspace document.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Geocode cache at {path} is corrupt: {source}")]
    CorruptCache {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Rounded cache key shared by all coordinates within ~11 m.
pub fn cache_key(latitude: f64, longitude: f64) -> String {
    format!("{latitude:.4},{longitude:.4}")
}

/// Coordinate→place-name cache, shared across jobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeocodeCache {
    entries: HashMap<String, String>,
}

impl GeocodeCache {
    pub fn get(&self, latitude: f64, longitude: f64) -> Option<&str> {
        self.entries
            .get(&cache_key(latitude, longitude))
            .map(String::as_str)
    }

    pub fn insert(&mut self, latitude: f64, longitude: f64, place: String) {
        self.entries.insert(cache_key(latitude, longitude), place);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Load a cache file; a missing file is an empty cache.
    pub fn load(path: &Path) -> Result<Self, EnrichError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|source| EnrichError::CorruptCache {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), EnrichError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| EnrichError::Io(std::io::Error::other(e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// External place-name resolver.
#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    async fn place_name(&self, latitude: f64, longitude: f64) -> anyhow::Result<Option<String>>;
}

const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org";

/// Nominatim reverse geocoder.
pub struct NominatimGeocoder {
    base_url: String,
    client: reqwest::Client,
}

impl NominatimGeocoder {
    pub fn new() -> Self {
        Self::with_base_url(NOMINATIM_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

impl Default for NominatimGeocoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReverseGeocoder for NominatimGeocoder {
    async fn place_name(&self, latitude: f64, longitude: f64) -> anyhow::Result<Option<String>> {
        let resp = self
            .client
            .get(format!("{}/reverse", self.base_url))
            .query(&[
                ("format", "jsonv2".to_string()),
                ("lat", latitude.to_string()),
                ("lon", longitude.to_string()),
            ])
            .header("User-Agent", "photoscribe/0.1 (batch media description)")
            .send()
            .await?
            .error_for_status()?;

        let json: serde_json::Value = resp.json().await?;
        Ok(parse_reverse_response(&json))
    }
}

fn parse_reverse_response(json: &serde_json::Value) -> Option<String> {
    json.get("display_name")
        .and_then(|n| n.as_str())
        .map(String::from)
}

/// Resolve a place name through the cache, hitting the geocoder only on a
/// miss. Geocoder failures degrade to `None` rather than failing the item.
pub async fn resolve_place(
    cache: &mut GeocodeCache,
    geocoder: &dyn ReverseGeocoder,
    latitude: f64,
    longitude: f64,
) -> Option<String> {
    if let Some(place) = cache.get(latitude, longitude) {
        return Some(place.to_string());
    }
    match geocoder.place_name(latitude, longitude).await {
        Ok(Some(place)) => {
            cache.insert(latitude, longitude, place.clone());
            Some(place)
        }
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(latitude, longitude, "Reverse geocoding failed: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingGeocoder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReverseGeocoder for CountingGeocoder {
        async fn place_name(&self, _lat: f64, _lon: f64) -> anyhow::Result<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some("Lisbon, Portugal".to_string()))
        }
    }

    #[test]
    fn test_cache_key_rounds_nearby_coordinates_together() {
        assert_eq!(cache_key(38.72250, -9.13930), cache_key(38.72252, -9.13933));
        assert_ne!(cache_key(38.7225, -9.1393), cache_key(38.7325, -9.1393));
    }

    #[tokio::test]
    async fn test_nearby_photos_share_one_lookup() {
        let mut cache = GeocodeCache::default();
        let geocoder = CountingGeocoder {
            calls: AtomicUsize::new(0),
        };

        let first = resolve_place(&mut cache, &geocoder, 38.72250, -9.13930).await;
        let second = resolve_place(&mut cache, &geocoder, 38.72252, -9.13933).await;

        assert_eq!(first.as_deref(), Some("Lisbon, Portugal"));
        assert_eq!(second.as_deref(), Some("Lisbon, Portugal"));
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geocache.json");

        let mut cache = GeocodeCache::default();
        cache.insert(38.7225, -9.1393, "Lisbon, Portugal".into());
        cache.save(&path).unwrap();

        let loaded = GeocodeCache::load(&path).unwrap();
        assert_eq!(loaded.get(38.7225, -9.1393), Some("Lisbon, Portugal"));
    }

    #[test]
    fn test_missing_cache_file_is_empty() {
        let loaded = GeocodeCache::load(Path::new("/no/such/cache.json")).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_parse_reverse_response() {
        let json = serde_json::json!({"display_name": "Alfama, Lisbon, Portugal"});
        assert_eq!(
            parse_reverse_response(&json).as_deref(),
            Some("Alfama, Lisbon, Portugal")
        );
        assert!(parse_reverse_response(&serde_json::json!({})).is_none());
    }
}
