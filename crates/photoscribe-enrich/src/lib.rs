//! Metadata and geocoding enrichment.
//!
//! A side step over the workspace document: attaches EXIF capture
//! metadata and a resolved place name to items, idempotently, without
//! touching statuses or description history.

mod exif;
mod geocode;

pub use exif::extract_capture_metadata;
pub use geocode::{
    EnrichError, GeocodeCache, NominatimGeocoder, ReverseGeocoder, cache_key, resolve_place,
};

use photoscribe_workspace::WorkspaceStore;

/// Outcome of an enrichment pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichReport {
    pub examined: usize,
    pub enriched: usize,
    pub geocoded: usize,
}

/// Enrich every item that still lacks capture metadata or a location.
/// Present values are never re-fetched, so repeated passes are no-ops.
pub async fn enrich_document(
    store: &WorkspaceStore,
    geocoder: Option<&dyn ReverseGeocoder>,
    cache: &mut GeocodeCache,
) -> Result<EnrichReport, photoscribe_workspace::WorkspaceError> {
    let document = store.document().await;
    let mut report = EnrichReport::default();

    for (key, item) in &document.items {
        report.examined += 1;

        let capture = if item.capture.is_none() {
            extract_capture_metadata(&item.source_path)
        } else {
            None
        };

        let gps = capture
            .as_ref()
            .and_then(|c| c.gps)
            .or_else(|| item.capture.as_ref().and_then(|c| c.gps));

        let location = match (item.location.is_none(), gps, geocoder) {
            (true, Some(gps), Some(geocoder)) => {
                let place = resolve_place(cache, geocoder, gps.latitude, gps.longitude).await;
                if place.is_some() {
                    report.geocoded += 1;
                }
                place
            }
            _ => None,
        };

        if capture.is_some() || location.is_some() {
            store.set_enrichment(key, capture, location).await?;
            report.enriched += 1;
        }
    }

    tracing::info!(
        examined = report.examined,
        enriched = report.enriched,
        geocoded = report.geocoded,
        "Enrichment pass complete"
    );
    Ok(report)
}
