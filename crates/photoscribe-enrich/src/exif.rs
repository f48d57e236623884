//! EXIF capture metadata extraction.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::NaiveDateTime;
use exif::{In, Tag, Value};

use photoscribe_types::{CaptureMetadata, GpsCoordinates};

/// Extract capture time, camera identity, and GPS position from a file's
/// EXIF block. Absence of EXIF data is `None`, not an error: plenty of
/// valid media carries none.
pub fn extract_capture_metadata(path: &Path) -> Option<CaptureMetadata> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            tracing::debug!(path = %path.display(), "Cannot open file for EXIF: {e}");
            return None;
        }
    };
    let mut reader = BufReader::new(&file);
    let exif = exif::Reader::new().read_from_container(&mut reader).ok()?;

    let taken_at = ascii_value(&exif, Tag::DateTimeOriginal)
        .or_else(|| ascii_value(&exif, Tag::DateTime))
        .and_then(|s| NaiveDateTime::parse_from_str(&s, "%Y:%m:%d %H:%M:%S").ok());

    let gps = match (
        gps_coordinate(&exif, Tag::GPSLatitude, Tag::GPSLatitudeRef),
        gps_coordinate(&exif, Tag::GPSLongitude, Tag::GPSLongitudeRef),
    ) {
        (Some(latitude), Some(longitude)) => Some(GpsCoordinates {
            latitude,
            longitude,
        }),
        _ => None,
    };

    let meta = CaptureMetadata {
        taken_at,
        camera_make: ascii_value(&exif, Tag::Make),
        camera_model: ascii_value(&exif, Tag::Model),
        gps,
    };

    if meta == CaptureMetadata::default() {
        None
    } else {
        Some(meta)
    }
}

fn ascii_value(exif: &exif::Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match &field.value {
        Value::Ascii(parts) if !parts.is_empty() => {
            let s = String::from_utf8_lossy(&parts[0]);
            let trimmed = s.trim().trim_matches('\0').trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        _ => None,
    }
}

fn gps_coordinate(exif: &exif::Exif, tag: Tag, ref_tag: Tag) -> Option<f64> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    let rationals = match &field.value {
        Value::Rational(v) if v.len() >= 3 => v,
        _ => return None,
    };
    let degrees = dms_to_degrees(
        rationals[0].to_f64(),
        rationals[1].to_f64(),
        rationals[2].to_f64(),
    );
    let reference = ascii_value(exif, ref_tag)?;
    Some(match reference.as_str() {
        "S" | "W" => -degrees,
        _ => degrees,
    })
}

/// Degrees/minutes/seconds to decimal degrees.
pub(crate) fn dms_to_degrees(degrees: f64, minutes: f64, seconds: f64) -> f64 {
    degrees + minutes / 60.0 + seconds / 3600.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dms_conversion() {
        let deg = dms_to_degrees(38.0, 43.0, 12.0);
        assert!((deg - 38.72).abs() < 1e-9);
        assert_eq!(dms_to_degrees(0.0, 0.0, 0.0), 0.0);
    }

    #[test]
    fn test_no_exif_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.jpg");
        std::fs::write(&path, b"not a real jpeg").unwrap();
        assert!(extract_capture_metadata(&path).is_none());
    }

    #[test]
    fn test_missing_file_is_none() {
        assert!(extract_capture_metadata(Path::new("/no/such/file.jpg")).is_none());
    }
}
