//! GeoJSON import/export for [`GeoImageFrame`].
//!
//! The primary `geometry` becomes the feature geometry. Secondary point
//! columns are written as WKT strings so that every property stays a scalar.

use super::error::FrameError;
use super::record::{ImageRecord, parse_point_wkt, point_wkt};
use super::GeoImageFrame;
use crate::time::parse_datetime_offset;
use geo::Point;
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, Value as GeoValue};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

/// Point columns besides `geometry` that are stored as WKT.
const SECONDARY_POINT_COLUMNS: [&str; 2] = ["computed_geometry", "snapped_geometry"];

/// Columns with a dedicated [`ImageRecord`] field.
const RECORD_COLUMNS: [&str; 20] = [
    "name",
    "image_url",
    "geometry",
    "mly_id",
    "sequence",
    "captured_at",
    "altitude",
    "computed_altitude",
    "compass_angle",
    "computed_compass_angle",
    "computed_geometry",
    "computed_rotation",
    "camera_type",
    "camera_parameters",
    "exif_orientation",
    "width",
    "height",
    "snapped_geometry",
    "snapped_angle",
    "properties",
];

impl GeoImageFrame {
    pub fn to_feature_collection(&self) -> Result<FeatureCollection, serde_json::Error> {
        let features = self
            .iter()
            .map(record_to_feature)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        })
    }

    /// Writes the frame as a GeoJSON FeatureCollection.
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), FrameError> {
        let path = path.as_ref();
        let collection = self.to_feature_collection()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, GeoJson::FeatureCollection(collection).to_string())?;
        tracing::info!(path = %path.display(), rows = self.len(), "wrote image frame");
        Ok(())
    }

    /// Reads a GeoJSON file previously written by [`GeoImageFrame::to_file`]
    /// (or any point FeatureCollection with `name` and `image_url` properties).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FrameError> {
        let contents = fs::read_to_string(path.as_ref())?;
        let geojson: GeoJson = contents.parse()?;
        let features = match geojson {
            GeoJson::FeatureCollection(fc) => fc.features,
            GeoJson::Feature(f) => vec![f],
            GeoJson::Geometry(_) => Vec::new(),
        };
        let records = features
            .into_iter()
            .enumerate()
            .map(|(index, feature)| feature_to_record(index, feature))
            .collect::<Result<Vec<_>, _>>()?;
        GeoImageFrame::new(records)
    }
}

fn record_to_feature(record: &ImageRecord) -> Result<Feature, serde_json::Error> {
    let mut map = match serde_json::to_value(record)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    map.remove("geometry");
    if let Some(Value::Object(extra)) = map.remove("properties") {
        for (key, value) in extra {
            map.entry(key).or_insert(value);
        }
    }
    for column in SECONDARY_POINT_COLUMNS {
        let point = match column {
            "computed_geometry" => record.computed_geometry,
            _ => record.snapped_geometry,
        };
        if let Some(point) = point {
            map.insert(column.to_string(), Value::String(point_wkt(&point)));
        }
    }
    Ok(Feature {
        bbox: None,
        geometry: Some(Geometry::new(GeoValue::Point(vec![
            record.geometry.x(),
            record.geometry.y(),
        ]))),
        id: None,
        properties: Some(map),
        foreign_members: None,
    })
}

fn feature_to_record(index: usize, feature: Feature) -> Result<ImageRecord, FrameError> {
    let point = match feature.geometry.map(|g| g.value) {
        Some(GeoValue::Point(coords)) if coords.len() >= 2 => Point::new(coords[0], coords[1]),
        _ => return Err(FrameError::NotAPoint(index)),
    };
    let mut known = Map::new();
    let mut extra = Map::new();
    for (key, value) in feature.properties.unwrap_or_default() {
        if RECORD_COLUMNS.contains(&key.as_str()) {
            known.insert(key, value);
        } else {
            extra.insert(key, value);
        }
    }
    if let Some(Value::String(text)) = known.get("captured_at") {
        let normalized = parse_datetime_offset(text)
            .map(|dt| Value::String(dt.to_rfc3339()))
            .ok_or_else(|| FrameError::BadCapturedAt { index, value: text.clone() })?;
        known.insert("captured_at".to_string(), normalized);
    }
    for column in SECONDARY_POINT_COLUMNS {
        let parsed = match known.get(column) {
            Some(Value::String(wkt)) => Some(parse_point_wkt(wkt)),
            _ => None,
        };
        match parsed {
            Some(Some(p)) => {
                known.insert(column.to_string(), point_json(&p));
            }
            Some(None) => {
                known.remove(column);
            }
            None => {}
        }
    }
    known.insert("geometry".to_string(), point_json(&point));
    known.insert("properties".to_string(), Value::Object(extra));
    serde_json::from_value(Value::Object(known)).map_err(|source| FrameError::BadFeature { index, source })
}

fn point_json(point: &Point<f64>) -> Value {
    serde_json::json!({ "x": point.x(), "y": point.y() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use serde_json::json;

    fn sample_frame() -> GeoImageFrame {
        let mut record = ImageRecord::new("mly|1", "https://example.com/1.jpg", Point::new(139.7, 35.6));
        record.mly_id = Some("1".into());
        record.compass_angle = Some(45.0);
        record.captured_at = DateTime::parse_from_rfc3339("2021-09-01T09:55:03+09:00").ok();
        record.computed_geometry = Some(Point::new(139.70001, 35.60001));
        record.properties.insert("merge_cc".into(), json!(7));
        GeoImageFrame::new(vec![record]).unwrap()
    }

    #[test]
    fn test_feature_has_point_geometry_and_wkt_secondary_columns() {
        let collection = sample_frame().to_feature_collection().unwrap();
        let feature = &collection.features[0];

        assert!(matches!(
            feature.geometry.as_ref().map(|g| &g.value),
            Some(GeoValue::Point(c)) if c == &vec![139.7, 35.6]
        ));
        let props = feature.properties.as_ref().unwrap();
        assert_eq!(props["computed_geometry"], "POINT (139.70001 35.60001)");
        assert_eq!(props["merge_cc"], 7);
        assert!(!props.contains_key("geometry"));
        assert!(!props.contains_key("properties"));
    }

    #[test]
    fn test_file_roundtrip_preserves_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("frame.geojson");
        let frame = sample_frame();

        frame.to_file(&path).unwrap();
        let loaded = GeoImageFrame::from_file(&path).unwrap();

        assert_eq!(loaded, frame);
    }

    #[test]
    fn test_from_file_accepts_exif_style_captured_at() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exif.geojson");
        let contents = json!({
            "type": "Feature",
            "geometry": { "type": "Point", "coordinates": [139.7, 35.6] },
            "properties": {
                "name": "a",
                "image_url": "/data/a.jpg",
                "captured_at": "2021:09:01 09:55:03+09:00"
            }
        });
        std::fs::write(&path, contents.to_string()).unwrap();

        let loaded = GeoImageFrame::from_file(&path).unwrap();
        assert_eq!(
            loaded.records[0].captured_at,
            DateTime::parse_from_rfc3339("2021-09-01T09:55:03+09:00").ok()
        );
    }

    #[test]
    fn test_from_file_rejects_garbled_captured_at() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.geojson");
        let contents = json!({
            "type": "Feature",
            "geometry": { "type": "Point", "coordinates": [139.7, 35.6] },
            "properties": { "name": "a", "image_url": "/data/a.jpg", "captured_at": "yesterday" }
        });
        std::fs::write(&path, contents.to_string()).unwrap();

        assert!(matches!(
            GeoImageFrame::from_file(&path),
            Err(FrameError::BadCapturedAt { index: 0, .. })
        ));
    }

    #[test]
    fn test_from_file_rejects_non_point_features() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lines.geojson");
        let contents = json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "geometry": { "type": "LineString", "coordinates": [[0.0, 0.0], [1.0, 1.0]] },
                "properties": { "name": "a", "image_url": "b" }
            }]
        });
        std::fs::write(&path, contents.to_string()).unwrap();

        assert!(matches!(
            GeoImageFrame::from_file(&path),
            Err(FrameError::NotAPoint(0))
        ));
    }
}
