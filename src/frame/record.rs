use chrono::{DateTime, FixedOffset};
use geo::Point;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One geolocated image, i.e. one row of a [`GeoImageFrame`](super::GeoImageFrame).
///
/// `name`, `image_url` and `geometry` are required. Every other column is
/// optional because local images and Mapillary images carry different subsets.
/// Coordinates are WGS84 (EPSG:4326), `x = longitude`, `y = latitude`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ImageRecord {
    pub name: String,
    pub image_url: String,
    pub geometry: Point<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mly_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<DateTime<FixedOffset>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed_altitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compass_angle: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed_compass_angle: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed_geometry: Option<Point<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed_rotation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_parameters: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exif_orientation: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,

    /// Filled by [`snap_to_road_network`](crate::snap::snap_to_road_network).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapped_geometry: Option<Point<f64>>,
    /// Filled by [`align_compass_with_road`](crate::snap::align_compass_with_road).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapped_angle: Option<f64>,

    /// Any column without a dedicated field (Mapillary `mesh`, `detections`, ...).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
}

impl ImageRecord {
    /// A record with only the required columns set.
    pub fn new(name: impl Into<String>, image_url: impl Into<String>, geometry: Point<f64>) -> Self {
        Self {
            name: name.into(),
            image_url: image_url.into(),
            geometry,
            mly_id: None,
            sequence: None,
            captured_at: None,
            altitude: None,
            computed_altitude: None,
            compass_angle: None,
            computed_compass_angle: None,
            computed_geometry: None,
            computed_rotation: None,
            camera_type: None,
            camera_parameters: None,
            exif_orientation: None,
            width: None,
            height: None,
            snapped_geometry: None,
            snapped_angle: None,
            properties: Map::new(),
        }
    }

    pub fn is_remote(&self) -> bool {
        self.image_url.starts_with("http://") || self.image_url.starts_with("https://")
    }

    /// Looks up a column by name, as a string suitable for display.
    ///
    /// Unknown columns fall through to `properties`.
    pub fn column_display(&self, column: &str) -> Option<String> {
        let num = |v: Option<f64>| v.map(|v| v.to_string());
        let point = |p: Option<Point<f64>>| p.map(|p| point_wkt(&p));
        match column {
            "name" => Some(self.name.clone()),
            "image_url" => Some(self.image_url.clone()),
            "geometry" => Some(point_wkt(&self.geometry)),
            "mly_id" => self.mly_id.clone(),
            "sequence" => self.sequence.clone(),
            "captured_at" => self.captured_at.map(|d| d.to_rfc3339()),
            "altitude" => num(self.altitude),
            "computed_altitude" => num(self.computed_altitude),
            "compass_angle" => num(self.compass_angle),
            "computed_compass_angle" => num(self.computed_compass_angle),
            "computed_geometry" => point(self.computed_geometry),
            "computed_rotation" => self.computed_rotation.clone(),
            "camera_type" => self.camera_type.clone(),
            "camera_parameters" => self.camera_parameters.clone(),
            "exif_orientation" => self.exif_orientation.map(|v| v.to_string()),
            "width" => self.width.map(|v| v.to_string()),
            "height" => self.height.map(|v| v.to_string()),
            "snapped_geometry" => point(self.snapped_geometry),
            "snapped_angle" => num(self.snapped_angle),
            other => self.properties.get(other).and_then(|v| match v {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                v => Some(v.to_string()),
            }),
        }
    }
}

/// Well-known-text form of a point, `POINT (x y)`.
pub fn point_wkt(point: &Point<f64>) -> String {
    format!("POINT ({} {})", point.x(), point.y())
}

/// Parses `POINT (x y)` (optionally prefixed with `SRID=4326;`).
pub fn parse_point_wkt(wkt: &str) -> Option<Point<f64>> {
    let body = wkt.rsplit(';').next()?.trim();
    let inner = body
        .strip_prefix("POINT")?
        .trim()
        .strip_prefix('(')?
        .strip_suffix(')')?;
    let mut parts = inner.split_whitespace().map(str::parse::<f64>);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(Ok(x)), Some(Ok(y)), None) => Some(Point::new(x, y)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_point_wkt_roundtrip_and_srid_prefix() {
        let p = Point::new(139.7, 35.6);
        assert_eq!(point_wkt(&p), "POINT (139.7 35.6)");
        assert_eq!(parse_point_wkt("POINT (139.7 35.6)"), Some(p));
        assert_eq!(parse_point_wkt("SRID=4326;POINT(139.7 35.6)"), Some(p));
        assert_eq!(parse_point_wkt("LINESTRING (0 0, 1 1)"), None);
        assert_eq!(parse_point_wkt("POINT (1 2 3)"), None);
    }

    #[test]
    fn test_column_display_falls_back_to_properties() {
        let mut record = ImageRecord::new("a.jpg", "/tmp/a.jpg", Point::new(1.0, 2.0));
        record.compass_angle = Some(90.0);
        record.properties.insert("merge_cc".into(), json!(42));
        record.properties.insert("note".into(), json!("hello"));
        record.properties.insert("empty".into(), Value::Null);

        assert_eq!(record.column_display("compass_angle"), Some("90".to_string()));
        assert_eq!(record.column_display("merge_cc"), Some("42".to_string()));
        assert_eq!(record.column_display("note"), Some("hello".to_string()));
        assert_eq!(record.column_display("empty"), None);
        assert_eq!(record.column_display("missing"), None);
        assert!(!record.is_remote());
    }
}
