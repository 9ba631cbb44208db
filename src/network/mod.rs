//! Road networks used as snapping targets.
//!
//! A [`RoadNetwork`] is a flat list of WGS84 line strings with optional OSM
//! tags. It is read from GeoJSON, fetched from OpenStreetMap, cleaned with
//! [`optimize_network_for_snapping`] and checked with [`validate_network_topology`].

pub mod cache;
pub mod optimize;
pub mod osm;
pub mod validate;

pub use cache::{clear_network_cache, create_network_cache_dir, default_cache_dir};
pub use optimize::{connected_components, optimize_network_for_snapping};
pub use osm::{NetworkType, get_osm_lines};
pub use validate::{ValidationReport, validate_network_topology};

use crate::geometry::BBox;
use geo::{Coord, LineString};
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, Value as GeoValue};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Unknown network type '{0}', expected drive, walk, bike, all or all_private")]
    UnknownNetworkType(String),

    #[error("Failed to fetch OSM network after {attempts} attempts: {message}")]
    Connection { attempts: u32, message: String },

    #[error("Unexpected Overpass response: {0}")]
    UnexpectedResponse(String),

    #[error("Invalid GeoJSON: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Could not locate cache directory: {0}")]
    Xdg(#[from] xdg::BaseDirectoriesError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One road segment chain.
#[derive(Debug, Clone, PartialEq)]
pub struct RoadLine {
    pub geometry: LineString<f64>,
    pub properties: Map<String, Value>,
}

impl RoadLine {
    pub fn new(geometry: LineString<f64>) -> Self {
        Self {
            geometry,
            properties: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoadNetwork {
    lines: Vec<RoadLine>,
}

impl RoadNetwork {
    pub fn new(lines: Vec<RoadLine>) -> Self {
        Self { lines }
    }

    /// A network of bare geometries without properties.
    pub fn from_line_strings(lines: impl IntoIterator<Item = LineString<f64>>) -> Self {
        Self {
            lines: lines.into_iter().map(RoadLine::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> &[RoadLine] {
        &self.lines
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RoadLine> {
        self.lines.iter()
    }

    pub fn into_lines(self) -> Vec<RoadLine> {
        self.lines
    }

    pub fn bbox(&self) -> Option<BBox> {
        let mut coords = self.lines.iter().flat_map(|l| l.geometry.coords());
        let first = coords.next()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for c in coords {
            min_x = min_x.min(c.x);
            min_y = min_y.min(c.y);
            max_x = max_x.max(c.x);
            max_y = max_y.max(c.y);
        }
        BBox::new(min_x, min_y, max_x, max_y).ok()
    }

    pub fn to_feature_collection(&self) -> FeatureCollection {
        let features = self
            .lines
            .iter()
            .map(|line| Feature {
                bbox: None,
                geometry: Some(Geometry::new(GeoValue::LineString(
                    line.geometry.coords().map(|c| vec![c.x, c.y]).collect(),
                ))),
                id: None,
                properties: Some(line.properties.clone()),
                foreign_members: None,
            })
            .collect();
        FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        }
    }

    /// Builds a network from line features. `MultiLineString`s are split into
    /// their parts; other geometry types are skipped.
    pub fn from_feature_collection(collection: FeatureCollection) -> Self {
        let mut lines = Vec::new();
        let mut skipped = 0usize;
        for feature in collection.features {
            let properties = feature.properties.unwrap_or_default();
            match feature.geometry.map(|g| g.value) {
                Some(GeoValue::LineString(coords)) => lines.push(RoadLine {
                    geometry: to_line_string(&coords),
                    properties,
                }),
                Some(GeoValue::MultiLineString(parts)) => {
                    for coords in parts {
                        lines.push(RoadLine {
                            geometry: to_line_string(&coords),
                            properties: properties.clone(),
                        });
                    }
                }
                _ => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::debug!(skipped, "ignored non-line features in road network");
        }
        Self { lines }
    }

    pub fn from_geojson_file(path: impl AsRef<Path>) -> Result<Self, NetworkError> {
        let contents = fs::read_to_string(path.as_ref())?;
        let collection = match contents.parse::<GeoJson>()? {
            GeoJson::FeatureCollection(fc) => fc,
            GeoJson::Feature(f) => FeatureCollection {
                bbox: None,
                features: vec![f],
                foreign_members: None,
            },
            GeoJson::Geometry(_) => {
                return Err(NetworkError::UnexpectedResponse(
                    "expected a Feature or FeatureCollection".into(),
                ));
            }
        };
        Ok(Self::from_feature_collection(collection))
    }

    pub fn to_geojson_file(&self, path: impl AsRef<Path>) -> Result<(), NetworkError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, GeoJson::FeatureCollection(self.to_feature_collection()).to_string())?;
        Ok(())
    }
}

impl<'a> IntoIterator for &'a RoadNetwork {
    type Item = &'a RoadLine;
    type IntoIter = std::slice::Iter<'a, RoadLine>;

    fn into_iter(self) -> Self::IntoIter {
        self.lines.iter()
    }
}

fn to_line_string(coords: &[Vec<f64>]) -> LineString<f64> {
    LineString::new(
        coords
            .iter()
            .filter(|c| c.len() >= 2)
            .map(|c| Coord { x: c[0], y: c[1] })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::line_string;
    use serde_json::json;

    #[test]
    fn test_geojson_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roads.geojson");
        let mut line = RoadLine::new(line_string![(x: 0.0, y: 0.0), (x: 0.001, y: 0.0)]);
        line.properties.insert("highway".into(), json!("residential"));
        let network = RoadNetwork::new(vec![line]);

        network.to_geojson_file(&path).unwrap();
        let loaded = RoadNetwork::from_geojson_file(&path).unwrap();

        assert_eq!(loaded, network);
        let bbox = loaded.bbox().unwrap();
        assert_eq!((bbox.min_x, bbox.max_x), (0.0, 0.001));
    }

    #[test]
    fn test_multilinestrings_are_split_and_points_ignored() {
        let geojson: GeoJson = json!({
            "type": "FeatureCollection",
            "features": [
                { "type": "Feature", "properties": {},
                  "geometry": { "type": "MultiLineString", "coordinates": [[[0, 0], [1, 1]], [[2, 2], [3, 3]]] } },
                { "type": "Feature", "properties": {},
                  "geometry": { "type": "Point", "coordinates": [0, 0] } }
            ]
        })
        .to_string()
        .parse()
        .unwrap();
        let GeoJson::FeatureCollection(collection) = geojson else {
            panic!("expected a FeatureCollection");
        };

        let network = RoadNetwork::from_feature_collection(collection);
        assert_eq!(network.len(), 2);
    }
}
