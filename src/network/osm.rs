//! Road networks from OpenStreetMap through the Overpass API.

use super::{NetworkError, RoadLine, RoadNetwork};
use crate::geometry::BBox;
use crate::http::{self, RetryDecision, RetryPolicy, Timeouts};
use geo::{Coord, LineString};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const OVERPASS_URL: &str = "https://overpass-api.de/api/interpreter";
/// Degrees added on every side of the requested bbox so roads just outside the points are included.
pub const BBOX_BUFFER_DEG: f64 = 0.001;

/// Which kinds of ways count as roads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NetworkType {
    #[default]
    Drive,
    Walk,
    Bike,
    All,
    AllPrivate,
}

impl NetworkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkType::Drive => "drive",
            NetworkType::Walk => "walk",
            NetworkType::Bike => "bike",
            NetworkType::All => "all",
            NetworkType::AllPrivate => "all_private",
        }
    }

    /// Overpass QL tag filter for `way` elements.
    pub fn way_filter(&self) -> String {
        let excluded = match self {
            NetworkType::Drive => {
                "abandoned|bridleway|bus_guideway|construction|corridor|cycleway|elevator|escalator|footway|no|path|pedestrian|planned|platform|proposed|raceway|razed|service|steps|track"
            }
            NetworkType::Walk => "abandoned|bus_guideway|construction|cycleway|motor|no|planned|platform|proposed|raceway|razed",
            NetworkType::Bike => {
                "abandoned|bus_guideway|construction|corridor|elevator|escalator|footway|motor|no|planned|platform|proposed|raceway|razed|steps"
            }
            NetworkType::All | NetworkType::AllPrivate => "abandoned|construction|no|planned|platform|proposed|raceway|razed",
        };
        let extra = match self {
            NetworkType::Drive => {
                r#"["motor_vehicle"!~"no"]["motorcar"!~"no"]["service"!~"alley|driveway|emergency_access|parking|parking_aisle|private"]"#
            }
            NetworkType::Walk => r#"["foot"!~"no"]["service"!~"private"]"#,
            NetworkType::Bike => r#"["bicycle"!~"no"]["service"!~"private"]"#,
            NetworkType::All => r#"["service"!~"private"]"#,
            NetworkType::AllPrivate => "",
        };
        let access = if *self == NetworkType::AllPrivate {
            ""
        } else {
            r#"["access"!~"private"]"#
        };
        format!(r#"["highway"]["area"!~"yes"]["highway"!~"{excluded}"]{extra}{access}"#)
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkType {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drive" => Ok(NetworkType::Drive),
            "walk" => Ok(NetworkType::Walk),
            "bike" => Ok(NetworkType::Bike),
            "all" => Ok(NetworkType::All),
            "all_private" => Ok(NetworkType::AllPrivate),
            other => Err(NetworkError::UnknownNetworkType(other.to_string())),
        }
    }
}

/// Overpass QL query for all matching ways intersecting `bbox`, with geometry.
pub fn overpass_query(bbox: &BBox, network_type: NetworkType) -> String {
    format!(
        "[out:json][timeout:180];(way{}({},{},{},{}););out tags geom;",
        network_type.way_filter(),
        bbox.min_y,
        bbox.min_x,
        bbox.max_y,
        bbox.max_x
    )
}

/// Fetches the road network in `bbox` (buffered by [`BBOX_BUFFER_DEG`]).
///
/// Up to `retries` attempts are made, with a warning after every failed one.
/// When `cache_dir` is given, results are read from and written to
/// `<cache_dir>/<type>_<bbox>.geojson`.
pub fn get_osm_lines(
    bbox: &BBox,
    network_type: NetworkType,
    cache_dir: Option<&Path>,
    retries: u32,
    timeouts: Timeouts,
) -> Result<RoadNetwork, NetworkError> {
    let buffered = bbox.expand(BBOX_BUFFER_DEG);
    let cache_file = cache_dir.map(|dir| cache_file_name(dir, &buffered, network_type));
    if let Some(path) = cache_file.as_ref().filter(|p| p.exists()) {
        tracing::debug!(path = %path.display(), "using cached road network");
        return RoadNetwork::from_geojson_file(path);
    }

    let mut url = url::Url::parse(OVERPASS_URL)
        .map_err(|e| NetworkError::UnexpectedResponse(e.to_string()))?;
    url.query_pairs_mut()
        .append_pair("data", &overpass_query(&buffered, network_type));

    let retries = retries.max(1);
    let backoff = RetryPolicy {
        max_attempts: retries,
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
    };
    let mut attempt = 1;
    let body = loop {
        match http::get_ok(url.as_str(), &[], timeouts) {
            Ok(response) => break response.body,
            Err(error) => {
                if attempt >= retries {
                    return Err(NetworkError::Connection {
                        attempts: retries,
                        message: error.to_string(),
                    });
                }
                tracing::warn!(attempt, %error, "OSM request failed, retrying");
                if let RetryDecision::RetryAfter(delay) = backoff.decide(attempt, error.kind()) {
                    std::thread::sleep(delay);
                }
                attempt += 1;
            }
        }
    };

    let network = parse_overpass(&body)?;
    tracing::info!(bbox = %buffered, %network_type, lines = network.len(), "fetched OSM road network");
    if let Some(path) = cache_file {
        network.to_geojson_file(&path)?;
    }
    Ok(network)
}

fn cache_file_name(dir: &Path, bbox: &BBox, network_type: NetworkType) -> PathBuf {
    dir.join(format!(
        "{}_{:.6}_{:.6}_{:.6}_{:.6}.geojson",
        network_type, bbox.min_x, bbox.min_y, bbox.max_x, bbox.max_y
    ))
}

#[derive(Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<OverpassElement>,
}

#[derive(Deserialize)]
struct OverpassElement {
    #[serde(rename = "type")]
    kind: String,
    id: i64,
    #[serde(default)]
    tags: Map<String, Value>,
    #[serde(default)]
    geometry: Vec<Option<LatLon>>,
}

#[derive(Deserialize)]
struct LatLon {
    lat: f64,
    lon: f64,
}

/// Converts an Overpass `out geom` JSON response into road lines.
pub fn parse_overpass(body: &[u8]) -> Result<RoadNetwork, NetworkError> {
    let response: OverpassResponse = serde_json::from_slice(body)?;
    let lines = response
        .elements
        .into_iter()
        .filter(|e| e.kind == "way")
        .filter_map(|way| {
            let coords: Vec<Coord<f64>> = way
                .geometry
                .iter()
                .flatten()
                .map(|p| Coord { x: p.lon, y: p.lat })
                .collect();
            if coords.len() < 2 {
                return None;
            }
            let mut properties = way.tags;
            properties.insert("osmid".into(), Value::from(way.id));
            Some(RoadLine {
                geometry: LineString::new(coords),
                properties,
            })
        })
        .collect();
    Ok(RoadNetwork::new(lines))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_network_type_parse() {
        assert_eq!("drive".parse::<NetworkType>().unwrap(), NetworkType::Drive);
        assert_eq!("ALL_PRIVATE".parse::<NetworkType>().unwrap(), NetworkType::AllPrivate);
        assert!(matches!(
            "boat".parse::<NetworkType>(),
            Err(NetworkError::UnknownNetworkType(_))
        ));
    }

    #[test]
    fn test_overpass_query_uses_south_west_north_east_order() {
        let bbox = BBox::new(139.0, 35.0, 140.0, 36.0).unwrap();
        let query = overpass_query(&bbox, NetworkType::Walk);
        assert!(query.starts_with("[out:json]"));
        assert!(query.contains("(35,139,36,140)"));
        assert!(query.contains(r#"["foot"!~"no"]"#));
        assert!(query.contains(r#"["access"!~"private"]"#));
        assert!(!overpass_query(&bbox, NetworkType::AllPrivate).contains("access"));
    }

    #[test]
    fn test_parse_overpass_ways() {
        let body = json!({
            "elements": [
                { "type": "way", "id": 42, "tags": { "highway": "residential", "name": "Main St" },
                  "geometry": [ { "lat": 35.0, "lon": 139.0 }, { "lat": 35.001, "lon": 139.001 } ] },
                { "type": "way", "id": 43, "geometry": [ { "lat": 35.0, "lon": 139.0 } ] },
                { "type": "node", "id": 1, "lat": 35.0, "lon": 139.0 }
            ]
        })
        .to_string();

        let network = parse_overpass(body.as_bytes()).unwrap();
        assert_eq!(network.len(), 1);
        let line = &network.lines()[0];
        assert_eq!(line.geometry.0[0], Coord { x: 139.0, y: 35.0 });
        assert_eq!(line.properties["osmid"], 42);
        assert_eq!(line.properties["name"], "Main St");
    }

    #[test]
    fn test_cached_network_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let bbox = BBox::new(0.0, 0.0, 0.01, 0.01).unwrap();
        let cached = RoadNetwork::from_line_strings([LineString::from(vec![(0.0, 0.0), (0.01, 0.01)])]);
        cached
            .to_geojson_file(cache_file_name(dir.path(), &bbox.expand(BBOX_BUFFER_DEG), NetworkType::Drive))
            .unwrap();

        let network = get_osm_lines(&bbox, NetworkType::Drive, Some(dir.path()), 1, Timeouts::default()).unwrap();
        assert_eq!(network, cached);
    }

    #[test]
    #[ignore = "requires network access"]
    fn test_fetch_small_area() {
        let bbox = BBox::new(13.3880, 52.5160, 13.3900, 52.5175).unwrap();
        let network = get_osm_lines(&bbox, NetworkType::Drive, None, 3, Timeouts::default()).unwrap();
        assert!(!network.is_empty());
    }
}
