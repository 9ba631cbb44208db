//! Bounding boxes, Web-Mercator projection and bearings.
//!
//! All public coordinates are WGS84 (EPSG:4326) `x = longitude, y = latitude`.
//! Metric work (snapping, bbox extents) happens in Web-Mercator (EPSG:3857).

use geo::{Coord, Point};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// WGS84 semi-major axis, the sphere radius used by EPSG:3857.
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Latitude at which Web-Mercator becomes a square.
const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

#[derive(Error, Debug, PartialEq)]
pub enum GeometryError {
    #[error("Bounding box must be 'min_lon,min_lat,max_lon,max_lat', got '{0}'")]
    MalformedBBox(String),

    #[error("Bounding box minimum exceeds maximum: {0}")]
    InvertedBBox(BBox),

    #[error("Coordinate out of range: lon {lon}, lat {lat}")]
    OutOfRange { lon: f64, lat: f64 },
}

/// Axis-aligned bounding box `[min_lon, min_lat, max_lon, max_lat]`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct BBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Result<Self, GeometryError> {
        let bbox = Self {
            min_x,
            min_y,
            max_x,
            max_y,
        };
        let values = [min_x, min_y, max_x, max_y];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(GeometryError::MalformedBBox(bbox.to_query_string()));
        }
        if min_x > max_x || min_y > max_y {
            return Err(GeometryError::InvertedBBox(bbox));
        }
        Ok(bbox)
    }

    /// Splits the box into four quarters:
    ///
    /// | q3 | q4 |
    /// | q1 | q2 |
    pub fn split_quadrants(&self) -> [BBox; 4] {
        let xm = (self.max_x - self.min_x) / 2.0;
        let ym = (self.max_y - self.min_y) / 2.0;
        let (x1, y1, x2, y2) = (self.min_x, self.min_y, self.max_x, self.max_y);
        [
            BBox { min_x: x1, min_y: y1, max_x: x1 + xm, max_y: y1 + ym },
            BBox { min_x: x1 + xm, min_y: y1, max_x: x2, max_y: y1 + ym },
            BBox { min_x: x1, min_y: y1 + ym, max_x: x1 + xm, max_y: y2 },
            BBox { min_x: x1 + xm, min_y: y1 + ym, max_x: x2, max_y: y2 },
        ]
    }

    /// Comma separated form used by the Mapillary `bbox` query parameter.
    pub fn to_query_string(&self) -> String {
        format!("{},{},{},{}", self.min_x, self.min_y, self.max_x, self.max_y)
    }

    /// Grows the box by `delta` degrees on every side.
    pub fn expand(&self, delta: f64) -> BBox {
        BBox {
            min_x: self.min_x - delta,
            min_y: self.min_y - delta,
            max_x: self.max_x + delta,
            max_y: self.max_y + delta,
        }
    }

    pub fn contains(&self, point: &Point<f64>) -> bool {
        point.x() >= self.min_x
            && point.x() <= self.max_x
            && point.y() >= self.min_y
            && point.y() <= self.max_y
    }

    pub fn center(&self) -> Point<f64> {
        Point::new(
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    /// Smallest box containing all points, `None` for an empty iterator.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point<f64>>) -> Option<BBox> {
        points.into_iter().fold(None, |acc, p| {
            Some(match acc {
                None => BBox { min_x: p.x(), min_y: p.y(), max_x: p.x(), max_y: p.y() },
                Some(b) => BBox {
                    min_x: b.min_x.min(p.x()),
                    min_y: b.min_y.min(p.y()),
                    max_x: b.max_x.max(p.x()),
                    max_y: b.max_y.max(p.y()),
                },
            })
        })
    }
}

impl fmt::Display for BBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.to_query_string())
    }
}

impl FromStr for BBox {
    type Err = GeometryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<f64> = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|_| GeometryError::MalformedBBox(s.to_string()))?;
        match parts.as_slice() {
            [min_x, min_y, max_x, max_y] => BBox::new(*min_x, *min_y, *max_x, *max_y),
            _ => Err(GeometryError::MalformedBBox(s.to_string())),
        }
    }
}

/// Checks that a point is a usable WGS84 coordinate.
pub fn validate_lon_lat(point: &Point<f64>) -> Result<(), GeometryError> {
    let (lon, lat) = (point.x(), point.y());
    if !lon.is_finite() || !lat.is_finite() || lon.abs() > 180.0 || lat.abs() > 90.0 {
        return Err(GeometryError::OutOfRange { lon, lat });
    }
    Ok(())
}

/// EPSG:4326 -> EPSG:3857.
pub fn to_mercator(lon: f64, lat: f64) -> Coord<f64> {
    let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
    Coord {
        x: EARTH_RADIUS * lon.to_radians(),
        y: EARTH_RADIUS * (PI / 4.0 + lat.to_radians() / 2.0).tan().ln(),
    }
}

/// EPSG:3857 -> EPSG:4326.
pub fn from_mercator(x: f64, y: f64) -> Coord<f64> {
    Coord {
        x: (x / EARTH_RADIUS).to_degrees(),
        y: (2.0 * (y / EARTH_RADIUS).exp().atan() - PI / 2.0).to_degrees(),
    }
}

/// Builds a bounding box of `x_distance_meters` by `y_distance_meters`
/// (Web-Mercator meters) centered on `point`.
pub fn create_bbox(point: &Point<f64>, x_distance_meters: f64, y_distance_meters: f64) -> Result<BBox, GeometryError> {
    validate_lon_lat(point)?;
    let center = to_mercator(point.x(), point.y());
    let min = from_mercator(center.x - x_distance_meters / 2.0, center.y - y_distance_meters / 2.0);
    let max = from_mercator(center.x + x_distance_meters / 2.0, center.y + y_distance_meters / 2.0);
    BBox::new(min.x, min.y, max.x, max.y)
}

/// Initial great-circle bearing from `from` to `to`, in degrees [0, 360).
pub fn calculate_bearing(from: &Point<f64>, to: &Point<f64>) -> f64 {
    let (lon1, lat1) = (from.x().to_radians(), from.y().to_radians());
    let (lon2, lat2) = (to.x().to_radians(), to.y().to_radians());
    let dlon = lon2 - lon1;
    let x = (dlon.sin() * lat2.cos()).atan2(lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos());
    (x.to_degrees() + 360.0) % 360.0
}

/// Smallest absolute difference between two compass angles, in [0, 180].
pub fn angle_difference(a: f64, b: f64) -> f64 {
    let diff = (a - b).rem_euclid(360.0);
    diff.min(360.0 - diff)
}
