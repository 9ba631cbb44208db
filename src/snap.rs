//! Snapping image locations onto a road network.
//!
//! Points and road segments are compared in Web-Mercator (EPSG:3857) so the
//! tolerance is in meters. Every line of the network is broken into its
//! segments, which are bulk-loaded into an R-tree.

use crate::frame::GeoImageFrame;
use crate::geometry::{angle_difference, calculate_bearing, from_mercator, to_mercator};
use crate::network::RoadNetwork;
use geo::Point;
use rstar::{AABB, PointDistance, RTree, RTreeObject};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum SnapError {
    #[error("Network is missing or empty, supply a road network or fetch one from OSM")]
    EmptyNetwork,

    #[error("Invalid geometry, the network must contain line strings with at least two points")]
    NoLineGeometries,

    #[error("Tolerance must be a finite, non-negative distance in meters, got {0}")]
    InvalidTolerance(f64),
}

/// One straight piece of a road line, in EPSG:3857.
#[derive(Debug, Clone, Copy)]
struct Segment {
    a: [f64; 2],
    b: [f64; 2],
}

impl Segment {
    /// Closest point on the segment to `p`.
    fn project(&self, p: &[f64; 2]) -> [f64; 2] {
        let (dx, dy) = (self.b[0] - self.a[0], self.b[1] - self.a[1]);
        let len_2 = dx * dx + dy * dy;
        if len_2 == 0.0 {
            return self.a;
        }
        let t = (((p[0] - self.a[0]) * dx + (p[1] - self.a[1]) * dy) / len_2).clamp(0.0, 1.0);
        [self.a[0] + t * dx, self.a[1] + t * dy]
    }

    /// Bearing of the segment direction in degrees [0, 360).
    fn bearing(&self) -> f64 {
        let a = from_mercator(self.a[0], self.a[1]);
        let b = from_mercator(self.b[0], self.b[1]);
        calculate_bearing(&Point::from(a), &Point::from(b))
    }
}

impl RTreeObject for Segment {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.a, self.b)
    }
}

impl PointDistance for Segment {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let q = self.project(point);
        let (dx, dy) = (q[0] - point[0], q[1] - point[1]);
        dx * dx + dy * dy
    }
}

/// R-tree over all segments of a road network.
pub struct SegmentIndex {
    tree: RTree<Segment>,
}

impl SegmentIndex {
    pub fn new(network: &RoadNetwork) -> Result<Self, SnapError> {
        if network.is_empty() {
            return Err(SnapError::EmptyNetwork);
        }
        let segments: Vec<Segment> = network
            .iter()
            .flat_map(|line| {
                line.geometry.lines().filter_map(|l| {
                    let a = to_mercator(l.start.x, l.start.y);
                    let b = to_mercator(l.end.x, l.end.y);
                    let finite = [a.x, a.y, b.x, b.y].iter().all(|v| v.is_finite());
                    finite.then_some(Segment {
                        a: [a.x, a.y],
                        b: [b.x, b.y],
                    })
                })
            })
            .collect();
        if segments.is_empty() {
            return Err(SnapError::NoLineGeometries);
        }
        tracing::debug!(lines = network.len(), segments = segments.len(), "built road segment index");
        Ok(Self {
            tree: RTree::bulk_load(segments),
        })
    }

    /// Nearest segment to a WGS84 point, with the distance in Mercator meters.
    fn nearest(&self, point: &Point<f64>) -> Option<(&Segment, [f64; 2], f64)> {
        let m = to_mercator(point.x(), point.y());
        let query = [m.x, m.y];
        let segment = self.tree.nearest_neighbor(&query)?;
        Some((segment, query, segment.distance_2(&query).sqrt()))
    }

    /// Projection of `point` onto the nearest segment within `tolerance` meters.
    pub fn snap(&self, point: &Point<f64>, tolerance: f64) -> Option<Point<f64>> {
        let (segment, query, distance) = self.nearest(point)?;
        if distance > tolerance {
            return None;
        }
        let snapped = segment.project(&query);
        Some(Point::from(from_mercator(snapped[0], snapped[1])))
    }

    /// Bearing of the segment nearest to `point`.
    pub fn nearest_bearing(&self, point: &Point<f64>) -> Option<f64> {
        self.nearest(point).map(|(segment, _, _)| segment.bearing())
    }
}

/// Returns whichever of `bearing` and `bearing + 180` is closer to `compass_angle`.
pub fn align_bearing(bearing: f64, compass_angle: f64) -> f64 {
    let reverse = (bearing + 180.0) % 360.0;
    if angle_difference(bearing, compass_angle) <= angle_difference(reverse, compass_angle) {
        bearing
    } else {
        reverse
    }
}

/// Snaps every image to the nearest road segment within `tolerance` meters.
///
/// Matches are written to `snapped_geometry`; images without a road in reach
/// keep `None` and are listed in a warning. With `realign_camera`,
/// [`align_compass_with_road`] runs on the result.
pub fn snap_to_road_network(
    frame: &GeoImageFrame,
    tolerance: f64,
    network: &RoadNetwork,
    realign_camera: bool,
) -> Result<GeoImageFrame, SnapError> {
    if !tolerance.is_finite() || tolerance < 0.0 {
        return Err(SnapError::InvalidTolerance(tolerance));
    }
    let index = SegmentIndex::new(network)?;

    let mut snapped = frame.clone();
    let mut missing = Vec::new();
    for record in snapped.records_mut() {
        record.snapped_geometry = index.snap(&record.geometry, tolerance);
        if record.snapped_geometry.is_none() {
            missing.push(record.image_url.clone());
        }
    }
    if !missing.is_empty() {
        tracing::warn!(
            count = missing.len(),
            ?missing,
            "not all images were snapped, try increasing the tolerance or changing the road network"
        );
    }
    tracing::info!(
        snapped = snapped.len() - missing.len(),
        total = snapped.len(),
        tolerance,
        "snapped images to road network"
    );

    if realign_camera {
        if snapped.iter().all(|r| r.compass_angle.is_none()) {
            tracing::warn!("realign_camera requires compass_angle, cannot calculate snapped camera angle");
        } else {
            align_with_index(&mut snapped, &index);
        }
    }
    Ok(snapped)
}

/// Sets `snapped_angle` to the road direction closest to each image's `compass_angle`.
///
/// Rows without `snapped_geometry` or without `compass_angle` are left unchanged.
pub fn align_compass_with_road(frame: &GeoImageFrame, network: &RoadNetwork) -> Result<GeoImageFrame, SnapError> {
    let index = SegmentIndex::new(network)?;
    let mut aligned = frame.clone();
    align_with_index(&mut aligned, &index);
    Ok(aligned)
}

fn align_with_index(frame: &mut GeoImageFrame, index: &SegmentIndex) {
    if frame.iter().any(|r| r.snapped_geometry.is_none()) {
        tracing::warn!(
            "frame contains rows with empty snapped_geometry, non-snapped images will be skipped"
        );
    }
    for record in frame.records_mut() {
        let (Some(snapped), Some(compass)) = (record.snapped_geometry, record.compass_angle) else {
            continue;
        };
        if let Some(bearing) = index.nearest_bearing(&snapped) {
            record.snapped_angle = Some(align_bearing(bearing, compass));
        }
    }
}
