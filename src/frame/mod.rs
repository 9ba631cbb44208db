//! The [`GeoImageFrame`]: an ordered, validated collection of geolocated image records.

pub mod download;
pub mod error;
pub mod geojson_io;
pub mod record;

use crate::frame::error::FrameError;
use crate::geometry::{BBox, validate_lon_lat};
pub use record::ImageRecord;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// Coordinate reference system of every geometry held by a frame.
pub const CRS: &str = "EPSG:4326";

/// A table of geolocated images.
///
/// Every row has a non-empty `name`, a non-empty `image_url` and a valid
/// WGS84 point geometry. The invariant is checked on construction and on
/// every insertion, so downstream code (map rendering, database writes) can
/// rely on it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GeoImageFrame {
    records: Vec<ImageRecord>,
}

impl GeoImageFrame {
    /// Builds a frame, verifying the structure of every record.
    ///
    /// # Errors
    ///
    /// * [`FrameError::MissingValue`] when `name` or `image_url` is empty.
    /// * [`FrameError::InvalidGeometry`] when a point is non-finite or outside WGS84 bounds.
    pub fn new(records: Vec<ImageRecord>) -> Result<Self, FrameError> {
        for (index, record) in records.iter().enumerate() {
            verify_record(index, record)?;
        }
        Ok(Self { records })
    }

    /// Re-runs the structural checks, e.g. after records were edited in place.
    pub fn verify_structure(&self) -> Result<(), FrameError> {
        self.records
            .iter()
            .enumerate()
            .try_for_each(|(index, record)| verify_record(index, record))
    }

    pub fn push(&mut self, record: ImageRecord) -> Result<(), FrameError> {
        verify_record(self.records.len(), &record)?;
        self.records.push(record);
        Ok(())
    }

    /// Appends all rows of `other`; both frames are already valid.
    pub fn extend(&mut self, other: GeoImageFrame) {
        self.records.extend(other.records);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ImageRecord> {
        self.records.iter()
    }

    pub fn records(&self) -> &[ImageRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<ImageRecord> {
        self.records
    }

    pub fn get(&self, index: usize) -> Option<&ImageRecord> {
        self.records.get(index)
    }

    /// Mutable access for crate-internal passes that only touch optional columns.
    pub(crate) fn records_mut(&mut self) -> &mut [ImageRecord] {
        &mut self.records
    }

    pub fn crs(&self) -> &'static str {
        CRS
    }

    /// Bounding box of all primary geometries.
    pub fn bbox(&self) -> Option<BBox> {
        BBox::from_points(self.records.iter().map(|r| &r.geometry))
    }

    /// One JSON object per row.
    pub fn to_dict_records(&self) -> Result<Vec<Map<String, Value>>, serde_json::Error> {
        self.records
            .iter()
            .map(|record| match serde_json::to_value(record)? {
                Value::Object(map) => Ok(map),
                other => Ok(Map::from_iter([("value".to_string(), other)])),
            })
            .collect()
    }

    /// Keeps the first record for every Mapillary id. Returns how many rows were dropped.
    pub fn drop_duplicates_by_mly_id(&mut self) -> usize {
        let before = self.records.len();
        let mut seen = HashSet::new();
        self.records.retain(|record| match &record.mly_id {
            Some(id) => seen.insert(id.clone()),
            None => true,
        });
        before - self.records.len()
    }

    /// Image URLs that occur more than once, in first-seen order.
    pub fn duplicate_image_urls(&self) -> Vec<String> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        let mut order = Vec::new();
        for record in &self.records {
            let count = counts.entry(record.image_url.as_str()).or_insert(0);
            *count += 1;
            if *count == 2 {
                order.push(record.image_url.clone());
            }
        }
        order
    }

    pub fn ensure_unique_image_urls(&self) -> Result<(), FrameError> {
        let duplicates = self.duplicate_image_urls();
        if duplicates.is_empty() {
            Ok(())
        } else {
            Err(FrameError::DuplicateImageUrl(duplicates))
        }
    }

    /// Returns a copy of the frame with records not matching `keep` removed.
    pub fn filter(&self, keep: impl Fn(&ImageRecord) -> bool) -> GeoImageFrame {
        GeoImageFrame {
            records: self.records.iter().filter(|r| keep(r)).cloned().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a GeoImageFrame {
    type Item = &'a ImageRecord;
    type IntoIter = std::slice::Iter<'a, ImageRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl IntoIterator for GeoImageFrame {
    type Item = ImageRecord;
    type IntoIter = std::vec::IntoIter<ImageRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

fn verify_record(index: usize, record: &ImageRecord) -> Result<(), FrameError> {
    if record.name.trim().is_empty() {
        return Err(FrameError::MissingValue { index, column: "name" });
    }
    if record.image_url.trim().is_empty() {
        return Err(FrameError::MissingValue { index, column: "image_url" });
    }
    validate_lon_lat(&record.geometry).map_err(|e| FrameError::InvalidGeometry {
        index,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Point;

    fn sample_record() -> ImageRecord {
        ImageRecord::new("Sample", "http://example.com/image.jpg", Point::new(0.0, 0.0))
    }

    #[test]
    fn test_frame_initialization() {
        let frame = GeoImageFrame::new(vec![sample_record()]).unwrap();
        assert_eq!(frame.len(), 1);
        assert_eq!(frame.crs(), "EPSG:4326");
        frame.verify_structure().unwrap();
    }

    #[test]
    fn test_rejects_empty_required_columns() {
        let mut no_name = sample_record();
        no_name.name = "  ".into();
        assert!(matches!(
            GeoImageFrame::new(vec![no_name]),
            Err(FrameError::MissingValue { index: 0, column: "name" })
        ));

        let mut no_url = sample_record();
        no_url.image_url = String::new();
        assert!(matches!(
            GeoImageFrame::new(vec![sample_record(), no_url]),
            Err(FrameError::MissingValue { index: 1, column: "image_url" })
        ));
    }

    #[test]
    fn test_rejects_invalid_geometry() {
        let mut bad = sample_record();
        bad.geometry = Point::new(f64::NAN, 10.0);
        assert!(matches!(
            GeoImageFrame::new(vec![bad]),
            Err(FrameError::InvalidGeometry { index: 0, .. })
        ));

        let mut frame = GeoImageFrame::default();
        let mut out_of_range = sample_record();
        out_of_range.geometry = Point::new(10.0, 91.0);
        assert!(frame.push(out_of_range).is_err());
        assert!(frame.is_empty());
    }

    #[test]
    fn test_to_dict_records() {
        let mut record = sample_record();
        record.compass_angle = Some(12.5);
        let frame = GeoImageFrame::new(vec![record]).unwrap();

        let records = frame.to_dict_records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["name"], "Sample");
        assert_eq!(records[0]["compass_angle"], 12.5);
        assert!(!records[0].contains_key("snapped_angle"));
    }

    #[test]
    fn test_drop_duplicates_by_mly_id_keeps_first() {
        let mut a = sample_record();
        a.mly_id = Some("1".into());
        let mut b = sample_record();
        b.mly_id = Some("1".into());
        b.name = "second".into();
        let c = sample_record();

        let mut frame = GeoImageFrame::new(vec![a, b, c]).unwrap();
        assert_eq!(frame.drop_duplicates_by_mly_id(), 1);
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.records()[0].name, "Sample");
    }

    #[test]
    fn test_duplicate_image_urls() {
        let mut other = sample_record();
        other.image_url = "http://example.com/other.jpg".into();
        let frame = GeoImageFrame::new(vec![sample_record(), other, sample_record(), sample_record()]).unwrap();

        assert_eq!(frame.duplicate_image_urls(), vec!["http://example.com/image.jpg".to_string()]);
        assert!(matches!(
            frame.ensure_unique_image_urls(),
            Err(FrameError::DuplicateImageUrl(_))
        ));
    }
}
