//! Geotag extraction from exiftool's numeric (`-n`) JSON output.

use super::ExifError;
use crate::frame::ImageRecord;
use crate::geometry::validate_lon_lat;
use crate::pano::is_equirectangular;
use crate::time::{localize_naive, parse_exif_naive};
use geo::Point;
use serde_json::Value;
use std::path::Path;

/// Focal lengths below this value (in mm) are treated as fisheye lenses.
const FISHEYE_FOCAL_LENGTH: f64 = 1.5;

/// Position and heading read from the GPS block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geotag {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub image_direction: Option<f64>,
}

/// Parses `"num/den"`. `None` when the denominator is zero or either side is not a number.
pub fn parse_rational(s: &str) -> Option<f64> {
    let (num, den) = s.split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    (den != 0.0).then(|| num / den)
}

pub fn dms_to_decimal(degrees: f64, minutes: f64, seconds: f64) -> f64 {
    degrees + minutes / 60.0 + seconds / 3600.0
}

/// Reads a coordinate that may be a number, a rational string or a
/// `"deg min sec"` triple (each part possibly rational).
fn coordinate_value(value: &Value) -> Option<f64> {
    if let Some(v) = value.as_f64() {
        return Some(v);
    }
    let s = value.as_str()?.trim();
    if let Ok(v) = s.parse::<f64>() {
        return Some(v);
    }
    let parts: Vec<f64> = s
        .split([' ', ','])
        .filter(|p| !p.is_empty())
        .map(|p| p.parse::<f64>().ok().or_else(|| parse_rational(p)))
        .collect::<Option<_>>()?;
    match parts.as_slice() {
        [single] => Some(*single),
        [d, m, s] => Some(dms_to_decimal(*d, *m, *s)),
        _ => None,
    }
}

fn get_f64(exif: &Value, key: &str) -> Option<f64> {
    let value = exif.get(key)?;
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok().or_else(|| parse_rational(s))))
}

fn get_str<'a>(exif: &'a Value, key: &str) -> Option<&'a str> {
    exif.get(key).and_then(Value::as_str)
}

/// Signed decimal coordinate. Unsigned values are negated for `S`/`W` references.
fn signed_coordinate(exif: &Value, key: &str, ref_key: &str, negative_refs: [&str; 2]) -> Option<f64> {
    let value = coordinate_value(exif.get(key)?)?;
    let negative = get_str(exif, ref_key)
        .map(str::trim)
        .is_some_and(|r| negative_refs.iter().any(|n| r.eq_ignore_ascii_case(n)));
    Some(if negative && value > 0.0 { -value } else { value })
}

pub fn extract_geotag(exif: &Value) -> Result<Geotag, ExifError> {
    let latitude = signed_coordinate(exif, "GPSLatitude", "GPSLatitudeRef", ["S", "South"]);
    let longitude = signed_coordinate(exif, "GPSLongitude", "GPSLongitudeRef", ["W", "West"]);
    let (Some(latitude), Some(longitude)) = (latitude, longitude) else {
        return Err(ExifError::NoGeotag);
    };
    validate_lon_lat(&Point::new(longitude, latitude))
        .map_err(|_| ExifError::InvalidCoordinates { latitude, longitude })?;

    Ok(Geotag {
        latitude,
        longitude,
        altitude: get_f64(exif, "GPSAltitude"),
        image_direction: get_f64(exif, "GPSImgDirection"),
    })
}

/// `spherical` for equirectangular panoramas, otherwise inferred from the focal length.
pub fn infer_camera_type(exif: &Value) -> Option<&'static str> {
    if is_equirectangular(exif) {
        return Some("spherical");
    }
    let focal_length = get_f64(exif, "FocalLength").filter(|f| *f > 0.0)?;
    Some(if focal_length < FISHEYE_FOCAL_LENGTH { "fisheye" } else { "perspective" })
}

/// Builds a frame row for a local image file from its numeric EXIF.
pub fn record_from_exif(path: &Path, exif: &Value) -> Result<ImageRecord, ExifError> {
    let geotag = extract_geotag(exif)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut record = ImageRecord::new(
        name,
        path.to_string_lossy(),
        Point::new(geotag.longitude, geotag.latitude),
    );

    record.altitude = geotag.altitude;
    record.compass_angle = geotag.image_direction;
    record.exif_orientation = exif
        .get("Orientation")
        .and_then(Value::as_i64)
        .and_then(|v| i32::try_from(v).ok());
    record.camera_type = infer_camera_type(exif).map(str::to_owned);
    record.width = exif
        .get("ImageWidth")
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok());
    record.height = exif
        .get("ImageHeight")
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok());
    record.captured_at = ["DateTimeOriginal", "CreateDate", "DateTime", "ModifyDate"]
        .iter()
        .find_map(|key| get_str(exif, key).and_then(parse_exif_naive))
        .map(|naive| localize_naive(naive, geotag.latitude, geotag.longitude));

    if let Some(make) = get_str(exif, "Make") {
        record.properties.insert("camera_make".into(), Value::String(make.trim().to_string()));
    }
    if let Some(model) = get_str(exif, "Model") {
        record.properties.insert("camera_model".into(), Value::String(model.trim().to_string()));
    }
    if let Some(focal_length) = get_f64(exif, "FocalLength") {
        record.properties.insert("focal_length".into(), Value::from(focal_length));
    }
    Ok(record)
}
