//! Graph API JSON to [`ImageRecord`].

use super::MapillaryError;
use super::fields::IMAGE_URL_KEYS;
use crate::frame::ImageRecord;
use crate::time::localize_epoch_millis;
use geo::Point;
use serde_json::{Map, Value};

/// Converts one image object of a Graph API response.
///
/// `geometry` and `computed_geometry` become points, `id` becomes `mly_id` and
/// `name` is `mly|<id>`. The first present image URL key becomes `image_url`.
/// Fields without a dedicated column end up in `properties`.
pub fn json_to_record(value: Value) -> Result<ImageRecord, MapillaryError> {
    let Value::Object(mut obj) = value else {
        return Err(MapillaryError::UnexpectedResponse("image entry is not an object".into()));
    };

    let id = match obj.remove("id") {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(MapillaryError::UnexpectedResponse("image entry without id".into())),
    };
    let geometry = obj
        .remove("geometry")
        .as_ref()
        .and_then(geojson_point)
        .ok_or_else(|| MapillaryError::MissingField { id: id.clone(), field: "geometry" })?;
    let image_url = IMAGE_URL_KEYS
        .iter()
        .find_map(|key| match obj.remove(*key) {
            Some(Value::String(url)) if !url.is_empty() => Some(url),
            _ => None,
        })
        .ok_or_else(|| MapillaryError::MissingField { id: id.clone(), field: "image_url" })?;
    // Unused URL keys would otherwise leak into properties.
    for key in IMAGE_URL_KEYS {
        obj.remove(key);
    }

    let mut record = ImageRecord::new(format!("mly|{id}"), image_url, geometry);
    record.mly_id = Some(id);

    record.computed_geometry = obj.remove("computed_geometry").as_ref().and_then(geojson_point);
    record.captured_at = match obj.remove("captured_at").and_then(|v| v.as_i64()) {
        Some(ms) => Some(localize_epoch_millis(ms, geometry.y(), geometry.x())?),
        None => None,
    };
    record.sequence = obj.remove("sequence").and_then(as_string);
    record.altitude = take_f64(&mut obj, "altitude");
    record.computed_altitude = take_f64(&mut obj, "computed_altitude");
    record.compass_angle = take_f64(&mut obj, "compass_angle");
    record.computed_compass_angle = take_f64(&mut obj, "computed_compass_angle");
    record.camera_type = obj.remove("camera_type").and_then(as_string);
    record.camera_parameters = obj.remove("camera_parameters").and_then(join_list);
    record.computed_rotation = obj.remove("computed_rotation").and_then(join_list);
    record.exif_orientation = obj
        .remove("exif_orientation")
        .and_then(|v| v.as_i64())
        .and_then(|v| i32::try_from(v).ok());
    record.width = take_u32(&mut obj, "width");
    record.height = take_u32(&mut obj, "height");

    obj.retain(|_, v| !v.is_null());
    record.properties = obj;
    Ok(record)
}

/// GeoJSON point object (`{"type": "Point", "coordinates": [x, y]}`) to a [`Point`].
fn geojson_point(value: &Value) -> Option<Point<f64>> {
    let coords = value.get("coordinates")?.as_array()?;
    match (coords.first()?.as_f64(), coords.get(1)?.as_f64()) {
        (Some(x), Some(y)) => Some(Point::new(x, y)),
        _ => None,
    }
}

fn take_f64(obj: &mut Map<String, Value>, key: &str) -> Option<f64> {
    obj.remove(key).and_then(|v| v.as_f64())
}

fn take_u32(obj: &mut Map<String, Value>, key: &str) -> Option<u32> {
    obj.remove(key)
        .and_then(|v| v.as_u64())
        .and_then(|v| u32::try_from(v).ok())
}

fn as_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Lists are stored comma-joined, e.g. `[0.5, -0.1, 0.02]` becomes `0.5,-0.1,0.02`.
fn join_list(value: Value) -> Option<String> {
    match value {
        Value::Array(items) => Some(
            items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(","),
        ),
        other => as_string(other),
    }
}
