//! Field lists understood by the Mapillary Graph API `images` endpoint.

use super::MapillaryError;

/// Fields requested when the caller does not pass its own list.
pub const DEFAULT_FIELDS: [&str; 21] = [
    "id",
    "altitude",
    "atomic_scale",
    "camera_parameters",
    "camera_type",
    "captured_at",
    "compass_angle",
    "computed_altitude",
    "computed_compass_angle",
    "computed_geometry",
    "computed_rotation",
    "exif_orientation",
    "geometry",
    "height",
    "thumb_1024_url",
    "merge_cc",
    "mesh",
    "sequence",
    "sfm_cluster",
    "width",
    "detections",
];

/// Image URL fields, in order of preference when a response carries several.
pub const IMAGE_URL_KEYS: [&str; 4] = [
    "thumb_256_url",
    "thumb_1024_url",
    "thumb_2048_url",
    "thumb_original_url",
];

pub const REQUIRED_FIELDS: [&str; 2] = ["id", "geometry"];

/// Checks that a custom field list can produce valid frame rows.
pub fn validate_fields<S: AsRef<str>>(fields: &[S]) -> Result<(), MapillaryError> {
    let has = |name: &str| fields.iter().any(|f| f.as_ref() == name);
    let mut missing: Vec<String> = REQUIRED_FIELDS
        .iter()
        .filter(|f| !has(f))
        .map(|f| f.to_string())
        .collect();
    if !IMAGE_URL_KEYS.iter().any(|k| has(k)) {
        missing.push(format!("one of {}", IMAGE_URL_KEYS.join("/")));
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(MapillaryError::InvalidFields(missing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_fields_are_valid() {
        validate_fields(&DEFAULT_FIELDS).unwrap();
    }

    #[test]
    fn test_missing_required_fields() {
        let err = validate_fields(&["id", "thumb_256_url"]).unwrap_err();
        assert!(matches!(err, MapillaryError::InvalidFields(ref m) if m == &vec!["geometry".to_string()]));

        let err = validate_fields(&["id", "geometry"]).unwrap_err();
        assert!(matches!(err, MapillaryError::InvalidFields(ref m) if m.len() == 1 && m[0].starts_with("one of")));
    }
}
