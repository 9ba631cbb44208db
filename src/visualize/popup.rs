//! Popup HTML for map markers.

use crate::data_url::file_to_data_url;
use crate::frame::ImageRecord;
use std::path::Path;

/// Bounding box for inlined local images.
const POPUP_IMAGE_SIZE: (u32, u32) = (610, 610);

pub(crate) fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn capitalize(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// One label/value row; empty values show as `Unknown`.
pub fn table_row(label: &str, value: Option<&str>) -> String {
    let value = value.filter(|v| !v.trim().is_empty()).unwrap_or("Unknown");
    format!(
        r##"<tr><td style="background-color: #3e95b5;"><span style="color: #ffffff; padding-left: 5px;">{}</span></td><td style="width: 200px; padding-left: 5px; background-color: #f2f9ff;">{}</td></tr>"##,
        escape_html(label),
        escape_html(value)
    )
}

/// Image source for the popup. Existing local files are inlined so the map
/// works without access to the file system.
fn image_src(image_url: &str) -> String {
    let path = Path::new(image_url);
    if !path.is_file() {
        return image_url.to_string();
    }
    match file_to_data_url(path, POPUP_IMAGE_SIZE) {
        Ok(url) => url,
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "could not inline image, linking it instead");
            image_url.to_string()
        }
    }
}

pub fn popup_html(record: &ImageRecord, additional_properties: &[String]) -> String {
    let mut rows = table_row("Image", Some(&record.name));
    for property in additional_properties {
        rows.push_str(&table_row(&capitalize(property), record.column_display(property).as_deref()));
    }
    format!(
        r#"<center><table style="width: 305px;"><tbody>{rows}</tbody></table></center><center><img src="{}" width="305"></center>"#,
        escape_html(&image_src(&record.image_url))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Point;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_table_row_unknown_and_escaping() {
        assert!(table_row("Sequence", None).contains(">Unknown</td>"));
        assert!(table_row("Sequence", Some("")).contains(">Unknown</td>"));
        assert!(table_row("Note", Some("<b>&")).contains("&lt;b&gt;&amp;"));
    }

    #[test]
    fn test_popup_lists_properties_and_remote_image() {
        let mut record = ImageRecord::new("mly|1", "https://example.com/1.jpg", Point::new(0.0, 0.0));
        record.sequence = Some("abc".into());
        let html = popup_html(&record, &["sequence".to_string(), "camera_type".to_string()]);

        assert!(html.contains(">Image</span>"));
        assert!(html.contains(">mly|1</td>"));
        assert!(html.contains(">Sequence</span>"));
        assert!(html.contains(">abc</td>"));
        assert!(html.contains(">Camera_type</span>"));
        assert!(html.contains(">Unknown</td>"));
        assert!(html.contains(r#"src="https://example.com/1.jpg""#));
    }

    #[test]
    fn test_popup_inlines_local_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.png");
        RgbImage::from_pixel(8, 8, Rgb([10, 200, 30])).save(&path).unwrap();
        let record = ImageRecord::new("local.png", path.to_string_lossy(), Point::new(0.0, 0.0));

        let html = popup_html(&record, &[]);
        assert!(html.contains(r#"src="data:image/jpeg;base64,"#));
    }
}
