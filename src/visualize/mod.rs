//! Standalone Leaflet maps of a [`GeoImageFrame`].
//!
//! Each geometry column becomes a layer group of camera markers rotated by the
//! matching angle column, toggled with a layer control.

pub mod icon;
pub mod popup;

use crate::frame::GeoImageFrame;
use crate::frame::error::FrameError;
use crate::frame::record::ImageRecord;
use bon::Builder;
use geo::Point;
use icon::{ICON_SIZE, generate_arrow_icon};
use popup::popup_html;
use std::path::Path;

const LEAFLET_VERSION: &str = "1.9.4";

/// Point columns that can be drawn as an extra layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryLayer {
    Snapped,
    Computed,
}

impl GeometryLayer {
    pub fn column(&self) -> &'static str {
        match self {
            GeometryLayer::Snapped => "snapped_geometry",
            GeometryLayer::Computed => "computed_geometry",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            GeometryLayer::Snapped => "Snapped",
            GeometryLayer::Computed => "Computed",
        }
    }

    fn point(&self, record: &ImageRecord) -> Option<Point<f64>> {
        match self {
            GeometryLayer::Snapped => record.snapped_geometry,
            GeometryLayer::Computed => record.computed_geometry,
        }
    }

    fn angle(&self, record: &ImageRecord) -> Option<f64> {
        match self {
            GeometryLayer::Snapped => record.snapped_angle,
            GeometryLayer::Computed => record.computed_compass_angle,
        }
    }
}

impl std::str::FromStr for GeometryLayer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "snapped" | "snapped_geometry" => Ok(GeometryLayer::Snapped),
            "computed" | "computed_geometry" => Ok(GeometryLayer::Computed),
            other => Err(format!("unknown geometry layer '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Builder)]
pub struct MapOptions {
    /// A known tile set name or an `{z}/{x}/{y}` URL template.
    #[builder(default = "OpenStreetMap".to_string(), into)]
    pub tiles: String,
    #[builder(default = 18)]
    pub zoom_start: u8,
    #[builder(default = 19)]
    pub max_zoom: u8,
    /// Extra columns listed in every popup.
    #[builder(default)]
    pub additional_properties: Vec<String>,
    #[builder(default)]
    pub additional_geometries: Vec<GeometryLayer>,
}

impl Default for MapOptions {
    fn default() -> Self {
        MapOptions::builder().build()
    }
}

/// Tile URL template and attribution.
fn tile_layer(tiles: &str) -> (String, &'static str) {
    const OSM_ATTRIBUTION: &str = "&copy; OpenStreetMap contributors";
    const CARTO_ATTRIBUTION: &str = "&copy; OpenStreetMap contributors &copy; CARTO";
    match tiles.to_ascii_lowercase().as_str() {
        "openstreetmap" => ("https://tile.openstreetmap.org/{z}/{x}/{y}.png".into(), OSM_ATTRIBUTION),
        "cartodb positron" => (
            "https://{s}.basemaps.cartocdn.com/light_all/{z}/{x}/{y}.png".into(),
            CARTO_ATTRIBUTION,
        ),
        "cartodb dark_matter" => (
            "https://{s}.basemaps.cartocdn.com/dark_all/{z}/{x}/{y}.png".into(),
            CARTO_ATTRIBUTION,
        ),
        _ if tiles.contains("{z}") => (tiles.to_string(), ""),
        _ => {
            tracing::warn!(tiles, "unknown tile set, using OpenStreetMap");
            tile_layer("OpenStreetMap")
        }
    }
}

/// JSON string literal that is also safe inside a `<script>` element.
fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string())
        .to_string()
        .replace("</", "<\\/")
}

impl GeoImageFrame {
    /// Renders the frame as a self-contained HTML page.
    ///
    /// # Errors
    ///
    /// [`FrameError::Empty`] since the map is centered on the first record.
    pub fn map(&self, options: &MapOptions) -> Result<String, FrameError> {
        let first = self.get(0).ok_or(FrameError::Empty)?;
        let (tile_url, attribution) = tile_layer(&options.tiles);

        let mut script = String::new();
        script.push_str(&format!(
            "const map = L.map('map', {{ maxZoom: {max} }}).setView([{lat}, {lon}], {zoom});\n",
            max = options.max_zoom,
            lat = first.geometry.y(),
            lon = first.geometry.x(),
            zoom = options.zoom_start,
        ));
        script.push_str(&format!(
            "L.tileLayer({}, {{ maxZoom: {}, attribution: {} }}).addTo(map);\n",
            js_string(&tile_url),
            options.max_zoom,
            js_string(attribution)
        ));
        script.push_str("const overlays = {};\n");

        let mut layers: Vec<(&str, Box<dyn Fn(&ImageRecord) -> (Option<Point<f64>>, Option<f64>)>)> =
            vec![("Images", Box::new(|r: &ImageRecord| (Some(r.geometry), r.compass_angle)))];
        for layer in &options.additional_geometries {
            let layer = *layer;
            layers.push((layer.label(), Box::new(move |r: &ImageRecord| (layer.point(r), layer.angle(r)))));
        }

        for (group, (label, extract)) in layers.iter().enumerate() {
            script.push_str(&format!("const group{group} = L.layerGroup().addTo(map);\n"));
            let mut skipped = Vec::new();
            for (index, record) in self.iter().enumerate() {
                let (Some(point), angle) = extract(record) else {
                    skipped.push(index);
                    continue;
                };
                let icon = generate_arrow_icon(angle.unwrap_or(0.0));
                let popup = popup_html(record, &options.additional_properties);
                script.push_str(&format!(
                    "L.marker([{}, {}], {{ icon: L.icon({{ iconUrl: {}, iconSize: [{ICON_SIZE}, {ICON_SIZE}] }}) }}).bindPopup({}, {{ maxWidth: 500 }}).addTo(group{group});\n",
                    point.y(),
                    point.x(),
                    js_string(&icon),
                    js_string(&popup)
                ));
            }
            if !skipped.is_empty() {
                tracing::warn!(layer = *label, rows = ?skipped, "rows without a point in this layer were skipped");
            }
            script.push_str(&format!("overlays[{}] = group{group};\n", js_string(label)));
        }
        script.push_str("L.control.layers({}, overlays).addTo(map);\n");

        Ok(format!(
            r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8"/>
<meta name="viewport" content="width=device-width, initial-scale=1.0"/>
<link rel="stylesheet" href="https://unpkg.com/leaflet@{LEAFLET_VERSION}/dist/leaflet.css"/>
<script src="https://unpkg.com/leaflet@{LEAFLET_VERSION}/dist/leaflet.js"></script>
<style>html, body, #map {{ height: 100%; margin: 0; }}</style>
</head>
<body>
<div id="map"></div>
<script>
{script}</script>
</body>
</html>
"#
        ))
    }

    /// Writes [`GeoImageFrame::map`] output to `path`.
    pub fn save_map(&self, path: impl AsRef<Path>, options: &MapOptions) -> Result<(), FrameError> {
        let html = self.map(options)?;
        std::fs::write(path.as_ref(), html)?;
        tracing::info!(path = %path.as_ref().display(), rows = self.len(), "wrote map");
        Ok(())
    }
}
