//! # landlensdb
//!
//! Load, geotag, snap, map and store geolocated street-level images.
//!
//! The central type is [`GeoImageFrame`], an ordered table of [`ImageRecord`]s
//! that each carry a name, an image URL (or local path) and a WGS84 point.
//!
//! ## Key Features
//!
//! - **Local images**: geotags, compass angle and capture time from EXIF via exiftool.
//! - **Mapillary**: recursive bounding-box queries against the Graph API.
//! - **Road networks**: OpenStreetMap lines, cleaned and cached, for snapping.
//! - **Snapping**: image locations and camera angles aligned to the nearest road.
//! - **Maps**: standalone Leaflet HTML with per-image camera markers.
//! - **PostGIS**: table creation, bulk writes, upserts and spatial queries.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use landlensdb::local::LocalImageLoader;
//! use landlensdb::network::RoadNetwork;
//! use landlensdb::snap::snap_to_road_network;
//! use landlensdb::visualize::MapOptions;
//!
//! fn main() -> Result<(), landlensdb::LandlensError> {
//!     let mut loader = LocalImageLoader::builder().build()?;
//!     let frame = loader.load_images("photos")?;
//!
//!     let roads = RoadNetwork::from_geojson_file("roads.geojson")?;
//!     let snapped = snap_to_road_network(&frame, 10.0, &roads, true)?;
//!
//!     snapped.save_map("map.html", &MapOptions::default())?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod data_url;
pub mod db;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod http;
pub mod import;
pub mod local;
pub mod logging;
pub mod mapillary;
pub mod network;
pub mod pano;
pub mod snap;
pub mod time;
pub mod visualize;

pub use error::LandlensError;
pub use frame::{GeoImageFrame, ImageRecord};
