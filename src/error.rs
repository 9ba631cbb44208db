use thiserror::Error;

/// The primary error type for the landlensdb crate.
#[derive(Error, Debug)]
pub enum LandlensError {
    #[error("Exiftool failed to execute or process the file")]
    Exiftool(#[from] exiftool::ExifToolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // --- Custom Module Errors ---
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Invalid image frame: {0}")]
    Frame(#[from] crate::frame::error::FrameError),

    #[error("Local image loading failed: {0}")]
    Exif(#[from] crate::local::ExifError),

    #[error("Time conversion failed: {0}")]
    Time(#[from] crate::time::TimeError),

    #[error("Invalid geometry input: {0}")]
    Geometry(#[from] crate::geometry::GeometryError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] crate::http::HttpError),

    #[error("Mapillary request failed: {0}")]
    Mapillary(#[from] crate::mapillary::MapillaryError),

    #[error("Road network error: {0}")]
    Network(#[from] crate::network::NetworkError),

    #[error("Snapping failed: {0}")]
    Snap(#[from] crate::snap::SnapError),

    #[error("Database error: {0}")]
    Db(#[from] crate::db::DbError),

    #[error("Data URL generation failed: {0}")]
    DataUrl(#[from] crate::data_url::DataUrlError),

    #[error("Mapillary import failed: {0}")]
    Import(#[from] crate::import::ImportError),

    #[error("Panorama projection failed: {0}")]
    Pano(#[from] crate::pano::PanoError),
}
