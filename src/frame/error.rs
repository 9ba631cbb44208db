use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Row {index}: required column '{column}' is empty")]
    MissingValue { index: usize, column: &'static str },

    #[error("Row {index}: invalid geometry ({reason})")]
    InvalidGeometry { index: usize, reason: String },

    #[error("Frame has no rows")]
    Empty,

    #[error("'image_url' column has duplicate entries: {0:?}")]
    DuplicateImageUrl(Vec<String>),

    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error("Feature {0} does not carry a point geometry")]
    NotAPoint(usize),

    #[error("Feature {index} could not be read: {source}")]
    BadFeature {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Feature {index}: unreadable 'captured_at' value '{value}'")]
    BadCapturedAt { index: usize, value: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
