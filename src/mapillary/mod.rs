//! Client for the Mapillary Graph API.
//!
//! Bounding-box queries are answered with at most [`LIMIT`] images. A full page
//! means there may be more, so the box is split into quadrants and each one is
//! fetched again, down to a maximum recursion depth.

pub mod convert;
pub mod fields;

pub use convert::json_to_record;
pub use fields::{DEFAULT_FIELDS, IMAGE_URL_KEYS, validate_fields};

use crate::frame::GeoImageFrame;
use crate::frame::error::FrameError;
use crate::geometry::BBox;
use crate::http::{self, HttpError, RetryPolicy, Timeouts};
use crate::time::{TimeError, date_to_timestamp};
use bon::bon;
use rayon::prelude::*;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

pub const BASE_URL: &str = "https://graph.mapillary.com";
/// Page size requested from, and capped by, the API.
pub const LIMIT: usize = 2000;
pub const DEFAULT_MAX_RECURSION_DEPTH: u32 = 25;

#[derive(Error, Debug)]
pub enum MapillaryError {
    #[error("Fields must contain: {}", .0.join(", "))]
    InvalidFields(Vec<String>),

    #[error("Image {id} has no {field}")]
    MissingField { id: String, field: &'static str },

    #[error("Unexpected Mapillary response: {0}")]
    UnexpectedResponse(String),

    #[error("Data count reached the Mapillary limit of {0}, request fewer sequence ids")]
    LimitReached(usize),

    #[error("Invalid base URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Error connecting to the Mapillary API: {0}")]
    Http(#[from] HttpError),

    #[error(transparent)]
    Time(#[from] TimeError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("Failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Mapillary Graph API client.
///
/// ```rust,no_run
/// # use landlensdb::mapillary::MapillaryClient;
/// # use landlensdb::geometry::BBox;
/// # fn main() -> Result<(), landlensdb::LandlensError> {
/// let client = MapillaryClient::builder().token("MLY|...".to_string()).build()?;
/// let bbox: BBox = "12.967,55.607,12.968,55.608".parse()?;
/// let frame = client.fetch_within_bbox().bbox(bbox).start_date("2023-01-01").call()?;
/// println!("{} images", frame.len());
/// # Ok(())
/// # }
/// ```
pub struct MapillaryClient {
    token: String,
    base_url: Url,
    limit: usize,
    timeouts: Timeouts,
    retry: RetryPolicy,
    pool: Arc<rayon::ThreadPool>,
}

#[bon]
impl MapillaryClient {
    /// # Builder Arguments
    ///
    /// * `token` - Mapillary client access token, sent as `Authorization: OAuth <token>`.
    /// * `workers` - (Default: `8`) Size of the pool that fetches quadrants concurrently.
    /// * `base_url` - (Default: [`BASE_URL`]) Graph API root.
    /// * `limit` - (Default: [`LIMIT`]) Page size.
    #[builder]
    pub fn new(
        token: String,
        #[builder(default = 8)] workers: usize,
        #[builder(default)] timeouts: Timeouts,
        #[builder(default)] retry: RetryPolicy,
        #[builder(default = BASE_URL.to_string())] base_url: String,
        #[builder(default = LIMIT)] limit: usize,
    ) -> Result<Self, MapillaryError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("mapillary-{i}"))
            .build()?;
        Ok(Self {
            token,
            base_url: Url::parse(&base_url)?,
            limit,
            timeouts,
            retry,
            pool: Arc::new(pool),
        })
    }

    /// All images inside `bbox`, optionally restricted to a capture-date window
    /// (`YYYY-MM-DD`, end date inclusive).
    ///
    /// Quadrants beyond `max_recursion_depth` are dropped with a warning.
    #[builder]
    pub fn fetch_within_bbox(
        &self,
        bbox: BBox,
        start_date: Option<&str>,
        end_date: Option<&str>,
        fields: Option<&[&str]>,
        #[builder(default = DEFAULT_MAX_RECURSION_DEPTH)] max_recursion_depth: u32,
    ) -> Result<GeoImageFrame, MapillaryError> {
        let fields = self.resolve_fields(fields)?;
        let window = Window {
            start: start_date.map(|d| date_to_timestamp(d, false)).transpose()?,
            end: end_date.map(|d| date_to_timestamp(d, true)).transpose()?,
        };

        let fetch_page =
            |area: &BBox| -> Result<Vec<Value>, MapillaryError> { take_data(self.get_json(&self.bbox_url(area, &fields, &window)?)?) };
        self.collect_within_bbox(bbox, max_recursion_depth, &fetch_page)
    }

    /// A single image by its Mapillary id.
    pub fn fetch_by_id(&self, image_id: &str, fields: Option<&[&str]>) -> Result<GeoImageFrame, MapillaryError> {
        let fields = self.resolve_fields(fields)?;
        let mut url = self.base_url.join(image_id)?;
        url.query_pairs_mut().append_pair("fields", &fields.join(","));
        let body = self.get_json(&url)?;
        self.to_frame(vec![body])
    }

    /// All images of the given sequences.
    ///
    /// # Errors
    ///
    /// [`MapillaryError::LimitReached`] when the response is a full page, since
    /// sequences cannot be split like a bounding box.
    pub fn fetch_by_sequence<S: AsRef<str>>(
        &self,
        sequence_ids: &[S],
        fields: Option<&[&str]>,
    ) -> Result<GeoImageFrame, MapillaryError> {
        let fields = self.resolve_fields(fields)?;
        let ids = sequence_ids.iter().map(|s| s.as_ref()).collect::<Vec<_>>().join(",");
        let mut url = self.base_url.join("images")?;
        url.query_pairs_mut()
            .append_pair("sequence_ids", &ids)
            .append_pair("fields", &fields.join(","));
        let data = take_data(self.get_json(&url)?)?;
        if data.len() >= self.limit {
            return Err(MapillaryError::LimitReached(self.limit));
        }
        self.to_frame(data)
    }
}

/// Fetches the `data` page for one bounding box.
type PageFetch<'a> = dyn Fn(&BBox) -> Result<Vec<Value>, MapillaryError> + Sync + 'a;

/// Capture time filter, already formatted for the API.
struct Window {
    start: Option<String>,
    end: Option<String>,
}

impl MapillaryClient {
    fn resolve_fields(&self, fields: Option<&[&str]>) -> Result<Vec<String>, MapillaryError> {
        match fields {
            Some(fields) => {
                validate_fields(fields)?;
                Ok(fields.iter().map(|f| f.to_string()).collect())
            }
            None => Ok(DEFAULT_FIELDS.iter().map(|f| f.to_string()).collect()),
        }
    }

    fn bbox_url(&self, bbox: &BBox, fields: &[String], window: &Window) -> Result<Url, MapillaryError> {
        let mut url = self.base_url.join("images")?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("fields", &fields.join(","))
                .append_pair("bbox", &bbox.to_query_string())
                .append_pair("limit", &self.limit.to_string());
            if let Some(start) = &window.start {
                query.append_pair("start_captured_at", start);
            }
            if let Some(end) = &window.end {
                query.append_pair("end_captured_at", end);
            }
        }
        Ok(url)
    }

    /// Runs the quadtree fetch on the worker pool and builds a frame without
    /// duplicate Mapillary ids (quadrants share their borders).
    fn collect_within_bbox(&self, bbox: BBox, max_depth: u32, fetch_page: &PageFetch<'_>) -> Result<GeoImageFrame, MapillaryError> {
        let images = self
            .pool
            .install(|| self.recursive_fetch(bbox, 0, max_depth, fetch_page))?;
        tracing::info!(%bbox, images = images.len(), "fetched Mapillary images");

        let mut frame = self.to_frame(images)?;
        let dropped = frame.drop_duplicates_by_mly_id();
        if dropped > 0 {
            tracing::debug!(dropped, "dropped duplicate Mapillary ids");
        }
        Ok(frame)
    }

    fn recursive_fetch(
        &self,
        bbox: BBox,
        depth: u32,
        max_depth: u32,
        fetch_page: &PageFetch<'_>,
    ) -> Result<Vec<Value>, MapillaryError> {
        if depth > max_depth {
            tracing::warn!(%bbox, max_depth, "maximum recursion depth reached, skipping area");
            return Ok(Vec::new());
        }
        let data = fetch_page(&bbox)?;
        if data.len() < self.limit {
            return Ok(data);
        }

        tracing::debug!(%bbox, depth, "page is full, splitting into quadrants");
        let children = bbox
            .split_quadrants()
            .into_par_iter()
            .map(|child| self.recursive_fetch(child, depth + 1, max_depth, fetch_page))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(children.into_iter().flatten().collect())
    }

    fn get_json(&self, url: &Url) -> Result<Value, MapillaryError> {
        let auth = format!("OAuth {}", self.token);
        let response = http::get_with_retry(
            url.as_str(),
            &[("Authorization", auth.as_str())],
            self.timeouts,
            &self.retry,
        )?;
        response
            .json()
            .map_err(|e| MapillaryError::UnexpectedResponse(e.to_string()))
    }

    fn to_frame(&self, images: Vec<Value>) -> Result<GeoImageFrame, MapillaryError> {
        let mut records = Vec::with_capacity(images.len());
        for image in images {
            match json_to_record(image) {
                Ok(record) => records.push(record),
                Err(MapillaryError::MissingField { id, field }) => {
                    tracing::warn!(%id, field, "skipping Mapillary image");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(GeoImageFrame::new(records)?)
    }
}

/// The `data` array of a paged Graph API response.
fn take_data(body: Value) -> Result<Vec<Value>, MapillaryError> {
    match body {
        Value::Object(mut obj) => match obj.remove("data") {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(MapillaryError::UnexpectedResponse("response has no data array".into())),
        },
        _ => Err(MapillaryError::UnexpectedResponse("response is not an object".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn client() -> MapillaryClient {
        MapillaryClient::builder().token("MLY|test".to_string()).workers(2).build().unwrap()
    }

    #[test]
    fn test_bbox_url_contains_query() {
        let client = client();
        let bbox = BBox::new(12.0, 55.0, 13.0, 56.0).unwrap();
        let window = Window {
            start: Some("2023-01-01T00:00:00Z".into()),
            end: None,
        };
        let fields = vec!["id".to_string(), "geometry".to_string()];
        let url = client.bbox_url(&bbox, &fields, &window).unwrap();

        assert_eq!(url.path(), "/images");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("fields".into(), "id,geometry".into())));
        assert!(pairs.contains(&("bbox".into(), "12,55,13,56".into())));
        assert!(pairs.contains(&("limit".into(), "2000".into())));
        assert!(pairs.contains(&("start_captured_at".into(), "2023-01-01T00:00:00Z".into())));
        assert!(!pairs.iter().any(|(k, _)| k == "end_captured_at"));
        assert!(!url.as_str().contains("MLY|test"), "token goes in a header, not the URL");
    }

    #[test]
    fn test_recursion_past_max_depth_returns_nothing() {
        let client = client();
        let bbox = BBox::new(0.0, 0.0, 1.0, 1.0).unwrap();
        let no_request = |_: &BBox| -> Result<Vec<Value>, MapillaryError> { panic!("no request past the maximum depth") };
        let result = client.recursive_fetch(bbox, 26, 25, &no_request).unwrap();
        assert!(result.is_empty());
    }

    fn image(id: &str, area: &BBox) -> Value {
        let center = area.center();
        json!({
            "id": id,
            "geometry": { "type": "Point", "coordinates": [center.x(), center.y()] },
            "thumb_1024_url": format!("https://example.com/{id}.jpg"),
        })
    }

    #[test]
    fn test_full_page_splits_into_quadrants_and_dedups() {
        let client = MapillaryClient::builder().token("MLY|test".to_string()).workers(2).limit(2).build().unwrap();
        let root = BBox::new(0.0, 0.0, 1.0, 1.0).unwrap();
        let requests = Mutex::new(Vec::new());
        let fetch_page = |area: &BBox| -> Result<Vec<Value>, MapillaryError> {
            requests.lock().unwrap().push(*area);
            if *area == root {
                return Ok(vec![image("root-a", area), image("root-b", area)]);
            }
            // The lower quadrants both see an image lying on their shared border.
            let id = if area.min_y == root.min_y {
                "border".to_string()
            } else {
                format!("upper-{}", area.min_x)
            };
            Ok(vec![image(&id, area)])
        };

        let frame = client.collect_within_bbox(root, 25, &fetch_page).unwrap();

        let requests = requests.into_inner().unwrap();
        assert_eq!(requests.len(), 5, "root plus four quadrants");
        assert_eq!(requests.iter().filter(|b| **b != root).count(), 4);
        let mut ids: Vec<_> = frame.iter().filter_map(|r| r.mly_id.clone()).collect();
        ids.sort();
        assert_eq!(ids, vec!["border", "upper-0", "upper-0.5"]);
    }

    #[test]
    fn test_page_below_limit_is_not_split() {
        let client = MapillaryClient::builder().token("MLY|test".to_string()).workers(2).limit(3).build().unwrap();
        let root = BBox::new(0.0, 0.0, 1.0, 1.0).unwrap();
        let requests = Mutex::new(0);
        let fetch_page = |area: &BBox| -> Result<Vec<Value>, MapillaryError> {
            *requests.lock().unwrap() += 1;
            Ok(vec![image("1", area), image("2", area)])
        };

        let frame = client.collect_within_bbox(root, 25, &fetch_page).unwrap();

        assert_eq!(requests.into_inner().unwrap(), 1);
        assert_eq!(frame.len(), 2);
    }

    #[test]
    fn test_take_data() {
        assert_eq!(take_data(json!({ "data": [1, 2] })).unwrap().len(), 2);
        assert!(take_data(json!({ "error": "x" })).is_err());
    }

    #[test]
    fn test_resolve_fields_validates_custom_lists() {
        let client = client();
        assert_eq!(client.resolve_fields(None).unwrap().len(), DEFAULT_FIELDS.len());
        assert!(client.resolve_fields(Some(&["id"])).is_err());
    }

    #[test]
    fn test_to_frame_skips_images_without_url() {
        let frame = client()
            .to_frame(vec![
                json!({ "id": "1", "geometry": { "type": "Point", "coordinates": [1.0, 2.0] }, "thumb_256_url": "https://x/1.jpg" }),
                json!({ "id": "2", "geometry": { "type": "Point", "coordinates": [1.0, 2.0] } }),
            ])
            .unwrap();
        assert_eq!(frame.len(), 1);
    }

    #[test]
    #[ignore = "requires MAPILLARY_TOKEN and network access"]
    fn test_fetch_within_small_bbox() {
        let token = std::env::var("MAPILLARY_TOKEN").unwrap();
        let client = MapillaryClient::builder().token(token).build().unwrap();
        let bbox = BBox::new(12.967, 55.607, 12.968, 55.608).unwrap();
        let frame = client.fetch_within_bbox().bbox(bbox).call().unwrap();
        frame.verify_structure().unwrap();
    }
}
