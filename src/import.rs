//! Mapillary to PostGIS import pipeline.
//!
//! Fetch, skip what is already stored, download the images next to the
//! database and upsert the rows. Downloaded files replace the Mapillary
//! thumbnail URL in `image_url`.

use crate::db::{DbError, PostGis, TableName};
use crate::frame::GeoImageFrame;
use crate::frame::download::FilenameSource;
use crate::geometry::BBox;
use crate::http::{RetryPolicy, Timeouts};
use crate::mapillary::{MapillaryClient, MapillaryError};
use bon::bon;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error(transparent)]
    Mapillary(#[from] MapillaryError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("Image download failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Counts reported by an import run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub fetched: usize,
    pub skipped: usize,
    pub downloaded: usize,
    pub written: u64,
}

pub struct MapillaryImport {
    client: Arc<MapillaryClient>,
    db: PostGis,
    table: TableName,
    workers: usize,
    timeouts: Timeouts,
    retry: RetryPolicy,
}

#[bon]
impl MapillaryImport {
    /// # Builder Arguments
    ///
    /// * `table` - Destination table, created on first write.
    /// * `workers` - (Default: `8`) Download pool size.
    #[builder]
    pub fn new(
        client: MapillaryClient,
        db: PostGis,
        table: TableName,
        #[builder(default = 8)] workers: usize,
        #[builder(default)] timeouts: Timeouts,
        #[builder(default)] retry: RetryPolicy,
    ) -> Self {
        Self {
            client: Arc::new(client),
            db,
            table,
            workers,
            timeouts,
            retry,
        }
    }

    /// Imports every image in `bbox` captured between `start` and `end`
    /// (`YYYY-MM-DD`, inclusive) that is not stored yet.
    pub async fn import_images_by_bbox(
        &self,
        bbox: BBox,
        start: &str,
        end: &str,
        image_dir: impl AsRef<Path>,
    ) -> Result<ImportSummary, ImportError> {
        let client = Arc::clone(&self.client);
        let (start, end) = (start.to_string(), end.to_string());
        let frame = tokio::task::spawn_blocking(move || {
            client
                .fetch_within_bbox()
                .bbox(bbox)
                .start_date(&start)
                .end_date(&end)
                .call()
        })
        .await??;
        self.store(frame, image_dir.as_ref()).await
    }

    /// Imports a single image unless it is already stored.
    pub async fn import_image_by_id(&self, image_id: &str, image_dir: impl AsRef<Path>) -> Result<ImportSummary, ImportError> {
        let client = Arc::clone(&self.client);
        let id = image_id.to_string();
        let frame = tokio::task::spawn_blocking(move || client.fetch_by_id(&id, None)).await??;
        self.store(frame, image_dir.as_ref()).await
    }

    async fn store(&self, frame: GeoImageFrame, image_dir: &Path) -> Result<ImportSummary, ImportError> {
        let mut summary = ImportSummary {
            fetched: frame.len(),
            ..ImportSummary::default()
        };

        let existing: HashSet<String> = if self.db.table_exists(&self.table).await? {
            self.db.get_mly_ids(&self.table).await?.into_iter().collect()
        } else {
            HashSet::new()
        };
        let fresh = skip_existing(&frame, &existing);
        summary.skipped = frame.len() - fresh.len();
        if fresh.is_empty() {
            tracing::info!(fetched = summary.fetched, "nothing new to import");
            return Ok(summary);
        }

        let dir: PathBuf = image_dir.to_path_buf();
        let (workers, timeouts, retry) = (self.workers, self.timeouts, self.retry);
        let before = fresh.clone();
        let local = tokio::task::spawn_blocking(move || {
            fresh.download_images_to_local(&dir, FilenameSource::MlyId, workers, timeouts, &retry)
        })
        .await??;
        summary.downloaded = before
            .iter()
            .zip(local.iter())
            .filter(|(a, b)| a.image_url != b.image_url)
            .count();

        summary.written = self.db.upsert(&local, &self.table, false).await?;
        tracing::info!(
            table = %self.table,
            fetched = summary.fetched,
            skipped = summary.skipped,
            downloaded = summary.downloaded,
            written = summary.written,
            "import finished"
        );
        Ok(summary)
    }
}

/// Rows whose Mapillary id is not in `existing`.
fn skip_existing(frame: &GeoImageFrame, existing: &HashSet<String>) -> GeoImageFrame {
    frame.filter(|record| {
        record
            .mly_id
            .as_ref()
            .is_none_or(|id| !existing.contains(id))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ImageRecord;
    use geo::Point;

    #[test]
    fn test_skip_existing_filters_stored_ids() {
        let mut a = ImageRecord::new("mly|1", "https://example.com/1.jpg", Point::new(0.0, 0.0));
        a.mly_id = Some("1".into());
        let mut b = ImageRecord::new("mly|2", "https://example.com/2.jpg", Point::new(0.0, 0.0));
        b.mly_id = Some("2".into());
        let c = ImageRecord::new("local", "/tmp/local.jpg", Point::new(0.0, 0.0));
        let frame = GeoImageFrame::new(vec![a, b, c]).unwrap();

        let existing = HashSet::from(["1".to_string()]);
        let fresh = skip_existing(&frame, &existing);

        let names: Vec<_> = fresh.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["mly|2", "local"]);
    }

    #[tokio::test]
    #[ignore = "requires MAPILLARY_TOKEN, network access and DATABASE_URL"]
    async fn test_import_image_by_id() {
        let token = std::env::var("MAPILLARY_TOKEN").unwrap();
        let client = MapillaryClient::builder().token(token).build().unwrap();
        let db = crate::db::tests::test_db().await;
        let table = TableName::new("landlens_test_import").unwrap();
        db.drop_table(&table).await.unwrap();
        let import = MapillaryImport::builder().client(client).db(db.clone()).table(table.clone()).build();
        let dir = tempfile::tempdir().unwrap();

        let first = import.import_image_by_id("498763468214164", dir.path()).await.unwrap();
        assert_eq!(first.fetched, 1);
        assert_eq!(first.written, 1);

        let second = import.import_image_by_id("498763468214164", dir.path()).await.unwrap();
        assert_eq!(second.skipped, 1);
        assert_eq!(second.written, 0);

        db.drop_table(&table).await.unwrap();
    }
}
