//! Reading frames back out of PostGIS.

use super::schema::{COLUMNS, GEOMETRY_COLUMNS};
use super::{DbError, PostGis, TableName};
use crate::frame::GeoImageFrame;
use crate::frame::record::{ImageRecord, parse_point_wkt};
use crate::geometry::BBox;
use crate::time::localize_utc;
use chrono::{DateTime, Days, NaiveDate, Utc};
use geo::Point;
use serde_json::{Map, Value};
use sqlx::Row;
use sqlx::postgres::PgRow;
use sqlx::types::Json;

/// `SELECT` list with geometries rendered as WKT.
fn select_list() -> String {
    COLUMNS
        .iter()
        .map(|col| {
            if GEOMETRY_COLUMNS.contains(col) {
                format!("ST_AsText({col}) AS {col}")
            } else {
                (*col).to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn select_sql(table: &TableName, condition: Option<&str>) -> String {
    let mut sql = format!("SELECT {} FROM {table}", select_list());
    if let Some(condition) = condition {
        sql.push_str(" WHERE ");
        sql.push_str(condition);
    }
    sql.push_str(" ORDER BY id");
    sql
}

fn point_column(row: &PgRow, index: usize, column: &str) -> Result<Option<Point<f64>>, DbError> {
    let Some(wkt) = row.try_get::<Option<String>, _>(column)? else {
        return Ok(None);
    };
    parse_point_wkt(&wkt).map(Some).ok_or_else(|| DbError::BadRow {
        index,
        reason: format!("{column} is not a point: {wkt}"),
    })
}

fn row_to_record(index: usize, row: &PgRow) -> Result<ImageRecord, DbError> {
    let geometry = point_column(row, index, "geometry")?.ok_or_else(|| DbError::BadRow {
        index,
        reason: "geometry is NULL".to_string(),
    })?;
    let mut record = ImageRecord::new(
        row.try_get::<String, _>("name")?,
        row.try_get::<String, _>("image_url")?,
        geometry,
    );
    record.mly_id = row.try_get("mly_id")?;
    record.sequence = row.try_get("sequence")?;
    record.captured_at = row
        .try_get::<Option<DateTime<Utc>>, _>("captured_at")?
        .map(|utc| localize_utc(utc, geometry.y(), geometry.x()));
    record.altitude = row.try_get("altitude")?;
    record.computed_altitude = row.try_get("computed_altitude")?;
    record.compass_angle = row.try_get("compass_angle")?;
    record.computed_compass_angle = row.try_get("computed_compass_angle")?;
    record.computed_geometry = point_column(row, index, "computed_geometry")?;
    record.computed_rotation = row.try_get("computed_rotation")?;
    record.camera_type = row.try_get("camera_type")?;
    record.camera_parameters = row.try_get("camera_parameters")?;
    record.exif_orientation = row.try_get("exif_orientation")?;
    record.width = row
        .try_get::<Option<i32>, _>("width")?
        .and_then(|v| u32::try_from(v).ok());
    record.height = row
        .try_get::<Option<i32>, _>("height")?
        .and_then(|v| u32::try_from(v).ok());
    record.snapped_geometry = point_column(row, index, "snapped_geometry")?;
    record.snapped_angle = row.try_get("snapped_angle")?;
    record.properties = row
        .try_get::<Option<Json<Map<String, Value>>>, _>("properties")?
        .map(|json| json.0)
        .unwrap_or_default();
    Ok(record)
}

fn rows_to_frame(rows: &[PgRow]) -> Result<GeoImageFrame, DbError> {
    let records = rows
        .iter()
        .enumerate()
        .map(|(index, row)| row_to_record(index, row))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(GeoImageFrame::new(records)?)
}

/// Half-open UTC range covering `start` through `end`, both inclusive days.
fn date_range(start: NaiveDate, end: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let end = end.checked_add_days(Days::new(1)).unwrap_or(end);
    (
        start.and_time(chrono::NaiveTime::MIN).and_utc(),
        end.and_time(chrono::NaiveTime::MIN).and_utc(),
    )
}

impl PostGis {
    pub async fn select_all(&self, table: &TableName) -> Result<GeoImageFrame, DbError> {
        let rows = sqlx::query(&select_sql(table, None)).fetch_all(&self.pool).await?;
        rows_to_frame(&rows)
    }

    /// Rows whose `geometry` intersects `bbox`, optionally limited to a capture
    /// date range (inclusive on both ends).
    pub async fn select_within_bbox(
        &self,
        table: &TableName,
        bbox: &BBox,
        dates: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<GeoImageFrame, DbError> {
        let mut condition = "geometry && ST_MakeEnvelope($1, $2, $3, $4, 4326)".to_string();
        if dates.is_some() {
            condition.push_str(" AND captured_at >= $5 AND captured_at < $6");
        }
        let sql = select_sql(table, Some(&condition));
        let mut query = sqlx::query(&sql)
            .bind(bbox.min_x)
            .bind(bbox.min_y)
            .bind(bbox.max_x)
            .bind(bbox.max_y);
        if let Some((start, end)) = dates {
            let (from, until) = date_range(start, end);
            query = query.bind(from).bind(until);
        }
        let rows = query.fetch_all(&self.pool).await?;
        tracing::debug!(%table, %bbox, rows = rows.len(), "selected images within bbox");
        rows_to_frame(&rows)
    }

    pub async fn select_by_mly_id(&self, table: &TableName, mly_id: &str) -> Result<GeoImageFrame, DbError> {
        let rows = sqlx::query(&select_sql(table, Some("mly_id = $1")))
            .bind(mly_id)
            .fetch_all(&self.pool)
            .await?;
        rows_to_frame(&rows)
    }

    pub async fn select_by_sequence_id(&self, table: &TableName, sequence: &str) -> Result<GeoImageFrame, DbError> {
        let rows = sqlx::query(&select_sql(table, Some("sequence = $1")))
            .bind(sequence)
            .fetch_all(&self.pool)
            .await?;
        rows_to_frame(&rows)
    }

    /// Distinct non-null Mapillary ids stored in `table`.
    pub async fn get_mly_ids(&self, table: &TableName) -> Result<Vec<String>, DbError> {
        let ids = sqlx::query_scalar(&format!(
            "SELECT DISTINCT mly_id FROM {table} WHERE mly_id IS NOT NULL ORDER BY mly_id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    pub async fn get_sequence_ids(&self, table: &TableName) -> Result<Vec<String>, DbError> {
        let ids = sqlx::query_scalar(&format!(
            "SELECT DISTINCT sequence FROM {table} WHERE sequence IS NOT NULL ORDER BY sequence"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::IfExists;
    use crate::db::tests::test_db;

    #[test]
    fn test_select_sql_renders_geometries_as_wkt() {
        let table = TableName::new("images").unwrap();
        let sql = select_sql(&table, Some("mly_id = $1"));
        assert!(sql.starts_with("SELECT name, image_url, ST_AsText(geometry) AS geometry, mly_id"));
        assert!(sql.contains("ST_AsText(snapped_geometry) AS snapped_geometry"));
        assert!(sql.ends_with("FROM images WHERE mly_id = $1 ORDER BY id"));
    }

    #[test]
    fn test_date_range_includes_end_day() {
        let (from, until) = date_range(
            NaiveDate::from_ymd_opt(2021, 9, 1).unwrap(),
            NaiveDate::from_ymd_opt(2021, 9, 30).unwrap(),
        );
        assert_eq!(from.to_rfc3339(), "2021-09-01T00:00:00+00:00");
        assert_eq!(until.to_rfc3339(), "2021-10-01T00:00:00+00:00");
    }

    #[tokio::test]
    #[ignore = "requires a PostGIS database in DATABASE_URL"]
    async fn test_roundtrip_through_postgis() {
        let db = test_db().await;
        let table = TableName::new("landlens_test_query").unwrap();

        let mut a = ImageRecord::new("mly|1", "https://example.com/1.jpg", Point::new(139.70, 35.68));
        a.mly_id = Some("1".into());
        a.sequence = Some("seq".into());
        a.captured_at = DateTime::parse_from_rfc3339("2021-09-01T09:55:03+09:00").ok();
        a.compass_angle = Some(12.5);
        a.properties.insert("merge_cc".into(), serde_json::json!(7));
        let b = ImageRecord::new("far.jpg", "/tmp/far.jpg", Point::new(-122.4, 37.7));
        let frame = GeoImageFrame::new(vec![a.clone(), b]).unwrap();
        db.to_postgis(&frame, &table, IfExists::Replace).await.unwrap();

        let all = db.select_all(&table).await.unwrap();
        assert_eq!(all, frame);

        let bbox = BBox::new(139.6, 35.6, 139.8, 35.8).unwrap();
        let within = db.select_within_bbox(&table, &bbox, None).await.unwrap();
        assert_eq!(within.records(), &[a]);

        let sept = Some((
            NaiveDate::from_ymd_opt(2021, 9, 1).unwrap(),
            NaiveDate::from_ymd_opt(2021, 9, 1).unwrap(),
        ));
        assert_eq!(db.select_within_bbox(&table, &bbox, sept).await.unwrap().len(), 1);

        assert_eq!(db.get_mly_ids(&table).await.unwrap(), vec!["1".to_string()]);
        assert_eq!(db.get_sequence_ids(&table).await.unwrap(), vec!["seq".to_string()]);
        assert_eq!(db.select_by_sequence_id(&table, "seq").await.unwrap().len(), 1);
        assert!(db.select_by_mly_id(&table, "2").await.unwrap().is_empty());

        db.drop_table(&table).await.unwrap();
    }
}
