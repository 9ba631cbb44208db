//! Writing frames: bulk insert with `if_exists` semantics, upserts and snapped updates.

use super::schema::{COLUMNS, create_index_sql, create_table_sql, drop_table_sql};
use super::{DbError, PostGis, TableName};
use crate::frame::GeoImageFrame;
use crate::frame::record::{ImageRecord, point_wkt};
use chrono::Utc;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{Postgres, Transaction};
use std::str::FromStr;

/// What [`PostGis::to_postgis`] does when the table already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IfExists {
    #[default]
    Fail,
    Replace,
    Append,
}

impl FromStr for IfExists {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fail" => Ok(IfExists::Fail),
            "replace" => Ok(IfExists::Replace),
            "append" => Ok(IfExists::Append),
            other => Err(format!("expected fail, replace or append, got '{other}'")),
        }
    }
}

fn placeholders() -> String {
    COLUMNS
        .iter()
        .enumerate()
        .map(|(i, col)| {
            if super::schema::GEOMETRY_COLUMNS.contains(col) {
                format!("ST_GeomFromText(${}, 4326)", i + 1)
            } else {
                format!("${}", i + 1)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// `INSERT` statement for one row, optionally with an `ON CONFLICT (image_url)` clause.
pub fn insert_sql(table: &TableName, on_conflict: Option<bool>) -> String {
    let mut sql = format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        COLUMNS.join(", "),
        placeholders()
    );
    match on_conflict {
        Some(true) => {
            let updates = COLUMNS
                .iter()
                .filter(|c| **c != "image_url")
                .map(|c| format!("{c} = EXCLUDED.{c}"))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" ON CONFLICT (image_url) DO UPDATE SET {updates}"));
        }
        Some(false) => sql.push_str(" ON CONFLICT (image_url) DO NOTHING"),
        None => {}
    }
    sql
}

pub fn update_snapped_sql(table: &TableName, update_conflicting: bool) -> String {
    let mut sql = format!(
        "UPDATE {table} SET snapped_geometry = ST_GeomFromText($1, 4326), snapped_angle = $2 WHERE image_url = $3"
    );
    if !update_conflicting {
        sql.push_str(" AND snapped_geometry IS NULL");
    }
    sql
}

fn to_i32(v: Option<u32>) -> Option<i32> {
    v.and_then(|v| i32::try_from(v).ok())
}

/// Binds a record's values in [`COLUMNS`] order.
fn bind_record<'q>(query: Query<'q, Postgres, PgArguments>, r: &'q ImageRecord) -> Query<'q, Postgres, PgArguments> {
    query
        .bind(&r.name)
        .bind(&r.image_url)
        .bind(point_wkt(&r.geometry))
        .bind(&r.mly_id)
        .bind(&r.sequence)
        .bind(r.captured_at.map(|d| d.with_timezone(&Utc)))
        .bind(r.altitude)
        .bind(r.computed_altitude)
        .bind(r.compass_angle)
        .bind(r.computed_compass_angle)
        .bind(r.computed_geometry.as_ref().map(point_wkt))
        .bind(&r.computed_rotation)
        .bind(&r.camera_type)
        .bind(&r.camera_parameters)
        .bind(r.exif_orientation)
        .bind(to_i32(r.width))
        .bind(to_i32(r.height))
        .bind(r.snapped_geometry.as_ref().map(point_wkt))
        .bind(r.snapped_angle)
        .bind(Json(&r.properties))
}

async fn insert_all(
    tx: &mut Transaction<'_, Postgres>,
    sql: &str,
    frame: &GeoImageFrame,
) -> Result<u64, DbError> {
    let mut affected = 0;
    for record in frame {
        affected += bind_record(sqlx::query(sql), record)
            .execute(&mut **tx)
            .await?
            .rows_affected();
    }
    Ok(affected)
}

/// DDL run ahead of the inserts of [`PostGis::to_postgis`], inside the same transaction.
fn setup_statements(table: &TableName, exists: bool, if_exists: IfExists) -> Result<Vec<String>, DbError> {
    let mut statements = match (exists, if_exists) {
        (true, IfExists::Fail) => return Err(DbError::TableExists(table.to_string())),
        (true, IfExists::Append) => return Ok(Vec::new()),
        (true, IfExists::Replace) => vec![drop_table_sql(table)],
        (false, _) => Vec::new(),
    };
    statements.push(create_table_sql(table));
    statements.extend(create_index_sql(table));
    Ok(statements)
}

impl PostGis {
    /// Writes `frame` to `table`.
    ///
    /// Image URLs must be unique. A missing table is created. An existing one
    /// makes `Fail` error, `Replace` drop and recreate it, and `Append` insert
    /// into it (duplicate URLs then surface as a constraint violation). Schema
    /// changes and inserts share one transaction, so a failed write leaves the
    /// previous table in place.
    pub async fn to_postgis(&self, frame: &GeoImageFrame, table: &TableName, if_exists: IfExists) -> Result<u64, DbError> {
        frame.verify_structure()?;
        frame.ensure_unique_image_urls()?;

        let exists = self.table_exists(table).await?;
        let ddl = setup_statements(table, exists, if_exists)?;
        if exists && if_exists == IfExists::Replace {
            tracing::info!(%table, "replacing existing table");
        }

        let mut tx = self.pool.begin().await?;
        for statement in &ddl {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        let inserted = insert_all(&mut tx, &insert_sql(table, None), frame).await?;
        tx.commit().await?;
        tracing::info!(%table, rows = inserted, "wrote image frame");
        Ok(inserted)
    }

    /// Inserts rows, resolving `image_url` conflicts by updating (`update_conflicting`)
    /// or keeping the stored row. Creates the table when needed.
    pub async fn upsert(&self, frame: &GeoImageFrame, table: &TableName, update_conflicting: bool) -> Result<u64, DbError> {
        frame.verify_structure()?;
        frame.ensure_unique_image_urls()?;
        self.create_image_table(table).await?;

        let mut tx = self.pool.begin().await?;
        let affected = insert_all(&mut tx, &insert_sql(table, Some(update_conflicting)), frame).await?;
        tx.commit().await?;
        tracing::info!(%table, rows = affected, update_conflicting, "upserted image frame");
        Ok(affected)
    }

    /// Stores `snapped_geometry`/`snapped_angle` for rows matched by `image_url`.
    ///
    /// Without `update_conflicting`, rows that already have a snapped geometry
    /// are left alone. Records that were not snapped are skipped.
    pub async fn update_snapped(&self, frame: &GeoImageFrame, table: &TableName, update_conflicting: bool) -> Result<u64, DbError> {
        let sql = update_snapped_sql(table, update_conflicting);
        let skipped = frame.iter().filter(|r| r.snapped_geometry.is_none()).count();
        if skipped > 0 {
            tracing::warn!(skipped, "records without snapped_geometry are not written");
        }

        let mut tx = self.pool.begin().await?;
        let mut updated = 0;
        for record in frame {
            let Some(snapped) = record.snapped_geometry.as_ref() else {
                continue;
            };
            updated += sqlx::query(&sql)
                .bind(point_wkt(snapped))
                .bind(record.snapped_angle)
                .bind(&record.image_url)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        tracing::info!(%table, rows = updated, "updated snapped geometries");
        Ok(updated)
    }
}

impl GeoImageFrame {
    /// Shorthand for [`PostGis::to_postgis`].
    pub async fn to_postgis(&self, db: &PostGis, table: &TableName, if_exists: IfExists) -> Result<u64, DbError> {
        db.to_postgis(self, table, if_exists).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::test_db;
    use geo::Point;

    #[test]
    fn test_insert_sql_shapes() {
        let table = TableName::new("images").unwrap();
        let plain = insert_sql(&table, None);
        assert!(plain.starts_with("INSERT INTO images (name, image_url, geometry, mly_id"));
        assert!(plain.contains("$1, $2, ST_GeomFromText($3, 4326), $4"));
        assert!(plain.ends_with("$20)"));
        assert!(!plain.contains("ON CONFLICT"));

        assert!(insert_sql(&table, Some(false)).ends_with("ON CONFLICT (image_url) DO NOTHING"));
        let update = insert_sql(&table, Some(true));
        assert!(update.contains("ON CONFLICT (image_url) DO UPDATE SET name = EXCLUDED.name"));
        assert!(!update.contains("image_url = EXCLUDED.image_url"));
    }

    #[test]
    fn test_update_snapped_sql() {
        let table = TableName::new("images").unwrap();
        assert!(update_snapped_sql(&table, false).ends_with("AND snapped_geometry IS NULL"));
        assert!(update_snapped_sql(&table, true).ends_with("WHERE image_url = $3"));
    }

    #[test]
    fn test_replace_drops_and_recreates_before_inserts() {
        let table = TableName::new("images").unwrap();
        let statements = setup_statements(&table, true, IfExists::Replace).unwrap();
        assert_eq!(statements[0], "DROP TABLE IF EXISTS images");
        assert!(statements[1].starts_with("CREATE TABLE IF NOT EXISTS images ("));
        assert_eq!(statements.len(), 2 + create_index_sql(&table).len());
    }

    #[test]
    fn test_setup_statements_per_if_exists() {
        let table = TableName::new("images").unwrap();
        assert!(matches!(
            setup_statements(&table, true, IfExists::Fail),
            Err(DbError::TableExists(_))
        ));
        assert!(setup_statements(&table, true, IfExists::Append).unwrap().is_empty());
        let fresh = setup_statements(&table, false, IfExists::Fail).unwrap();
        assert!(fresh[0].starts_with("CREATE TABLE"));
        assert!(!fresh.iter().any(|s| s.starts_with("DROP")));
    }

    #[test]
    fn test_if_exists_parse() {
        assert_eq!("replace".parse::<IfExists>().unwrap(), IfExists::Replace);
        assert!("truncate".parse::<IfExists>().is_err());
    }

    fn frame() -> GeoImageFrame {
        let mut a = ImageRecord::new("a", "https://example.com/a.jpg", Point::new(139.70, 35.68));
        a.mly_id = Some("1".into());
        a.sequence = Some("s1".into());
        let b = ImageRecord::new("b", "https://example.com/b.jpg", Point::new(139.71, 35.69));
        GeoImageFrame::new(vec![a, b]).unwrap()
    }

    #[tokio::test]
    #[ignore = "requires a PostGIS database in DATABASE_URL"]
    async fn test_to_postgis_if_exists() {
        let db = test_db().await;
        let table = TableName::new("landlens_test_write").unwrap();
        db.drop_table(&table).await.unwrap();

        assert_eq!(db.to_postgis(&frame(), &table, IfExists::Fail).await.unwrap(), 2);
        assert!(matches!(
            db.to_postgis(&frame(), &table, IfExists::Fail).await,
            Err(DbError::TableExists(_))
        ));
        assert!(db.to_postgis(&frame(), &table, IfExists::Append).await.is_err(), "duplicate URLs violate the unique constraint");
        assert_eq!(db.to_postgis(&frame(), &table, IfExists::Replace).await.unwrap(), 2);
        assert_eq!(db.upsert(&frame(), &table, false).await.unwrap(), 0);
        assert_eq!(db.upsert(&frame(), &table, true).await.unwrap(), 2);

        db.drop_table(&table).await.unwrap();
    }
}
