//! Table layout and DDL.

use super::{DbError, PostGis, TableName};
use sqlx::PgConnection;

/// Postgres truncates identifiers longer than this many bytes.
const MAX_IDENT_LEN: usize = 63;

/// Columns written for every row, in bind order. Geometry columns take WKT.
pub const COLUMNS: [&str; 20] = [
    "name",
    "image_url",
    "geometry",
    "mly_id",
    "sequence",
    "captured_at",
    "altitude",
    "computed_altitude",
    "compass_angle",
    "computed_compass_angle",
    "computed_geometry",
    "computed_rotation",
    "camera_type",
    "camera_parameters",
    "exif_orientation",
    "width",
    "height",
    "snapped_geometry",
    "snapped_angle",
    "properties",
];

pub const GEOMETRY_COLUMNS: [&str; 3] = ["geometry", "computed_geometry", "snapped_geometry"];

/// Name for an index or constraint on `table`: `<prefix>_<suffix>`.
///
/// When that would exceed [`MAX_IDENT_LEN`] the prefix is cut and followed by a
/// hash of the full table name, so names stay stable and distinct per table.
pub fn object_name(table: &TableName, suffix: &str) -> String {
    let prefix = table.ident_prefix();
    if prefix.len() + 1 + suffix.len() <= MAX_IDENT_LEN {
        return format!("{prefix}_{suffix}");
    }
    let hash = format!("{:016x}", fnv1a(table.as_str().as_bytes()));
    let keep = MAX_IDENT_LEN - suffix.len() - hash.len() - 2;
    // Table names are ASCII identifiers, so byte slicing stays on char boundaries.
    format!("{}_{hash}_{suffix}", &prefix[..keep.min(prefix.len())])
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(0x0100_0000_01b3)
    })
}

pub fn create_table_sql(table: &TableName) -> String {
    let unique_image_url = object_name(table, "unique_image_url");
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id BIGSERIAL PRIMARY KEY,
            name TEXT NOT NULL,
            image_url TEXT NOT NULL,
            geometry geometry(Point, 4326) NOT NULL,
            mly_id TEXT,
            sequence TEXT,
            captured_at TIMESTAMPTZ,
            altitude DOUBLE PRECISION,
            computed_altitude DOUBLE PRECISION,
            compass_angle DOUBLE PRECISION,
            computed_compass_angle DOUBLE PRECISION,
            computed_geometry geometry(Point, 4326),
            computed_rotation TEXT,
            camera_type TEXT,
            camera_parameters TEXT,
            exif_orientation INTEGER,
            width INTEGER,
            height INTEGER,
            snapped_geometry geometry(Point, 4326),
            snapped_angle DOUBLE PRECISION,
            properties JSONB NOT NULL DEFAULT '{{}}'::jsonb,
            CONSTRAINT {unique_image_url} UNIQUE (image_url)
        )"
    )
}

pub fn create_index_sql(table: &TableName) -> Vec<String> {
    let mut statements: Vec<String> = GEOMETRY_COLUMNS
        .iter()
        .map(|col| {
            let name = object_name(table, &format!("{col}_idx"));
            format!("CREATE INDEX IF NOT EXISTS {name} ON {table} USING gist ({col})")
        })
        .collect();
    for col in ["mly_id", "sequence"] {
        let name = object_name(table, &format!("{col}_idx"));
        statements.push(format!("CREATE INDEX IF NOT EXISTS {name} ON {table} ({col})"));
    }
    statements
}

pub fn drop_table_sql(table: &TableName) -> String {
    format!("DROP TABLE IF EXISTS {table}")
}

/// Runs the table and index DDL on `conn`, typically an open transaction.
pub(crate) async fn create_image_table_on(conn: &mut PgConnection, table: &TableName) -> Result<(), DbError> {
    sqlx::query(&create_table_sql(table)).execute(&mut *conn).await?;
    for statement in create_index_sql(table) {
        sqlx::query(&statement).execute(&mut *conn).await?;
    }
    Ok(())
}

impl PostGis {
    /// Creates the image table and its indexes if they do not exist yet.
    pub async fn create_image_table(&self, table: &TableName) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        create_image_table_on(&mut *tx, table).await?;
        tx.commit().await?;
        tracing::info!(%table, "image table ready");
        Ok(())
    }

    pub async fn drop_table(&self, table: &TableName) -> Result<(), DbError> {
        sqlx::query(&drop_table_sql(table))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_table_sql_constraints() {
        let table = TableName::new("mly_images").unwrap();
        let sql = create_table_sql(&table);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS mly_images ("));
        assert!(sql.contains("image_url TEXT NOT NULL"));
        assert!(sql.contains("geometry geometry(Point, 4326) NOT NULL"));
        assert!(sql.contains("CONSTRAINT mly_images_unique_image_url UNIQUE (image_url)"));
        assert!(sql.contains("DEFAULT '{}'::jsonb"));
        for column in COLUMNS {
            assert!(sql.contains(&format!("\n            {column} ")), "missing column {column}");
        }
    }

    #[test]
    fn test_index_sql_uses_gist_for_geometries() {
        let table = TableName::new("public.images").unwrap();
        let statements = create_index_sql(&table);
        assert_eq!(statements.len(), 5);
        assert_eq!(
            statements[0],
            "CREATE INDEX IF NOT EXISTS public_images_geometry_idx ON public.images USING gist (geometry)"
        );
    }

    #[test]
    fn test_long_table_names_keep_identifiers_within_limit() {
        let long = "a".repeat(63);
        let other = format!("{}b", "a".repeat(62));
        let table = TableName::new(&long).unwrap();
        let other_table = TableName::new(&other).unwrap();

        let mut names = vec![object_name(&table, "unique_image_url")];
        for col in GEOMETRY_COLUMNS.iter().chain(&["mly_id", "sequence"]) {
            names.push(object_name(&table, &format!("{col}_idx")));
        }
        for name in &names {
            assert!(name.len() <= MAX_IDENT_LEN, "{name} is {} bytes", name.len());
            assert!(create_index_sql(&table).iter().any(|s| s.contains(name.as_str()))
                || create_table_sql(&table).contains(name.as_str()));
        }
        let unique: std::collections::HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
        assert_ne!(
            object_name(&table, "geometry_idx"),
            object_name(&other_table, "geometry_idx")
        );
    }

    #[test]
    fn test_short_table_names_are_unchanged() {
        let table = TableName::new("mly_images").unwrap();
        assert_eq!(object_name(&table, "sequence_idx"), "mly_images_sequence_idx");
    }
}
