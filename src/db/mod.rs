//! PostGIS persistence for image frames (PostgreSQL via sqlx).
//!
//! One table per frame kind. Required columns (`name`, `image_url`,
//! `geometry`) are `NOT NULL` and `image_url` is unique, which is what
//! upserts key on. Snapped geometry and angle live in the same row.

pub mod query;
pub mod schema;
pub mod write;

pub use write::IfExists;

use crate::frame::error::FrameError;
use regex::Regex;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres};
use std::sync::LazyLock;
use thiserror::Error;

static TABLE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_]{0,62}\.)?[A-Za-z_][A-Za-z0-9_]{0,62}$").unwrap());

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Invalid table name '{0}'")]
    InvalidTableName(String),

    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Row {index} could not be read: {reason}")]
    BadRow { index: usize, reason: String },

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// A validated, possibly schema-qualified table name.
///
/// Table names are interpolated into SQL, so only plain identifiers are accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName(String);

impl TableName {
    pub fn new(name: &str) -> Result<Self, DbError> {
        if TABLE_NAME.is_match(name) {
            Ok(Self(name.to_string()))
        } else {
            Err(DbError::InvalidTableName(name.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name usable as a prefix for constraints and indexes (`schema.t` becomes `schema_t`).
    pub(crate) fn ident_prefix(&self) -> String {
        self.0.replace('.', "_")
    }
}

impl std::fmt::Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle to a PostGIS database.
#[derive(Clone)]
pub struct PostGis {
    pub(crate) pool: PgPool,
}

impl PostGis {
    /// Connects and makes sure the `postgis` extension is available.
    pub async fn connect(database_url: &str) -> Result<Self, DbError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        sqlx::query("CREATE EXTENSION IF NOT EXISTS postgis")
            .execute(&pool)
            .await?;
        tracing::debug!("connected to PostGIS");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &sqlx::Pool<Postgres> {
        &self.pool
    }

    pub async fn table_exists(&self, table: &TableName) -> Result<bool, DbError> {
        let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .bind(table.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }
}
