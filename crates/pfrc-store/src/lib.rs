//! SQLite-backed document and rule store for PFRC.
//!
//! One [`Store`] owns a single connection; the pipeline holds exactly one
//! store per run. Document methods live in [`documents`], rule methods in
//! [`rules`].

use std::path::Path;

use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Connection, SqliteConnection};
use thiserror::Error;

pub mod documents;
pub mod rules;

pub const CRATE_NAME: &str = "pfrc-store";

const SCHEMA_SQL: &str = include_str!("../schema.sql");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("invalid document url: {0}")]
    Canon(#[from] pfrc_core::CanonError),
    #[error("unrecognized {column} label in stored row: {value}")]
    UnknownLabel { column: &'static str, value: String },
}

/// Outcome of [`Store::upsert_document`], reported back for run statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First version of a canonical URL.
    Inserted,
    /// Content hash unchanged; the existing current row was reused.
    Duplicate,
    /// Content changed; previous version retired, new version inserted.
    Updated,
}

pub struct Store {
    conn: SqliteConnection,
}

impl Store {
    /// Open (creating if missing) an on-disk store and apply the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .foreign_keys(true);
        let conn = SqliteConnection::connect_with(&options).await?;
        Self::init(conn).await
    }

    /// In-memory store, used by tests and dry runs.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);
        let conn = SqliteConnection::connect_with(&options).await?;
        Self::init(conn).await
    }

    async fn init(mut conn: SqliteConnection) -> Result<Self, StoreError> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&mut conn).await?;
        Ok(Self { conn })
    }

    pub async fn close(self) -> Result<(), StoreError> {
        self.conn.close().await?;
        Ok(())
    }
}
